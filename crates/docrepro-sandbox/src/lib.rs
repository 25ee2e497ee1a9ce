//! docrepro process sandbox.
//!
//! This crate runs one untrusted Python snippet at a time inside an
//! ephemeral, exclusively-owned workspace with a hard wall-clock deadline:
//!
//! - **[`config`]** -- [`SandboxConfig`] controls the interpreter, deadline,
//!   output cap, and kernel resource limits.
//! - **[`error`]** -- [`SandboxError`] enumerates internal failure modes.
//!   These never cross [`SnippetExecutor::execute`]; they are folded into
//!   [`ExecutionStatus::Fault`].
//! - **[`session`]** -- [`SandboxSession`] owns the workspace and the child
//!   process group and tears both down on drop.
//! - **[`capture`]** -- bounded stdout/stderr draining.
//! - **[`limits`]** -- pre-exec hardening (rlimits, network namespace).
//! - **[`engine`]** -- [`SandboxEngine`], the production [`SnippetExecutor`].
//!
//! Sessions share no state, so any number of them may run concurrently on a
//! multi-threaded tokio runtime.

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
pub mod outcome;
pub mod session;

pub use capture::CapturedStream;
pub use config::SandboxConfig;
pub use engine::{SandboxEngine, SnippetExecutor};
pub use error::{Result, SandboxError};
pub use outcome::{ExecutionOutcome, ExecutionStatus};
pub use session::SandboxSession;
