//! Documentation reproducibility scoring.
//!
//! Given the documentation text of a software artifact, this crate extracts
//! the embedded Python examples, refuses the ones that are unsafe to run,
//! executes the rest in [`docrepro_sandbox`] sandboxes, and scores each on a
//! three-tier scale.  The artifact score is the mean of the snippet scores.
//!
//! ## Modules
//!
//! - [`extract`] -- fenced code block extraction into [`Snippet`]s.
//! - [`safety`] -- tree-sitter based static analysis producing a
//!   [`SafetyVerdict`].
//! - [`score`] -- failure classification and [`ReproducibilityScore`]s.
//! - [`orchestrator`] -- the pipeline, worker pool, and budget.
//! - [`report`] -- [`ArtifactReport`] and the [`Aggregate`] value.
//! - [`config`] -- [`EngineConfig`], loadable from TOML.
//! - [`error`] -- Engine error types.
//!
//! ## Example
//!
//! ```no_run
//! # async fn run() -> docrepro_engine::Result<()> {
//! use docrepro_engine::{EngineConfig, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(EngineConfig::default())?;
//! let report = orchestrator
//!     .score_document("```python\nprint(\"hello\")\n```\n")
//!     .await;
//! println!("{}", report.aggregate);
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod report;
pub mod safety;
pub mod score;
pub mod snippet;

// Re-export the most commonly used types at the crate root.
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use extract::{LanguageTags, Snippets, extract};
pub use orchestrator::Orchestrator;
pub use report::{Aggregate, ArtifactReport, TierCounts};
pub use safety::{Rejection, SafetyAnalyzer, SafetyPolicy, SafetyVerdict, ViolationKind};
pub use score::{ClassificationRule, ReproducibilityScore, ScoreTier, Scorer};
pub use snippet::{Language, Snippet, SnippetPosition};

pub use docrepro_sandbox::{ExecutionOutcome, ExecutionStatus, SandboxConfig, SnippetExecutor};
