//! Sandbox error types.
//!
//! [`SandboxError`] covers everything that can go wrong while preparing,
//! running, or tearing down a session.  The engine converts every variant
//! into an [`ExecutionStatus::Fault`](crate::ExecutionStatus::Fault) outcome
//! before returning to its caller.

/// Internal error type for the process sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The ephemeral workspace directory could not be created or populated.
    #[error("workspace error: {reason}")]
    Workspace {
        /// Human-readable description of what went wrong.
        reason: String,
    },

    /// The interpreter process could not be started.
    #[error("failed to spawn `{program}`: {reason}")]
    Spawn {
        /// The program that was launched.
        program: String,
        /// The OS-level reason.
        reason: String,
    },

    /// Waiting on the child process failed.
    #[error("wait error: {0}")]
    Wait(String),

    /// An I/O error occurred outside the cases above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, SandboxError>;
