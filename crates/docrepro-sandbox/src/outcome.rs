//! Execution outcome types.
//!
//! Every call into the sandbox produces exactly one [`ExecutionOutcome`].
//! Failures are values here, never errors.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CapturedStream;

/// How the sandboxed process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum ExecutionStatus {
    /// The interpreter exited with status 0.
    Success,
    /// The interpreter exited with a non-zero status.
    NonZeroExit(i32),
    /// The interpreter was terminated by a signal it did not ask for
    /// (segfault, OOM kill, CPU rlimit).
    Signaled(i32),
    /// The wall-clock deadline expired and the process group was killed.
    TimedOut,
    /// The sandbox itself failed (workspace, spawn, wait).  The snippet may
    /// never have run.
    Fault(String),
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::NonZeroExit(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Fault(reason) => write!(f, "sandbox fault: {reason}"),
        }
    }
}

/// Result of running one snippet inside one [`SandboxSession`](crate::SandboxSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Exit classification.
    pub status: ExecutionStatus,
    /// Captured standard output (bounded).
    pub stdout: CapturedStream,
    /// Captured standard error (bounded).
    pub stderr: CapturedStream,
    /// Wall-clock time from spawn to reap.
    pub elapsed: Duration,
    /// Where the session's workspace lived.  The directory no longer exists
    /// by the time the outcome is returned; the path is kept for auditing.
    pub workspace: Option<PathBuf>,
}

impl ExecutionOutcome {
    /// Build an outcome for a session that failed before or while running.
    pub fn fault(reason: impl Into<String>, elapsed: Duration, workspace: Option<PathBuf>) -> Self {
        Self {
            status: ExecutionStatus::Fault(reason.into()),
            stdout: CapturedStream::default(),
            stderr: CapturedStream::default(),
            elapsed,
            workspace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        assert_eq!(ExecutionStatus::Success.to_string(), "success");
        assert_eq!(ExecutionStatus::NonZeroExit(1).to_string(), "exit code 1");
        assert_eq!(ExecutionStatus::Signaled(9).to_string(), "killed by signal 9");
        assert_eq!(ExecutionStatus::TimedOut.to_string(), "timed out");
        assert_eq!(
            ExecutionStatus::Fault("no interpreter".into()).to_string(),
            "sandbox fault: no interpreter"
        );
    }

    #[test]
    fn fault_outcome_has_empty_streams() {
        let outcome = ExecutionOutcome::fault("boom", Duration::ZERO, None);
        assert_eq!(outcome.status, ExecutionStatus::Fault("boom".into()));
        assert!(outcome.stdout.is_empty());
        assert!(outcome.stderr.is_empty());
        assert!(outcome.workspace.is_none());
    }
}
