//! Sandbox execution engine.
//!
//! [`SandboxEngine`] is the production [`SnippetExecutor`].  Each call to
//! [`SnippetExecutor::execute`] runs the full session protocol:
//!
//! 1. Create a fresh [`SandboxSession`] (workspace + snippet file).
//! 2. Spawn the interpreter inside it under pre-exec limits.
//! 3. Drain stdout/stderr on their own tasks, bounded.
//! 4. Wait for exit or the deadline, killing the process group either way.
//! 5. Close the session (reap, delete workspace).
//!
//! Every failure along the way is folded into the returned
//! [`ExecutionOutcome`]; nothing is propagated to the caller.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::capture::{CapturedStream, capture};
use crate::config::SandboxConfig;
use crate::error::Result;
use crate::outcome::{ExecutionOutcome, ExecutionStatus};
use crate::session::{SandboxSession, SessionExit};

/// How long to keep draining pipes after the process group is dead.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Anything that can run one snippet and report how it went.
///
/// Implementations must never panic or return early without an outcome;
/// the orchestrator relies on exactly one outcome per call.
#[async_trait]
pub trait SnippetExecutor: Send + Sync {
    /// Execute `source` and return its outcome.
    async fn execute(&self, source: &str) -> ExecutionOutcome;
}

/// Runs snippets in ephemeral process sandboxes.
#[derive(Debug, Clone)]
pub struct SandboxEngine {
    config: SandboxConfig,
    /// Concrete interpreter binary, resolved on first use.
    interpreter: OnceCell<PathBuf>,
}

impl SandboxEngine {
    /// Create an engine with the given configuration.  No process is
    /// started until the first snippet runs.
    pub fn new(config: SandboxConfig) -> Self {
        tracing::info!(
            interpreter = %config.interpreter.display(),
            timeout_ms = config.timeout_ms,
            "sandbox engine initialized"
        );
        Self {
            config,
            interpreter: OnceCell::new(),
        }
    }

    /// Return a reference to the current [`SandboxConfig`].
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The interpreter binary the engine launches, resolving it on the
    /// first call.  The probe is bounded by the per-snippet deadline.
    pub async fn interpreter(&self) -> &Path {
        self.interpreter
            .get_or_init(|| resolve_interpreter(&self.config.interpreter, self.config.timeout()))
            .await
    }

    /// Spawn, drain, and wait inside an already created session.
    async fn run(&self, session: &mut SandboxSession, started: Instant) -> Result<ExecutionOutcome> {
        let interpreter = self.interpreter().await;
        let (stdout, stderr) = session.spawn(interpreter, &self.config)?;

        let limit = self.config.max_output_bytes;
        let stdout_task = tokio::spawn(capture(stdout, limit));
        let stderr_task = tokio::spawn(capture(stderr, limit));

        let exit = session.wait().await?;
        let elapsed = started.elapsed();

        let stdout = join_capture(stdout_task).await;
        let stderr = join_capture(stderr_task).await;

        let status = match exit {
            SessionExit::TimedOut => ExecutionStatus::TimedOut,
            SessionExit::Exited(status) => classify_exit(status),
        };

        Ok(ExecutionOutcome {
            status,
            stdout,
            stderr,
            elapsed,
            workspace: Some(session.workspace().to_path_buf()),
        })
    }
}

#[async_trait]
impl SnippetExecutor for SandboxEngine {
    async fn execute(&self, source: &str) -> ExecutionOutcome {
        let started = Instant::now();

        let mut session = match SandboxSession::create(source, &self.config) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "failed to create sandbox session");
                return ExecutionOutcome::fault(e.to_string(), started.elapsed(), None);
            }
        };

        let result = self.run(&mut session, started).await;
        let session_id = session.id();
        let workspace = session.close().await;

        match result {
            Ok(outcome) => {
                tracing::debug!(
                    session = %session_id,
                    status = %outcome.status,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "sandbox run finished"
                );
                outcome
            }
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "sandbox run failed");
                ExecutionOutcome::fault(e.to_string(), started.elapsed(), Some(workspace))
            }
        }
    }
}

/// Wait for a capture task, giving up after [`DRAIN_GRACE`].
///
/// A descendant that escaped the process group can hold a pipe open; the
/// stream is then reported as truncated instead of blocking the session.
async fn join_capture(mut task: JoinHandle<CapturedStream>) -> CapturedStream {
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "output capture task failed");
            CapturedStream {
                truncated: true,
                ..CapturedStream::default()
            }
        }
        Err(_) => {
            task.abort();
            CapturedStream {
                truncated: true,
                ..CapturedStream::default()
            }
        }
    }
}

/// Map a process exit status to an [`ExecutionStatus`].
fn classify_exit(status: ExitStatus) -> ExecutionStatus {
    if let Some(code) = status.code() {
        return if code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::NonZeroExit(code)
        };
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecutionStatus::Signaled(signal);
        }
    }

    ExecutionStatus::Fault(format!("unrecognised exit status: {status}"))
}

/// Find the real interpreter binary behind `program`.
///
/// Launchers such as version-manager shims or virtualenv wrappers depend on
/// environment variables the sandbox clears, so the interpreter is asked for
/// its own `sys.executable` once, with the host environment.  A probe that
/// fails or outlives `limit` falls back to a plain `PATH` lookup, then to
/// `program` unchanged.
async fn resolve_interpreter(program: &Path, limit: Duration) -> PathBuf {
    let probe = tokio::process::Command::new(program)
        .args(["-I", "-c", "import sys; print(sys.executable)"])
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(limit, probe).await {
        Ok(Ok(output)) => {
            let executable = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            if output.status.success() && !executable.is_empty() {
                tracing::debug!(interpreter = %executable, "interpreter resolved");
                return PathBuf::from(executable);
            }
        }
        Ok(Err(e)) => tracing::debug!(program = %program.display(), error = %e, "interpreter probe failed"),
        Err(_) => tracing::warn!(
            program = %program.display(),
            limit_ms = limit.as_millis() as u64,
            "interpreter probe timed out"
        ),
    }
    resolve_program(program).unwrap_or_else(|| program.to_path_buf())
}

/// Resolve a bare program name against the host `PATH`.
///
/// Absolute or relative paths containing a separator are returned as-is.
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return Some(program.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
