//! Scoped sandbox session.
//!
//! A [`SandboxSession`] is the lifecycle wrapper for exactly one execution
//! attempt.  It owns:
//!
//! - a freshly created temporary workspace whose only file is the snippet,
//! - the child interpreter process, which leads its own process group,
//! - the wall-clock deadline.
//!
//! # Teardown
//!
//! ```text
//! create  -->  spawn  -->  wait  -->  close
//!    \           \          \
//!     `-----------`----------`---->  drop
//! ```
//!
//! [`SandboxSession::close`] is the orderly path: kill the process group,
//! reap the child, remove the workspace.  If the session is dropped on any
//! other path (early return, cancelled future, panic) the [`Drop`] impl
//! kills the process group and the workspace is removed when the owned
//! [`TempDir`] drops right after it.  The child field is declared before the
//! workspace so the process is always signalled before its directory goes.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tempfile::TempDir;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::limits::ProcessLimits;

/// File name the snippet source is written to inside the workspace.
pub const SCRIPT_FILE: &str = "snippet.py";

/// How long to wait for a killed child to be reaped during teardown.
const REAP_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// Search path given to the child.  The interpreter itself is resolved
/// against the host `PATH` before spawning.
const CHILD_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How the child left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The process exited on its own before the deadline.
    Exited(ExitStatus),
    /// The deadline expired and the process group was killed.
    TimedOut,
}

/// One ephemeral, exclusively-owned execution context.
pub struct SandboxSession {
    id: Uuid,
    deadline: Instant,
    /// Running interpreter, if spawned.  Declared before `workspace`.
    child: Option<Child>,
    /// Process group id of the interpreter (equal to its pid).
    pgid: Option<i32>,
    /// Whether the process group has already been killed.
    group_killed: bool,
    workspace_path: PathBuf,
    workspace: Option<TempDir>,
}

impl SandboxSession {
    /// Create the workspace and materialise `source` as its sole file.
    ///
    /// The deadline starts counting now.
    pub fn create(source: &str, config: &SandboxConfig) -> Result<Self> {
        let id = Uuid::now_v7();
        let workspace = tempfile::Builder::new()
            .prefix(&format!("docrepro-{id}-"))
            .tempdir()
            .map_err(|e| SandboxError::Workspace {
                reason: format!("failed to create workspace: {e}"),
            })?;

        let script = workspace.path().join(SCRIPT_FILE);
        std::fs::write(&script, source).map_err(|e| SandboxError::Workspace {
            reason: format!("failed to write {}: {e}", script.display()),
        })?;

        let workspace_path = workspace.path().to_path_buf();
        tracing::debug!(session = %id, workspace = %workspace_path.display(), "sandbox session created");

        Ok(Self {
            id,
            deadline: Instant::now() + config.timeout(),
            child: None,
            pgid: None,
            group_killed: false,
            workspace_path,
            workspace: Some(workspace),
        })
    }

    /// Unique session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session's workspace directory.
    pub fn workspace(&self) -> &Path {
        &self.workspace_path
    }

    /// Launch `interpreter` on the snippet inside the workspace.
    ///
    /// Returns the child's stdout and stderr pipes for the caller to drain.
    pub fn spawn(
        &mut self,
        interpreter: &Path,
        config: &SandboxConfig,
    ) -> Result<(ChildStdout, ChildStderr)> {
        if self.child.is_some() {
            return Err(SandboxError::Spawn {
                program: interpreter.display().to_string(),
                reason: "session already has a running process".into(),
            });
        }

        let mut command = Command::new(interpreter);
        command
            // Isolated mode: no user site-packages, no PYTHON* variables,
            // no script directory on sys.path.  No bytecode written.
            .arg("-I")
            .arg("-B")
            .arg(SCRIPT_FILE)
            .current_dir(&self.workspace_path)
            .env_clear()
            .env("PATH", CHILD_PATH)
            .env("HOME", &self.workspace_path)
            .env("TMPDIR", &self.workspace_path)
            .env("LANG", "C.UTF-8")
            .env("LC_ALL", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        ProcessLimits::from_config(config).install(&mut command);

        let mut child = command.spawn().map_err(|e| SandboxError::Spawn {
            program: interpreter.display().to_string(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.pgid = child.id().and_then(|pid| i32::try_from(pid).ok());
        self.child = Some(child);

        tracing::debug!(session = %self.id, pgid = ?self.pgid, "sandbox process spawned");

        match (stdout, stderr) {
            (Some(out), Some(err)) => Ok((out, err)),
            _ => Err(SandboxError::Spawn {
                program: interpreter.display().to_string(),
                reason: "child pipes unavailable".into(),
            }),
        }
    }

    /// Wait for the child to exit or the deadline to pass.
    ///
    /// Either way the whole process group is killed before returning, so
    /// descendants the snippet left behind do not outlive the session.
    pub async fn wait(&mut self) -> Result<SessionExit> {
        let deadline = self.deadline;
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| SandboxError::Wait("no process has been spawned".into()))?;

        let waited = tokio::time::timeout_at(deadline, child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                self.kill_group();
                Ok(SessionExit::Exited(status))
            }
            Ok(Err(e)) => {
                self.kill_group();
                Err(SandboxError::Wait(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(session = %self.id, "sandbox deadline expired, killing process group");
                self.kill_group();
                self.reap().await;
                Ok(SessionExit::TimedOut)
            }
        }
    }

    /// Orderly teardown: kill and reap the process group, then delete the
    /// workspace.  Returns the path the workspace occupied.
    pub async fn close(mut self) -> PathBuf {
        self.kill_group();
        self.reap().await;

        if let Some(workspace) = self.workspace.take() {
            if let Err(e) = workspace.close() {
                tracing::warn!(
                    session = %self.id,
                    workspace = %self.workspace_path.display(),
                    error = %e,
                    "failed to remove sandbox workspace"
                );
            }
        }

        tracing::debug!(session = %self.id, "sandbox session closed");
        self.workspace_path.clone()
    }

    /// Reap the direct child, bounded by [`REAP_GRACE`].
    async fn reap(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
                tracing::warn!(session = %self.id, "sandbox process did not exit after kill");
            }
        }
    }

    /// Send `SIGKILL` to the whole process group (once).
    fn kill_group(&mut self) {
        if self.group_killed {
            return;
        }
        self.group_killed = true;

        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: killpg has no memory-safety preconditions.  The group
            // id is the child's own pid, set via `process_group(0)`.
            let _ = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        }

        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

impl Drop for SandboxSession {
    fn drop(&mut self) {
        // Orphaned children are reaped by tokio in the background; the
        // workspace is removed when the TempDir field drops after this.
        self.kill_group();
    }
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("id", &self.id)
            .field("workspace", &self.workspace_path)
            .field("pgid", &self.pgid)
            .finish()
    }
}
