//! Sandbox configuration.
//!
//! [`SandboxConfig`] controls the interpreter and the limits applied to every
//! session.  Sensible defaults are provided via the [`Default`]
//! implementation, and a builder-style API allows callers to customise
//! individual fields fluently.  The struct is also deserialisable so that it
//! can be embedded as a `[sandbox]` table in a TOML configuration file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Interpreter launch settings and resource limits for one sandbox session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter executable.  Resolved through `PATH` when not absolute.
    ///
    /// Default: **`python3`**.
    pub interpreter: PathBuf,

    /// Hard wall-clock deadline for one snippet, in milliseconds.
    ///
    /// Default: **5 000 ms**.
    pub timeout_ms: u64,

    /// Maximum bytes retained per output stream.  Anything beyond this is
    /// read and discarded.
    ///
    /// Default: **64 KiB**.
    pub max_output_bytes: usize,

    /// Address-space ceiling for the interpreter (`RLIMIT_AS`).
    ///
    /// Default: **512 MiB**.
    pub memory_limit_bytes: u64,

    /// Largest file the snippet may write (`RLIMIT_FSIZE`).
    ///
    /// Default: **1 MiB**.
    pub max_file_bytes: u64,

    /// Maximum open file descriptors (`RLIMIT_NOFILE`).
    ///
    /// Default: **64**.
    pub max_open_files: u64,

    /// Move the child into fresh network (and, when permitted, user)
    /// namespaces before exec.  Best effort; Linux only.
    ///
    /// Default: **true**.
    pub isolate_network: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            timeout_ms: 5000,
            max_output_bytes: 64 * 1024,
            memory_limit_bytes: 512 * 1024 * 1024,
            max_file_bytes: 1024 * 1024,
            max_open_files: 64,
            isolate_network: true,
        }
    }
}

impl SandboxConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-snippet deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Set the interpreter executable.
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Set the per-snippet deadline (in milliseconds).
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Set the per-stream output cap (in bytes).
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the address-space limit (in bytes).
    pub fn with_memory_limit_bytes(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Set the maximum size of any file the snippet writes (in bytes).
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    /// Set the open file descriptor limit.
    pub fn with_max_open_files(mut self, count: u64) -> Self {
        self.max_open_files = count;
        self
    }

    /// Enable or disable network namespace isolation.
    pub fn with_isolate_network(mut self, isolate: bool) -> Self {
        self.isolate_network = isolate;
        self
    }
}
