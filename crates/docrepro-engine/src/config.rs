//! Engine configuration.
//!
//! [`EngineConfig`] gathers every tunable the pipeline recognises.  It is
//! loaded once (from TOML or built in code), validated, and then shared
//! immutably by the [`Orchestrator`](crate::Orchestrator).
//!
//! ```toml
//! max_snippets = 10
//! max_total_ms = 30000
//! workers = 2
//!
//! [languages]
//! python = ["python", "py"]
//!
//! [sandbox]
//! timeout_ms = 2000
//!
//! [[classification]]
//! pattern = "^ModuleNotFoundError"
//! tier = "partial"
//! label = "missing module"
//! ```

use std::path::Path;
use std::time::Duration;

use docrepro_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::extract::LanguageTags;
use crate::safety::SafetyPolicy;
use crate::score::{ClassificationRule, Classifier, default_rules};

/// Top-level configuration for scoring one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of snippets processed per artifact.  Further snippets
    /// are scored as budget exceeded.
    ///
    /// Default: **25**.
    pub max_snippets: usize,

    /// Aggregate wall-clock budget per artifact, in milliseconds.
    ///
    /// Default: **60 000 ms**.
    pub max_total_ms: u64,

    /// Size of the sandbox worker pool.
    ///
    /// Default: **4**.
    pub workers: usize,

    /// Fence tags treated as Python.
    pub languages: LanguageTags,

    /// Per-snippet sandbox settings.
    pub sandbox: SandboxConfig,

    /// Static analysis rules.
    pub safety: SafetyPolicy,

    /// Ordered failure classification table.
    pub classification: Vec<ClassificationRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_snippets: 25,
            max_total_ms: 60_000,
            workers: 4,
            languages: LanguageTags::default(),
            sandbox: SandboxConfig::default(),
            safety: SafetyPolicy::default(),
            classification: default_rules(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.  Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_snippets == 0 {
            return Err(invalid("max_snippets", "must be at least 1"));
        }
        if self.max_total_ms == 0 {
            return Err(invalid("max_total_ms", "must be greater than zero"));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.sandbox.timeout_ms == 0 {
            return Err(invalid("sandbox.timeout_ms", "must be greater than zero"));
        }
        if self.sandbox.max_output_bytes == 0 {
            return Err(invalid("sandbox.max_output_bytes", "must be greater than zero"));
        }
        if self.sandbox.interpreter.as_os_str().is_empty() {
            return Err(invalid("sandbox.interpreter", "must not be empty"));
        }
        if self.languages.python.is_empty() && self.languages.console.is_empty() {
            return Err(invalid("languages", "at least one fence tag is required"));
        }
        Classifier::new(&self.classification)?;
        Ok(())
    }

    /// The aggregate budget as a [`Duration`].
    pub fn total_budget(&self) -> Duration {
        Duration::from_millis(self.max_total_ms)
    }

    /// Set the snippet cap.
    pub fn with_max_snippets(mut self, count: usize) -> Self {
        self.max_snippets = count;
        self
    }

    /// Set the aggregate budget (in milliseconds).
    pub fn with_max_total_ms(mut self, ms: u64) -> Self {
        self.max_total_ms = ms;
        self
    }

    /// Set the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Replace the sandbox configuration.
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Replace the safety policy.
    pub fn with_safety(mut self, safety: SafetyPolicy) -> Self {
        self.safety = safety;
        self
    }

    /// Replace the classification table.
    pub fn with_classification(mut self, rules: Vec<ClassificationRule>) -> Self {
        self.classification = rules;
        self
    }
}

fn invalid(field: &str, reason: &str) -> EngineError {
    EngineError::InvalidConfig {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}
