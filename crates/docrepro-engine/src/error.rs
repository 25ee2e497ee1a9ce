//! Engine error types.
//!
//! [`EngineError`] is only returned while building an engine: loading and
//! validating configuration, compiling the classification table, and
//! initialising the Python grammar.  Scoring a document never fails; every
//! per-snippet problem is expressed as a score.

use std::path::PathBuf;

/// Unified error type for the docrepro engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- Configuration ------------------------------------------------------
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// The file that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration text is not valid TOML for [`EngineConfig`](crate::EngineConfig).
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A configuration value is out of range.
    #[error("invalid config value `{field}`: {reason}")]
    InvalidConfig {
        /// Dotted path of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    // -- Classification -----------------------------------------------------
    /// A classification rule's pattern is not a valid regex.
    #[error("invalid classification pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The pattern as written in the configuration.
        pattern: String,
        /// The regex compiler's message.
        reason: String,
    },

    // -- Analysis -----------------------------------------------------------
    /// The Python grammar could not be loaded into the parser.
    #[error("parser initialisation failed: {0}")]
    Parser(String),

    // -- Reporting ----------------------------------------------------------
    /// A report could not be serialised.
    #[error("failed to serialise report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;
