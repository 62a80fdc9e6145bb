//! Error types for standby-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected shape.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A mandatory key is absent or empty.
    #[error("missing mandatory config key '{0}'")]
    MissingKey(&'static str),

    /// A key is present but its value cannot be used.
    #[error("invalid value for config key '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors raised while reading an execution report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse report at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A backup report lacks one of `instance`, `database`, `mode`, `output`.
    #[error("backup report at {path} is missing '{field}'")]
    MissingField { path: PathBuf, field: &'static str },
}
