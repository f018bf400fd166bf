//! Error types for configuration loading.
//!
//! Covers the failure modes of every declarative input: I/O, YAML, invalid
//! ignore rules and out-of-range settings.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or writing configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O failure.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parsing or serialization failure.
    #[error("YAML error in '{path}': {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A rule line failed to compile.
    #[error("invalid ignore rule at {path}:{line}: {source}")]
    InvalidRule {
        path: PathBuf,
        line: usize,
        #[source]
        source: command_harvest_core::IgnoreRuleError,
    },

    /// A setting holds a value outside its accepted range.
    #[error("invalid setting '{field}': {message}")]
    InvalidSetting { field: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::Yaml {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias for results with [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
