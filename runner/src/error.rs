//! Error types for the runner crate.

use std::path::PathBuf;

use command_harvest_core::CommandResult;
use command_harvest_discovery::DiscoveryError;
use thiserror::Error;

/// Errors raised out of the execution engine in strict mode.
///
/// Outside strict mode every execution outcome, including timeouts and
/// spawn failures, is a [`CommandResult`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The final attempt exceeded its deadline.
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout {
        command: String,
        timeout_secs: f64,
        result: Box<CommandResult>,
    },
}

/// Errors from writing or reading report artifacts.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid results file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ReportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// Errors that stop a pipeline run as a whole.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
