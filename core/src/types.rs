//! Command and execution result types.
//!
//! This module defines the value types that flow between pipeline stages.
//! They are designed for serialization with [`serde`] so that a test pass
//! can be persisted and read back by report tooling.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the persisted results contract (semver).
pub const RESULTS_CONTRACT_VERSION: &str = "1.0.0";

/// Metadata key holding a per-command timeout override in seconds.
pub const METADATA_TIMEOUT: &str = "timeout";

/// Metadata key holding an object of environment overrides.
pub const METADATA_ENV: &str = "env";

/// A candidate command harvested from a project file.
///
/// The command text is fixed at construction time and only readable through
/// [`text`](Command::text). Provenance fields can be attached with the
/// builder methods while the command is being extracted.
///
/// # Examples
///
/// ```
/// use command_harvest_core::Command;
///
/// let cmd = Command::new("make build", "make_target")
///     .with_description("Build everything")
///     .with_source_file("Makefile")
///     .with_metadata("target", "build");
///
/// assert_eq!(cmd.text(), "make build");
/// assert_eq!(cmd.kind, "make_target");
/// assert_eq!(cmd.metadata_str("target"), Some("build"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    text: String,
    /// Ecosystem tag (e.g. `make_target`, `npm_script`). Informational only.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    /// Directory the command runs in. `None` means the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Command {
    pub fn new(text: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: kind.into(),
            description: None,
            source_file: None,
            working_directory: None,
            metadata: BTreeMap::new(),
        }
    }

    /// The literal shell command string.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    pub fn with_working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns a metadata entry when it is a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Iterates over every string-valued metadata entry.
    pub fn string_metadata(&self) -> impl Iterator<Item = &str> {
        self.metadata.values().filter_map(Value::as_str)
    }

    /// Per-command timeout override in seconds, if declared and positive.
    pub fn timeout_override(&self) -> Option<f64> {
        self.metadata
            .get(METADATA_TIMEOUT)
            .and_then(Value::as_f64)
            .filter(|secs| *secs > 0.0)
    }

    /// Environment overrides declared under the `env` metadata object.
    ///
    /// Non-string values are skipped.
    pub fn env_overrides(&self) -> Vec<(String, String)> {
        let Some(Value::Object(map)) = self.metadata.get(METADATA_ENV) else {
            return Vec::new();
        };
        map.iter()
            .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
            .collect()
    }

    /// Resolves the directory to run in, falling back to `root`.
    pub fn resolve_working_directory(&self, root: &Path) -> PathBuf {
        match &self.working_directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }

    /// Identity used by the repository to decide whether two commands are
    /// the same entry.
    pub fn key(&self) -> CommandKey {
        CommandKey {
            text: self.text.clone(),
            source_file: self.source_file.clone(),
        }
    }

    /// Source file rendered for reports, or `-` when unknown.
    pub fn source_label(&self) -> String {
        self.source_file
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Identity of a command across pipeline stages: its text plus the file it
/// was harvested from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandKey {
    pub text: String,
    pub source_file: Option<PathBuf>,
}

/// Metadata for a single execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    /// One-based attempt number.
    pub attempt: u32,
    pub exit_code: Option<i32>,
    pub duration_seconds: f64,
    pub timed_out: bool,
    /// Backoff sleep that preceded this attempt.
    pub delay_before_seconds: f64,
}

/// Outcome of executing one command.
///
/// `error_message` is set only when the process could not be observed to
/// completion (timeout or spawn failure). In every other case `exit_code`,
/// `stdout` and `stderr` are authoritative.
///
/// # Examples
///
/// ```
/// use command_harvest_core::CommandResult;
///
/// let ok = CommandResult::completed(0, "built\n", "", 1.5);
/// assert!(ok.succeeded);
/// assert!(ok.error_message.is_none());
///
/// let late = CommandResult::timed_out(1.0, 1.0, "", "");
/// assert!(!late.succeeded);
/// assert_eq!(late.exit_code, None);
/// assert!(late.error_message.unwrap().contains("timed out after 1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub duration_seconds: f64,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptReport>,
    /// Free-form notes appended by later stages (e.g. container verification).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl CommandResult {
    /// A process that ran to completion with an observed exit code.
    pub fn completed(
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        duration_seconds: f64,
    ) -> Self {
        Self {
            succeeded: exit_code == 0,
            exit_code: Some(exit_code),
            duration_seconds,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error_message: None,
            attempts: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// A process killed after exceeding its deadline.
    pub fn timed_out(
        timeout_seconds: f64,
        duration_seconds: f64,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            succeeded: false,
            exit_code: None,
            duration_seconds,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error_message: Some(format!(
                "timed out after {}s",
                format_seconds(timeout_seconds)
            )),
            attempts: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// A process that could not be observed to completion for a reason
    /// other than timeout (spawn failure, wait failure, signal).
    pub fn launch_failed(message: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            succeeded: false,
            exit_code: None,
            duration_seconds,
            stdout: String::new(),
            stderr: String::new(),
            error_message: Some(message.into()),
            attempts: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.exit_code.is_none()
            && self
                .error_message
                .as_deref()
                .is_some_and(|msg| msg.starts_with("timed out after"))
    }

    /// Best available error text for reports: the error message, then
    /// stderr, then stdout.
    pub fn error_text(&self) -> String {
        if let Some(message) = &self.error_message {
            return message.clone();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        self.stdout.trim().to_string()
    }

    /// Combined stdout and stderr, trimmed.
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Renders whole seconds without a trailing `.0`.
pub fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 {
        format!("{}", seconds as u64)
    } else {
        format!("{seconds:.2}")
    }
}

/// Terminal bucket for a tested command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Successful,
    Failed,
    Ignored,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
            Self::Ignored => write!(f, "ignored"),
        }
    }
}
