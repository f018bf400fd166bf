//! Local command execution with deadlines, retries and backoff.
//!
//! Every command runs through `<shell> -c <text>` in its working directory,
//! in its own process group. [`Executor::run`] never fails: spawn errors and
//! timeouts come back as a failed [`CommandResult`]. [`Executor::run_strict`]
//! additionally surfaces a timeout on the final attempt as an
//! [`ExecutionError`].
//!
//! # Retry schedule
//!
//! A failed attempt is retried up to `retries` times. Retry `k` (zero-based)
//! sleeps `retry_delay * backoff_multiplier^k` first, so with a 10ms delay
//! and multiplier 2 the sleeps are 10ms, 20ms, 40ms and so on. A successful
//! attempt is never retried.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use command_harvest_config::{Settings, timeout_duration};
use command_harvest_core::{AttemptReport, Command, CommandResult};
use serde::Serialize;
use tracing::{debug, info};

use crate::environment::ExecutionEnvironment;
use crate::error::ExecutionError;
use crate::process::run_with_timeout;

/// Timeout, retry and shell configuration for local execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the timeout at which a successful run counts as slow.
    pub slow_fraction: f64,
    pub shell: String,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ExecutionPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: timeout_duration(settings.timeout_secs),
            retries: settings.retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            slow_fraction: settings.slow_fraction,
            shell: settings.shell.clone(),
        }
    }

    /// Sleep before zero-based retry `retry`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use command_harvest_runner::ExecutionPolicy;
    ///
    /// let policy = ExecutionPolicy {
    ///     retry_delay: Duration::from_millis(10),
    ///     backoff_multiplier: 2.0,
    ///     ..Default::default()
    /// };
    /// assert_eq!(policy.delay_before_retry(0), Duration::from_millis(10));
    /// assert_eq!(policy.delay_before_retry(2), Duration::from_millis(40));
    /// ```
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent).min(1e6);
        let micros = self.retry_delay.as_micros() as f64 * factor;
        Duration::from_micros(micros.round() as u64)
    }
}

/// Receives side-channel events from the executor.
pub trait ExecutionObserver: Send + Sync {
    /// A command succeeded but used at least `slow_fraction` of its timeout.
    fn on_slow_command(&self, command: &Command, result: &CommandResult, timeout: Duration);
}

/// A command flagged as slow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowCommand {
    pub command: Command,
    pub duration_seconds: f64,
    pub timeout_seconds: f64,
}

/// Collects slow-command events for later container verification.
#[derive(Debug, Default)]
pub struct SlowCommandLog {
    entries: Mutex<Vec<SlowCommand>>,
}

impl SlowCommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<SlowCommand> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn contains(&self, command: &Command) -> bool {
        let key = command.key();
        self.entries()
            .iter()
            .any(|entry| entry.command.key() == key)
    }

    /// Removes and returns every recorded entry.
    pub fn take(&self) -> Vec<SlowCommand> {
        std::mem::take(
            &mut *self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl ExecutionObserver for SlowCommandLog {
    fn on_slow_command(&self, command: &Command, result: &CommandResult, timeout: Duration) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SlowCommand {
                command: command.clone(),
                duration_seconds: result.duration_seconds,
                timeout_seconds: timeout.as_secs_f64(),
            });
    }
}

/// Runs commands on the host.
pub struct Executor {
    policy: ExecutionPolicy,
    root: PathBuf,
    environment: ExecutionEnvironment,
    observers: Vec<Arc<dyn ExecutionObserver>>,
}

impl Executor {
    /// An executor for commands of the project at `root`, with the
    /// virtualenv detected from the root.
    pub fn new(root: impl Into<PathBuf>, policy: ExecutionPolicy) -> Self {
        let root = root.into();
        let environment = ExecutionEnvironment::for_project(&root);
        Self {
            policy,
            root,
            environment,
            observers: Vec::new(),
        }
    }

    pub fn with_environment(mut self, environment: ExecutionEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Effective timeout for `command`: its `timeout` metadata, else the
    /// policy timeout.
    pub fn timeout_for(&self, command: &Command) -> Duration {
        command
            .timeout_override()
            .map(timeout_duration)
            .unwrap_or(self.policy.timeout)
    }

    /// Runs `command` with retries. Always returns a result.
    pub fn run(&self, command: &Command) -> CommandResult {
        let timeout = self.timeout_for(command);
        let mut attempts = Vec::new();
        let mut attempt = 1u32;
        let mut delay = Duration::ZERO;

        let mut result = loop {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let result = self.run_once(command, timeout);
            attempts.push(AttemptReport {
                attempt,
                exit_code: result.exit_code,
                duration_seconds: result.duration_seconds,
                timed_out: result.is_timeout(),
                delay_before_seconds: delay.as_secs_f64(),
            });

            if result.succeeded || attempt > self.policy.retries {
                break result;
            }
            delay = self.policy.delay_before_retry(attempt - 1);
            debug!(
                command = command.text(),
                attempt,
                exit_code = ?result.exit_code,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying"
            );
            attempt += 1;
        };
        result.attempts = attempts;

        if result.succeeded
            && result.duration_seconds >= self.policy.slow_fraction * timeout.as_secs_f64()
        {
            info!(
                command = command.text(),
                duration_secs = result.duration_seconds,
                timeout_secs = timeout.as_secs_f64(),
                "Command finished close to its timeout"
            );
            for observer in &self.observers {
                observer.on_slow_command(command, &result, timeout);
            }
        }
        result
    }

    /// Like [`run`](Self::run), but a timeout on the final attempt is an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Timeout`] carrying the full result when the
    /// last attempt was killed at its deadline.
    pub fn run_strict(&self, command: &Command) -> Result<CommandResult, ExecutionError> {
        let result = self.run(command);
        if result.attempts.last().is_some_and(|attempt| attempt.timed_out) {
            return Err(ExecutionError::Timeout {
                command: command.text().to_string(),
                timeout_secs: self.timeout_for(command).as_secs_f64(),
                result: Box::new(result),
            });
        }
        Ok(result)
    }

    fn run_once(&self, command: &Command, timeout: Duration) -> CommandResult {
        let workdir = command.resolve_working_directory(&self.root);
        let mut process = ProcessCommand::new(&self.policy.shell);
        process.arg("-c").arg(command.text()).current_dir(&workdir);
        self.environment.apply(&mut process, command);

        let start = Instant::now();
        match run_with_timeout(process, timeout) {
            Ok(output) if output.timed_out => CommandResult::timed_out(
                timeout.as_secs_f64(),
                output.duration.as_secs_f64(),
                output.stdout,
                output.stderr,
            ),
            Ok(output) => CommandResult::completed(
                output.exit_code.unwrap_or(-1),
                output.stdout,
                output.stderr,
                output.duration.as_secs_f64(),
            ),
            Err(err) => {
                debug!(command = command.text(), error = %err, "Failed to spawn command");
                CommandResult::launch_failed(
                    spawn_error_message(&self.policy.shell, &workdir, &err),
                    start.elapsed().as_secs_f64(),
                )
            }
        }
    }
}

fn spawn_error_message(shell: &str, workdir: &Path, err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound if !workdir.is_dir() => format!(
            "spawn failed: working directory {} not found",
            workdir.display()
        ),
        io::ErrorKind::NotFound => format!("spawn failed: shell `{shell}` not found"),
        io::ErrorKind::PermissionDenied => format!("spawn failed: permission denied: {err}"),
        _ => format!("spawn failed: {err}"),
    }
}

/// Heuristic for "the host lacks a tool" rather than "the command is broken".
///
/// True for exit code 127, a spawn failure naming a missing program, or an
/// output line that reports the command's program as not found.
///
/// # Examples
///
/// ```
/// use command_harvest_core::{Command, CommandResult};
/// use command_harvest_runner::looks_like_missing_tool;
///
/// let cmd = Command::new("pytest -q", "python_entry_point");
/// let result = CommandResult::completed(127, "", "sh: 1: pytest: not found\n", 0.01);
/// assert!(looks_like_missing_tool(&cmd, &result));
///
/// let result = CommandResult::completed(1, "", "2 tests failed\n", 3.0);
/// assert!(!looks_like_missing_tool(&cmd, &result));
/// ```
pub fn looks_like_missing_tool(command: &Command, result: &CommandResult) -> bool {
    if result.succeeded {
        return false;
    }
    if result.exit_code == Some(127) {
        return true;
    }
    if result.exit_code.is_none()
        && result
            .error_message
            .as_deref()
            .is_some_and(|message| message.starts_with("spawn failed") && message.contains("not found"))
    {
        return true;
    }

    let Some(program) = program_name(command.text()) else {
        return false;
    };
    result.combined_output().lines().any(|line| {
        let lower = line.to_ascii_lowercase();
        line.contains(program)
            && (lower.contains("command not found")
                || lower.contains("not found")
                || lower.contains("no such file or directory"))
    })
}

/// First word of a command that is not an environment assignment.
fn program_name(text: &str) -> Option<&str> {
    text.split_whitespace()
        .find(|word| !(word.contains('=') && !word.starts_with('=')))
}

#[cfg(all(test, unix))]
mod tests {
    use command_harvest_core::{METADATA_ENV, METADATA_TIMEOUT};

    use super::*;

    fn policy() -> ExecutionPolicy {
        ExecutionPolicy {
            timeout: Duration::from_secs(10),
            retries: 0,
            retry_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            slow_fraction: 0.8,
            shell: "sh".to_string(),
        }
    }

    fn executor(root: &Path, policy: ExecutionPolicy) -> Executor {
        Executor::new(root, policy).with_environment(ExecutionEnvironment::default())
    }

    // -----------------------------------------------------------------------
    // Single attempts
    // -----------------------------------------------------------------------

    #[test]
    fn test_success_and_failure_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), policy());

        let ok = exec.run(&Command::new("echo hello", "test"));
        assert!(ok.succeeded);
        assert_eq!(ok.exit_code, Some(0));
        assert_eq!(ok.stdout, "hello\n");
        assert!(ok.error_message.is_none());
        assert_eq!(ok.attempts.len(), 1);

        let failed = exec.run(&Command::new("echo broken >&2; exit 4", "test"));
        assert!(!failed.succeeded);
        assert_eq!(failed.exit_code, Some(4));
        assert_eq!(failed.stderr, "broken\n");
        assert!(failed.error_message.is_none());
    }

    #[test]
    fn test_timeout_yields_message_and_no_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            dir.path(),
            ExecutionPolicy {
                timeout: Duration::from_secs(1),
                ..policy()
            },
        );
        let result = exec.run(&Command::new("sleep 5", "test"));
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, None);
        assert!(result.error_message.as_deref().unwrap().contains("timed out after 1"));
        assert_eq!(result.attempts.len(), 1);
        assert!(result.attempts[0].timed_out);
        assert!(result.duration_seconds < 4.0);
    }

    #[test]
    fn test_metadata_timeout_overrides_policy() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), policy());
        let command = Command::new("sleep 5", "test").with_metadata(METADATA_TIMEOUT, 0.3);
        let result = exec.run(&command);
        assert!(result.is_timeout());
        assert_eq!(result.error_message.as_deref(), Some("timed out after 0.30s"));
    }

    #[test]
    fn test_oversized_metadata_timeout_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), policy());
        let command = Command::new("true", "test").with_metadata(METADATA_TIMEOUT, 1e20);
        assert_eq!(
            exec.timeout_for(&command),
            Duration::from_secs_f64(command_harvest_config::MAX_TIMEOUT_SECS)
        );
        assert!(exec.run(&command).succeeded);
    }

    #[test]
    fn test_working_directory_and_metadata_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let exec = executor(dir.path(), policy());
        let command = Command::new("basename \"$PWD\"; echo \"$GREETING\"", "test")
            .with_working_directory("sub")
            .with_metadata(METADATA_ENV, serde_json::json!({ "GREETING": "hi" }));
        let result = exec.run(&command);
        assert_eq!(result.stdout, "sub\nhi\n");
    }

    #[test]
    fn test_missing_working_directory_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), policy());
        let command = Command::new("true", "test").with_working_directory("gone");
        let result = exec.run(&command);
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, None);
        assert!(result.error_message.unwrap().contains("working directory"));
    }

    // -----------------------------------------------------------------------
    // Retries
    // -----------------------------------------------------------------------

    const SUCCEED_ON_THIRD: &str =
        "n=$(cat count 2>/dev/null || echo 0); n=$((n+1)); echo $n > count; [ $n -ge 3 ]";

    #[test]
    fn test_retries_until_success_with_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            dir.path(),
            ExecutionPolicy {
                retries: 2,
                ..policy()
            },
        );
        let result = exec.run(&Command::new(SUCCEED_ON_THIRD, "test"));
        assert!(result.succeeded);
        assert_eq!(result.attempts.len(), 3);
        let delays: Vec<_> = result
            .attempts
            .iter()
            .map(|attempt| attempt.delay_before_seconds)
            .collect();
        assert_eq!(delays, vec![0.0, 0.01, 0.02]);
        assert!(!result.attempts[0].timed_out);
        assert_eq!(result.attempts[1].exit_code, Some(1));
    }

    #[test]
    fn test_retries_exhausted_returns_last_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            dir.path(),
            ExecutionPolicy {
                retries: 1,
                ..policy()
            },
        );
        let result = exec.run(&Command::new(SUCCEED_ON_THIRD, "test"));
        assert!(!result.succeeded);
        assert_eq!(result.attempts.len(), 2);
    }

    #[test]
    fn test_success_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            dir.path(),
            ExecutionPolicy {
                retries: 3,
                ..policy()
            },
        );
        let result = exec.run(&Command::new("echo x >> runs", "test"));
        assert_eq!(result.attempts.len(), 1);
        let runs = std::fs::read_to_string(dir.path().join("runs")).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    // -----------------------------------------------------------------------
    // Strict mode and side channels
    // -----------------------------------------------------------------------

    #[test]
    fn test_run_strict_surfaces_final_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            dir.path(),
            ExecutionPolicy {
                timeout: Duration::from_millis(200),
                ..policy()
            },
        );
        let err = exec.run_strict(&Command::new("sleep 5", "test")).unwrap_err();
        let ExecutionError::Timeout { result, .. } = err;
        assert!(result.is_timeout());

        let ok = exec.run_strict(&Command::new("exit 2", "test")).unwrap();
        assert_eq!(ok.exit_code, Some(2));
    }

    #[test]
    fn test_slow_success_is_reported_to_observers() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(SlowCommandLog::new());
        let exec = executor(
            dir.path(),
            ExecutionPolicy {
                timeout: Duration::from_secs(10),
                slow_fraction: 0.01,
                ..policy()
            },
        )
        .with_observer(log.clone());

        let slow = Command::new("sleep 0.3", "test");
        let fast_failure = Command::new("sleep 0.3; exit 1", "test");
        exec.run(&slow);
        exec.run(&fast_failure);

        assert!(log.contains(&slow));
        assert!(!log.contains(&fast_failure));
        let taken = log.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].timeout_seconds, 10.0);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_missing_tool_detection_from_real_shell() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), policy());
        let command = Command::new("definitely-missing-tool-xyz --version", "test");
        let result = exec.run(&command);
        assert_eq!(result.exit_code, Some(127));
        assert!(looks_like_missing_tool(&command, &result));
    }

    #[test]
    fn test_program_name_skips_env_assignments() {
        assert_eq!(program_name("CI=1 FOO=bar pytest -q"), Some("pytest"));
        assert_eq!(program_name("make build"), Some("make"));
        assert_eq!(program_name("   "), None);
    }
}
