//! Pipeline orchestration.
//!
//! One run moves every command through
//! `Discover -> Filter -> Execute -> (ContainerVerify) -> Classify -> Report`.
//! Commands are independent; the [`Repository`] is the only shared mutable
//! state, so the execute stage may run on a bounded worker pool.
//!
//! Container verification happens in two places:
//!
//! - **targeted**, with [`ContainerMode::On`], for a failure that looks like
//!   a missing host tool (and, with `verify_slow`, for a success that ran
//!   close to its timeout);
//! - **batch**, whenever a tester is configured and not [`ContainerMode::Off`],
//!   when `failed / executed` reaches the auto threshold after the local
//!   pass.
//!
//! | Local    | Container verdict          | Final                               |
//! |----------|----------------------------|-------------------------------------|
//! | failed   | passed                     | successful, noted                   |
//! | failed   | failed / image unavailable | failed, container output noted      |
//! | any      | unverifiable               | local classification kept           |
//! | success  | failed                     | successful, noted                   |
//!
//! An interrupt stops new commands from starting; whatever was classified
//! so far is still flushed to the report sink.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use command_harvest_config::{Settings, append_exclusions};
use command_harvest_core::{
    Classification, ClassificationSnapshot, Command, CommandKey, CommandResult, IgnoreRuleSet,
    Repository,
};
use command_harvest_discovery::{DiscoveryOptions, ParserRegistry, ScanOutcome, scan_project};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::container::{ContainerTester, ContainerVerdict};
use crate::environment::ExecutionEnvironment;
use crate::error::{ExecutionError, Result};
use crate::executor::{ExecutionPolicy, Executor, SlowCommandLog, looks_like_missing_tool};
use crate::interrupt::{CancellationToken, EXIT_INTERRUPTED};
use crate::report::{ReportCollections, ReportSink};

/// When container verification may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerMode {
    /// Never.
    Off,
    /// Only the threshold-triggered batch re-verification.
    #[default]
    Auto,
    /// Targeted verification of suspicious results, plus the batch pass.
    On,
}

/// Parameters of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub discovery: DiscoveryOptions,
    pub policy: ExecutionPolicy,
    pub jobs: usize,
    /// Stop starting commands after a final-attempt timeout.
    pub strict: bool,
    pub container_mode: ContainerMode,
    /// Fraction of failed executed commands that triggers batch
    /// re-verification.
    pub auto_threshold: f64,
    pub verify_slow: bool,
    /// Ignore file that container-confirmed failures are appended to.
    pub exclusions_file: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_settings(root, &Settings::default())
    }

    pub fn from_settings(root: impl Into<PathBuf>, settings: &Settings) -> Self {
        let discovery = DiscoveryOptions::new(root)
            .with_max_depth(settings.max_depth)
            .with_include(settings.include.clone())
            .with_exclude(settings.exclude.clone());
        Self {
            discovery,
            policy: ExecutionPolicy::from_settings(settings),
            jobs: settings.jobs,
            strict: false,
            container_mode: ContainerMode::default(),
            auto_threshold: settings.container.auto_threshold,
            verify_slow: settings.container.verify_slow,
            exclusions_file: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.discovery.root
    }
}

/// Counts for one test pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    /// Commands actually run on the host.
    pub executed: usize,
    pub successful: usize,
    pub failed: usize,
    pub ignored: usize,
    /// Commands never classified because the run stopped early.
    pub untested: usize,
    pub interrupted: bool,
    /// Container verifications that could not reach a runtime.
    pub unverifiable: usize,
    /// Container verifications that produced a verdict on the command.
    pub container_verified: usize,
    /// Whether the failure threshold triggered batch re-verification.
    pub auto_container: bool,
    pub exclusions_added: usize,
    /// Command whose final attempt timed out in strict mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_timeout: Option<String>,
}

impl RunSummary {
    /// Process exit code: 130 when interrupted, 1 when anything failed,
    /// otherwise 0.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.failed > 0 || self.strict_timeout.is_some() {
            1
        } else {
            0
        }
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-pass bookkeeping shared by workers.
#[derive(Default)]
struct PassState {
    interrupted: AtomicBool,
    executed: AtomicUsize,
    unverifiable: AtomicUsize,
    container_verified: AtomicUsize,
    strict_timeout: Mutex<Option<String>>,
    verified: Mutex<HashSet<CommandKey>>,
    confirmed_broken: Mutex<Vec<String>>,
}

impl PassState {
    fn strict_stopped(&self) -> bool {
        locked(&self.strict_timeout).is_some()
    }
}

/// The harvesting and verification pipeline.
///
/// Exposes a narrow interface: [`scan`](Self::scan),
/// [`test`](Self::test) and [`classifications`](Self::classifications).
pub struct Pipeline {
    options: PipelineOptions,
    registry: ParserRegistry,
    ignore_rules: IgnoreRuleSet,
    executor: Executor,
    container: Option<ContainerTester>,
    repository: Arc<Repository>,
    cancel: CancellationToken,
    slow_log: Arc<SlowCommandLog>,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        let slow_log = Arc::new(SlowCommandLog::new());
        let executor = Executor::new(options.root(), options.policy.clone())
            .with_observer(slow_log.clone());
        Self {
            options,
            registry: ParserRegistry::with_builtin(),
            ignore_rules: IgnoreRuleSet::default(),
            executor,
            container: None,
            repository: Arc::new(Repository::new()),
            cancel: CancellationToken::new(),
            slow_log,
        }
    }

    pub fn with_registry(mut self, registry: ParserRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_ignore_rules(mut self, rules: IgnoreRuleSet) -> Self {
        self.ignore_rules = rules;
        self
    }

    pub fn with_container(mut self, tester: ContainerTester) -> Self {
        self.container = Some(tester);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_environment(mut self, environment: ExecutionEnvironment) -> Self {
        self.executor = self.executor.with_environment(environment);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn ignore_rules(&self) -> &IgnoreRuleSet {
        &self.ignore_rules
    }

    pub fn repository(&self) -> Arc<Repository> {
        Arc::clone(&self.repository)
    }

    /// Discovers and parses project files. Read-only.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Discovery`](crate::PipelineError::Discovery)
    /// when the root or a discovery glob is invalid.
    pub fn scan(&self) -> Result<ScanOutcome> {
        let outcome = scan_project(&self.options.discovery, &self.registry)?;
        info!(
            commands = outcome.commands.len(),
            files = outcome.files_scanned,
            parse_errors = outcome.parse_errors.len(),
            "Scan complete"
        );
        Ok(outcome)
    }

    /// Consistent copy of the current classifications.
    pub fn classifications(&self) -> ClassificationSnapshot {
        self.repository.snapshot()
    }

    /// Report collections for the current classifications.
    pub fn collections(&self, interrupted: bool) -> ReportCollections {
        ReportCollections::from_snapshot(&self.classifications(), interrupted)
    }

    /// Filters, executes and classifies `commands`.
    ///
    /// Classifications from any previous pass are cleared first. Each
    /// command is processed as a fresh copy.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkerPool`](crate::PipelineError::WorkerPool)
    /// if the worker pool cannot be built.
    pub fn test(&self, commands: &[Command]) -> Result<RunSummary> {
        self.test_with_sink(commands, None)
    }

    /// Like [`test`](Self::test), flushing reports to `sink` after the local
    /// pass and again after container verification.
    ///
    /// # Errors
    ///
    /// Returns worker-pool and report-writing failures.
    pub fn test_with_sink(
        &self,
        commands: &[Command],
        sink: Option<&dyn ReportSink>,
    ) -> Result<RunSummary> {
        self.repository.clear();
        self.repository.register_all(commands);
        self.slow_log.take();
        let state = PassState::default();

        self.local_pass(commands, &state)?;
        self.note_cancellation(&state);
        let interrupted = state.interrupted.load(Ordering::SeqCst);
        if let Some(sink) = sink {
            sink.write(&self.collections(interrupted))?;
        }

        let auto_container = !interrupted && !state.strict_stopped() && self.auto_verify(&state);
        self.note_cancellation(&state);
        let exclusions_added = self.update_exclusions(&state);

        let interrupted = state.interrupted.load(Ordering::SeqCst);
        if auto_container || interrupted {
            if let Some(sink) = sink {
                sink.write(&self.collections(interrupted))?;
            }
        }

        let snapshot = self.classifications();
        let summary = RunSummary {
            total: snapshot.all.len(),
            executed: state.executed.load(Ordering::SeqCst),
            successful: snapshot.successful.len(),
            failed: snapshot.failed.len(),
            ignored: snapshot.ignored.len(),
            untested: snapshot.untested().len(),
            interrupted,
            unverifiable: state.unverifiable.load(Ordering::SeqCst),
            container_verified: state.container_verified.load(Ordering::SeqCst),
            auto_container,
            exclusions_added,
            strict_timeout: locked(&state.strict_timeout).clone(),
        };
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            ignored = summary.ignored,
            interrupted = summary.interrupted,
            "Test pass complete"
        );
        Ok(summary)
    }

    /// Scans, tests and writes reports to `sink`.
    ///
    /// # Errors
    ///
    /// Propagates scan, worker-pool and report-writing failures.
    pub fn run(&self, sink: &dyn ReportSink) -> Result<(ScanOutcome, RunSummary)> {
        let outcome = self.scan()?;
        let summary = self.test_with_sink(&outcome.commands, Some(sink))?;
        Ok((outcome, summary))
    }

    fn local_pass(&self, commands: &[Command], state: &PassState) -> Result<()> {
        if self.options.jobs <= 1 {
            for command in commands {
                self.process_command(command.clone(), state);
            }
            return Ok(());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .build()?;
        pool.install(|| {
            commands
                .par_iter()
                .for_each(|command| self.process_command(command.clone(), state));
        });
        Ok(())
    }

    fn process_command(&self, command: Command, state: &PassState) {
        if self.cancel.is_cancelled() {
            state.interrupted.store(true, Ordering::SeqCst);
            return;
        }
        if state.strict_stopped() {
            return;
        }

        if let Some(rule) = self.ignore_rules.first_match(&command) {
            debug!(command = command.text(), rule = rule.source(), "Ignoring command");
            let reason = format!("matched ignore rule `{}`", rule.source());
            self.repository.mark_ignored(command, Some(reason));
            return;
        }

        state.executed.fetch_add(1, Ordering::SeqCst);
        debug!(command = command.text(), source = %command.source_label(), "Executing command");
        let result = if self.options.strict {
            match self.executor.run_strict(&command) {
                Ok(result) => result,
                Err(ExecutionError::Timeout { result, .. }) => {
                    warn!(command = command.text(), "Final attempt timed out in strict mode");
                    *locked(&state.strict_timeout) = Some(command.text().to_string());
                    *result
                }
            }
        } else {
            self.executor.run(&command)
        };

        let targeted = self.options.container_mode == ContainerMode::On
            && self.container.is_some()
            && if result.succeeded {
                self.options.verify_slow && self.slow_log.contains(&command)
            } else {
                looks_like_missing_tool(&command, &result)
            };
        let local = if result.succeeded {
            Classification::Successful
        } else {
            Classification::Failed
        };

        match (&self.container, targeted) {
            (Some(tester), true) => {
                self.mark_verified(&command, state);
                let verdict = tester.verify(&command);
                self.apply_verdict(command, result, local, verdict, state);
            }
            _ => self.mark(local, command, result, None),
        }
    }

    /// Batch re-verification of local failures once the failure ratio
    /// reaches the threshold. Returns whether it ran.
    fn auto_verify(&self, state: &PassState) -> bool {
        if self.options.container_mode == ContainerMode::Off {
            return false;
        }
        let Some(tester) = &self.container else {
            return false;
        };
        let executed = state.executed.load(Ordering::SeqCst);
        let failed = self.repository.failed();
        if executed == 0 || failed.is_empty() {
            return false;
        }
        let ratio = failed.len() as f64 / executed as f64;
        if ratio < self.options.auto_threshold {
            return false;
        }
        if !tester.is_available() {
            info!(ratio, "Failure threshold reached but no container runtime is available");
            return false;
        }

        info!(
            failed = failed.len(),
            executed,
            ratio,
            threshold = self.options.auto_threshold,
            "Failure threshold reached, re-verifying failures in containers"
        );
        let already = locked(&state.verified).clone();
        for entry in failed {
            if self.cancel.is_cancelled() {
                state.interrupted.store(true, Ordering::SeqCst);
                break;
            }
            if already.contains(&entry.command.key()) {
                continue;
            }
            let Some(result) = entry.result else {
                continue;
            };
            self.mark_verified(&entry.command, state);
            let verdict = tester.verify(&entry.command);
            self.apply_verdict(entry.command, result, Classification::Failed, verdict, state);
        }
        true
    }

    /// A cancel that lands while the last command runs is seen by no later
    /// command, so the pass records it here.
    fn note_cancellation(&self, state: &PassState) {
        if self.cancel.is_cancelled() {
            state.interrupted.store(true, Ordering::SeqCst);
        }
    }

    fn mark_verified(&self, command: &Command, state: &PassState) {
        locked(&state.verified).insert(command.key());
    }

    fn apply_verdict(
        &self,
        command: Command,
        mut result: CommandResult,
        local: Classification,
        verdict: ContainerVerdict,
        state: &PassState,
    ) {
        let summary = verdict.summary();
        debug!(command = command.text(), verdict = %summary, "Container verdict");
        match &verdict {
            ContainerVerdict::Passed { .. } => {
                state.container_verified.fetch_add(1, Ordering::SeqCst);
                result.notes.push(summary.clone());
                self.repository
                    .mark_successful_with_reason(command, result, Some(summary));
            }
            ContainerVerdict::Failed { output, .. }
            | ContainerVerdict::ImageUnavailable { output, .. } => {
                if verdict.command_failed() {
                    state.container_verified.fetch_add(1, Ordering::SeqCst);
                    if local == Classification::Failed {
                        locked(&state.confirmed_broken).push(command.text().to_string());
                    }
                }
                let output = output.trim();
                let note = if output.is_empty() {
                    summary.clone()
                } else {
                    format!("{summary}:\n{output}")
                };
                result.notes.push(note);
                self.mark(local, command, result, Some(summary));
            }
            ContainerVerdict::Unverifiable { .. } => {
                state.unverifiable.fetch_add(1, Ordering::SeqCst);
                result.notes.push(summary.clone());
                self.mark(local, command, result, Some(summary));
            }
        }
    }

    fn mark(
        &self,
        classification: Classification,
        command: Command,
        result: CommandResult,
        reason: Option<String>,
    ) {
        match classification {
            Classification::Successful => {
                self.repository
                    .mark_successful_with_reason(command, result, reason)
            }
            Classification::Failed => self.repository.mark_failed_with_reason(command, result, reason),
            Classification::Ignored => self.repository.mark_ignored(command, reason),
        }
    }

    fn update_exclusions(&self, state: &PassState) -> usize {
        let Some(path) = &self.options.exclusions_file else {
            return 0;
        };
        let broken = locked(&state.confirmed_broken).clone();
        if broken.is_empty() {
            return 0;
        }
        match append_exclusions(path, &broken) {
            Ok(added) => added,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to update exclusion file");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_precedence() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.exit_code(), 0);
        summary.strict_timeout = Some("sleep 5".into());
        assert_eq!(summary.exit_code(), 1);
        summary.strict_timeout = None;
        summary.failed = 2;
        assert_eq!(summary.exit_code(), 1);
        summary.interrupted = true;
        assert_eq!(summary.exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_options_follow_settings() {
        let mut settings = Settings::default();
        settings.jobs = 3;
        settings.max_depth = 2;
        settings.exclude = vec!["legacy/**".into()];
        settings.container.auto_threshold = 0.25;
        settings.container.verify_slow = true;

        let options = PipelineOptions::from_settings("/project", &settings);
        assert_eq!(options.root(), Path::new("/project"));
        assert_eq!(options.jobs, 3);
        assert_eq!(options.discovery.max_depth, 2);
        assert_eq!(options.discovery.exclude, vec!["legacy/**".to_string()]);
        assert_eq!(options.auto_threshold, 0.25);
        assert!(options.verify_slow);
        assert_eq!(options.container_mode, ContainerMode::Auto);
        assert!(!options.strict);
    }

    #[test]
    fn test_empty_input_runs_nothing() {
        let pipeline = Pipeline::new(PipelineOptions::new("/nonexistent"));
        let summary = pipeline.test(&[]).unwrap();
        assert_eq!(summary, RunSummary::default());
    }
}
