use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use command_harvest_config::{
    ContainerSettings, DEFAULT_IGNORE_FILE, DEFAULT_PROFILES_FILE, Settings, append_exclusions,
    load_container_profiles_or_empty, load_ignore_file_or_empty,
};
use command_harvest_core::{ContainerProfiles, IgnoreRuleSet, format_seconds};
use command_harvest_discovery::{ParserRegistry, scan_project};
use command_harvest_runner::{
    CancellationToken, ContainerMode, ContainerTester, ContainerVerdict, DirectoryReportSink,
    DockerRuntime, ExecutionEnvironment, Pipeline, PipelineError, PipelineOptions, RunSummary,
    failing_commands, install_sigint_handler, regenerate_markdown,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for configuration and usage errors.
const EXIT_USAGE: i32 = 2;

/// Default report directory name under the project root.
const DEFAULT_OUTPUT_DIR: &str = ".cmd-harvest";

/// CLI-specific output format enum with clap argument parsing support.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ScanFormat {
    Json,
    Table,
}

#[derive(Debug, Parser)]
#[command(name = "cmd-harvest", version)]
#[command(about = "Harvest runnable commands from a project and verify they work")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List candidate commands without running them.
    Scan(ScanArgs),
    /// Scan, run, classify and report every candidate command.
    Test(TestArgs),
    /// Run command texts inside containers.
    ContainerTest(ContainerTestArgs),
    /// Regenerate the Markdown reports from a results.json.
    Report(ReportArgs),
}

/// Discovery and configuration flags shared by `scan` and `test`.
#[derive(Debug, Args)]
struct ProjectArgs {
    /// Project root to scan.
    path: PathBuf,
    /// Settings file (default: .cmd-harvest.yml in the project root).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore file (default: .cmd-harvest-ignore in the project root, when present).
    #[arg(long)]
    ignore_file: Option<PathBuf>,
    /// Only scan files matching this glob. Repeatable.
    #[arg(long = "include")]
    include: Vec<String>,
    /// Skip files or directories matching this glob. Repeatable.
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    /// Maximum directory depth below the project root.
    #[arg(long)]
    max_depth: Option<usize>,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[command(flatten)]
    project: ProjectArgs,
    /// Output format.
    #[arg(long, default_value = "table")]
    format: ScanFormat,
}

#[derive(Debug, Args)]
struct TestArgs {
    #[command(flatten)]
    project: ProjectArgs,
    /// Per-attempt timeout in seconds.
    #[arg(long)]
    timeout: Option<f64>,
    /// Retries after a failed attempt.
    #[arg(long)]
    retries: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    #[arg(long)]
    retry_delay_ms: Option<u64>,
    /// Multiplier applied to the retry delay after each retry.
    #[arg(long)]
    backoff: Option<f64>,
    /// Number of commands executed in parallel.
    #[arg(long)]
    jobs: Option<usize>,
    /// Container profile file (default: .cmd-harvest-containers.yml in the project root).
    #[arg(long)]
    container_profiles: Option<PathBuf>,
    /// Verify missing-tool failures in containers as they happen.
    #[arg(long, conflicts_with = "no_container")]
    container: bool,
    /// Never use containers, not even after many failures.
    #[arg(long)]
    no_container: bool,
    /// Append container-confirmed failures to the ignore file.
    #[arg(long)]
    update_exclusions: bool,
    /// Report directory (default: <PATH>/.cmd-harvest).
    #[arg(long)]
    output: Option<PathBuf>,
    /// Stop starting commands after the first final-attempt timeout.
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Args)]
struct ContainerTestArgs {
    /// Command texts to run.
    #[arg(required = true)]
    commands: Vec<String>,
    /// Project root mounted into the containers.
    #[arg(long, default_value = ".")]
    project: PathBuf,
    /// Settings file (default: .cmd-harvest.yml in the project root).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Container profile file (default: .cmd-harvest-containers.yml in the project root).
    #[arg(long)]
    container_profiles: Option<PathBuf>,
    /// Append failing commands to the ignore file.
    #[arg(long)]
    update_exclusions: bool,
    /// Ignore file updated by --update-exclusions.
    #[arg(long)]
    ignore_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Directory holding results.json.
    dir: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Scan(args) => run_scan(args),
        Command::Test(args) => run_test(args),
        Command::ContainerTest(args) => run_container_test(args),
        Command::Report(args) => run_report(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(EXIT_USAGE);
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

fn load_settings(root: &Path, explicit: Option<&Path>) -> Result<Settings, String> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Settings::find_in(root),
    };
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading settings");
            Settings::load(&path).map_err(|err| err.to_string())
        }
        None => Ok(Settings::default()),
    }
}

fn project_settings(project: &ProjectArgs) -> Result<Settings, String> {
    if !project.path.is_dir() {
        return Err(format!(
            "Project path '{}' is not a directory",
            project.path.display()
        ));
    }
    let mut settings = load_settings(&project.path, project.config.as_deref())?;
    if !project.include.is_empty() {
        settings.include = project.include.clone();
    }
    if !project.exclude.is_empty() {
        settings.exclude.extend(project.exclude.iter().cloned());
    }
    if let Some(depth) = project.max_depth {
        settings.max_depth = depth;
    }
    Ok(settings)
}

/// Path of the ignore file: explicit, else the project default.
fn ignore_file_path(root: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.join(DEFAULT_IGNORE_FILE))
}

/// Malformed or unreadable files degrade to an empty rule set.
fn load_ignore_rules(root: &Path, explicit: Option<&Path>) -> IgnoreRuleSet {
    let path = ignore_file_path(root, explicit);
    if explicit.is_none() && !path.is_file() {
        return IgnoreRuleSet::default();
    }
    load_ignore_file_or_empty(&path)
}

fn load_profiles(root: &Path, explicit: Option<&Path>) -> ContainerProfiles {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.join(DEFAULT_PROFILES_FILE));
    if explicit.is_none() && !path.is_file() {
        return ContainerProfiles::default();
    }
    load_container_profiles_or_empty(&path)
}

fn docker_tester(
    root: &Path,
    profiles: ContainerProfiles,
    settings: &ContainerSettings,
) -> ContainerTester {
    // Bind mounts need an absolute host path.
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    ContainerTester::new(Arc::new(DockerRuntime::default()), profiles, root, settings)
}

// ----------------------------------------------------------------------------
// scan
// ----------------------------------------------------------------------------

fn run_scan(args: ScanArgs) -> Result<i32, String> {
    let settings = project_settings(&args.project)?;
    let root = &args.project.path;
    let rules = load_ignore_rules(root, args.project.ignore_file.as_deref());
    let options = PipelineOptions::from_settings(root, &settings);
    let outcome = scan_project(&options.discovery, &ParserRegistry::with_builtin())
        .map_err(|err| err.to_string())?;

    match args.format {
        ScanFormat::Json => {
            let commands: Vec<serde_json::Value> = outcome
                .commands
                .iter()
                .map(|command| {
                    let mut value = serde_json::json!(command);
                    value["ignored_by"] =
                        serde_json::json!(rules.first_match(command).map(|rule| rule.source()));
                    value
                })
                .collect();
            let raw = serde_json::to_string_pretty(&serde_json::json!({
                "files_scanned": outcome.files_scanned,
                "commands": commands,
                "parse_errors": &outcome.parse_errors,
            }))
            .map_err(|err| format!("Failed to serialize scan result: {err}"))?;
            println!("{raw}");
        }
        ScanFormat::Table => {
            println!("{:<8} {:<22} {:<28} COMMAND", "STATUS", "KIND", "SOURCE");
            for command in &outcome.commands {
                let status = if rules.should_ignore(command) {
                    "ignored"
                } else {
                    "run"
                };
                println!(
                    "{:<8} {:<22} {:<28} {}",
                    status,
                    command.kind,
                    command.source_label(),
                    command.text()
                );
            }
            println!(
                "\n{} command(s) from {} file(s).",
                outcome.commands.len(),
                outcome.files_scanned
            );
        }
    }

    for failure in &outcome.parse_errors {
        eprintln!(
            "warning: {} ({}): {}",
            failure.file.display(),
            failure.parser,
            failure.message
        );
    }
    Ok(0)
}

// ----------------------------------------------------------------------------
// test
// ----------------------------------------------------------------------------

fn run_test(args: TestArgs) -> Result<i32, String> {
    let mut settings = project_settings(&args.project)?;
    if let Some(timeout) = args.timeout {
        settings.timeout_secs = timeout;
    }
    if let Some(retries) = args.retries {
        settings.retries = retries;
    }
    if let Some(delay) = args.retry_delay_ms {
        settings.retry_delay_ms = delay;
    }
    if let Some(backoff) = args.backoff {
        settings.backoff_multiplier = backoff;
    }
    if let Some(jobs) = args.jobs {
        settings.jobs = jobs;
    }
    settings.validate().map_err(|err| err.to_string())?;

    let root = args.project.path.clone();
    let ignore_path = ignore_file_path(&root, args.project.ignore_file.as_deref());
    let rules = load_ignore_rules(&root, args.project.ignore_file.as_deref());

    let mut options = PipelineOptions::from_settings(&root, &settings);
    options.strict = args.strict;
    options.container_mode = if args.container {
        ContainerMode::On
    } else if args.no_container {
        ContainerMode::Off
    } else {
        ContainerMode::Auto
    };
    if args.update_exclusions {
        options.exclusions_file = Some(ignore_path);
    }

    if let Err(err) = install_sigint_handler() {
        warn!(error = %err, "Could not install interrupt handler");
    }

    let mut pipeline = Pipeline::new(options.clone())
        .with_ignore_rules(rules)
        .with_cancellation(CancellationToken::sigint())
        .with_environment(ExecutionEnvironment::for_project(&root));
    if options.container_mode != ContainerMode::Off {
        let profiles = load_profiles(&root, args.container_profiles.as_deref());
        pipeline = pipeline.with_container(docker_tester(&root, profiles, &settings.container));
    }

    let output = args
        .output
        .unwrap_or_else(|| root.join(DEFAULT_OUTPUT_DIR));
    let sink = DirectoryReportSink::new(&output);

    let (scan, summary) = match pipeline.run(&sink) {
        Ok(done) => done,
        Err(err @ PipelineError::Discovery(_)) => {
            return Err(err.to_string());
        }
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(1);
        }
    };

    for failure in &scan.parse_errors {
        eprintln!(
            "warning: {} ({}): {}",
            failure.file.display(),
            failure.parser,
            failure.message
        );
    }
    print_summary(&summary, &output);
    Ok(summary.exit_code())
}

fn print_summary(summary: &RunSummary, output: &Path) {
    println!(
        "{} command(s): {} working, {} to fix, {} ignored, {} untested.",
        summary.total, summary.successful, summary.failed, summary.ignored, summary.untested
    );
    if summary.auto_container {
        println!("Failure rate reached the threshold; failures were re-verified in containers.");
    }
    if summary.container_verified > 0 {
        println!("{} command(s) verified in containers.", summary.container_verified);
    }
    if summary.unverifiable > 0 {
        println!(
            "{} container verification(s) could not reach a runtime.",
            summary.unverifiable
        );
    }
    if summary.exclusions_added > 0 {
        println!(
            "Added {} container-confirmed failure(s) to the ignore file.",
            summary.exclusions_added
        );
    }
    if let Some(command) = &summary.strict_timeout {
        println!("Stopped after `{command}` timed out (--strict).");
    }
    if summary.interrupted {
        println!("Interrupted; reports hold partial results.");
    }
    println!("Reports written to '{}'.", output.display());
}

// ----------------------------------------------------------------------------
// container-test
// ----------------------------------------------------------------------------

fn run_container_test(args: ContainerTestArgs) -> Result<i32, String> {
    let root = args.project.clone();
    let settings = load_settings(&root, args.config.as_deref())?;
    let profiles = load_profiles(&root, args.container_profiles.as_deref());
    let tester = docker_tester(&root, profiles, &settings.container);

    if !tester.is_available() {
        eprintln!("error: no container runtime available; nothing was verified");
        return Ok(1);
    }

    let outcomes = tester.batch_test(&args.commands);
    for outcome in &outcomes {
        let label = match &outcome.verdict {
            ContainerVerdict::Passed { .. } => "PASS",
            ContainerVerdict::Failed { .. } => "FAIL",
            ContainerVerdict::ImageUnavailable { .. } => "IMAGE",
            ContainerVerdict::Unverifiable { .. } => "SKIP",
        };
        println!("{label:<6} {} [{}]", outcome.command, outcome.image);
        if !outcome.verdict.passed() && !outcome.verdict.output().trim().is_empty() {
            for line in outcome.verdict.output().trim().lines() {
                println!("       {line}");
            }
        }
    }

    let failing = failing_commands(&outcomes);
    if args.update_exclusions && !failing.is_empty() {
        let path = ignore_file_path(&root, args.ignore_file.as_deref());
        let added = append_exclusions(&path, &failing).map_err(|err| err.to_string())?;
        println!("Added {added} rule(s) to '{}'.", path.display());
    }

    let passed = outcomes.iter().filter(|o| o.verdict.passed()).count();
    println!(
        "{passed}/{} passed in containers (timeout {}s).",
        outcomes.len(),
        format_seconds(settings.container.timeout_secs)
    );
    Ok(if passed == outcomes.len() { 0 } else { 1 })
}

// ----------------------------------------------------------------------------
// report
// ----------------------------------------------------------------------------

fn run_report(args: ReportArgs) -> Result<i32, String> {
    let collections = regenerate_markdown(&args.dir).map_err(|err| err.to_string())?;
    println!(
        "Regenerated reports in '{}': {} to fix, {} working.",
        args.dir.display(),
        collections.to_fix.len(),
        collections.working.len()
    );
    Ok(0)
}
