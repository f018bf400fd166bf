//! Execution, container verification, classification and reporting for
//! harvested commands.
//!
//! The [`Pipeline`] ties the stages together:
//!
//! 1. discovery through [`command_harvest_discovery::scan_project`];
//! 2. filtering against an [`IgnoreRuleSet`](command_harvest_core::IgnoreRuleSet);
//! 3. execution by an [`Executor`] with timeout, retries and backoff;
//! 4. optional re-verification by a [`ContainerTester`];
//! 5. classification into a [`Repository`](command_harvest_core::Repository);
//! 6. reports through a [`ReportSink`].
//!
//! # Examples
//!
//! ```no_run
//! use command_harvest_runner::{DirectoryReportSink, Pipeline, PipelineOptions};
//!
//! let pipeline = Pipeline::new(PipelineOptions::new("."));
//! let sink = DirectoryReportSink::new("reports");
//! let (scan, summary) = pipeline.run(&sink).unwrap();
//! println!("{} commands, {} failed", scan.commands.len(), summary.failed);
//! ```

pub mod container;
pub mod environment;
pub mod error;
pub mod executor;
pub mod interrupt;
pub mod pipeline;
pub(crate) mod process;
pub mod report;

pub use container::{
    BatchOutcome, ContainerError, ContainerInvocation, ContainerRunOutput, ContainerRuntime,
    ContainerTester, ContainerVerdict, DockerRuntime, Mount, RuntimeAvailability,
    failing_commands,
};
pub use environment::{ExecutionEnvironment, detect_virtualenv};
pub use error::{ExecutionError, PipelineError, ReportError, Result};
pub use executor::{
    ExecutionObserver, ExecutionPolicy, Executor, SlowCommand, SlowCommandLog,
    looks_like_missing_tool,
};
pub use interrupt::{CancellationToken, EXIT_INTERRUPTED, install_sigint_handler};
pub use pipeline::{ContainerMode, Pipeline, PipelineOptions, RunSummary};
pub use report::{
    DirectoryReportSink, IgnoredEntry, RESULTS_FILE, ReportCollections, ReportSink, TO_FIX_FILE,
    ToFixEntry, WORKING_FILE, WorkingEntry, load_results, regenerate_markdown,
    render_to_fix_markdown, render_working_markdown,
};
