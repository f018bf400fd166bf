//! Report collections and sinks.
//!
//! [`ReportCollections`] is built from one consistent repository snapshot
//! and is what every sink receives. [`DirectoryReportSink`] writes:
//!
//! | File                   | Content                                      |
//! |------------------------|----------------------------------------------|
//! | `results.json`         | the collections, machine readable            |
//! | `commands-to-fix.md`   | failed commands with exit code and error     |
//! | `working-commands.md`  | successful commands with duration            |
//!
//! The Markdown files can be regenerated from `results.json` alone, which
//! is how a partial or interrupted run is re-rendered.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use command_harvest_core::{ClassificationSnapshot, RESULTS_CONTRACT_VERSION, format_seconds};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ReportError;

pub const RESULTS_FILE: &str = "results.json";
pub const TO_FIX_FILE: &str = "commands-to-fix.md";
pub const WORKING_FILE: &str = "working-commands.md";

/// A failed command with what is needed to fix it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToFixEntry {
    pub command: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    pub return_code: Option<i32>,
    pub error: String,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// A command that ran successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingEntry {
    pub command: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// A command skipped by an ignore rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoredEntry {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The report-facing view of one classification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCollections {
    pub contract_version: String,
    pub generated_at: DateTime<Utc>,
    /// True when the pass stopped early; the collections are partial.
    #[serde(default)]
    pub interrupted: bool,
    pub to_fix: Vec<ToFixEntry>,
    pub working: Vec<WorkingEntry>,
    pub ignored: Vec<IgnoredEntry>,
    /// Commands that were discovered but never classified.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub untested: Vec<String>,
}

impl ReportCollections {
    /// Builds sorted collections from a snapshot.
    pub fn from_snapshot(snapshot: &ClassificationSnapshot, interrupted: bool) -> Self {
        let mut to_fix = snapshot
            .failed
            .iter()
            .map(|entry| {
                let result = entry.result.as_ref();
                ToFixEntry {
                    command: entry.command.text().to_string(),
                    kind: entry.command.kind.clone(),
                    source_file: entry.command.source_file.clone(),
                    return_code: result.and_then(|r| r.exit_code),
                    error: result.map(|r| r.error_text()).unwrap_or_default(),
                    duration_seconds: result.map_or(0.0, |r| r.duration_seconds),
                    notes: result.map(|r| r.notes.clone()).unwrap_or_default(),
                }
            })
            .collect::<Vec<_>>();
        let mut working = snapshot
            .successful
            .iter()
            .map(|entry| {
                let result = entry.result.as_ref();
                WorkingEntry {
                    command: entry.command.text().to_string(),
                    kind: entry.command.kind.clone(),
                    source_file: entry.command.source_file.clone(),
                    duration_seconds: result.map_or(0.0, |r| r.duration_seconds),
                    notes: result.map(|r| r.notes.clone()).unwrap_or_default(),
                }
            })
            .collect::<Vec<_>>();
        let mut ignored = snapshot
            .ignored
            .iter()
            .map(|entry| IgnoredEntry {
                command: entry.command.text().to_string(),
                source_file: entry.command.source_file.clone(),
                reason: entry.reason.clone(),
            })
            .collect::<Vec<_>>();

        to_fix.sort_by(|a, b| (&a.source_file, &a.command).cmp(&(&b.source_file, &b.command)));
        working.sort_by(|a, b| (&a.source_file, &a.command).cmp(&(&b.source_file, &b.command)));
        ignored.sort_by(|a, b| (&a.source_file, &a.command).cmp(&(&b.source_file, &b.command)));

        Self {
            contract_version: RESULTS_CONTRACT_VERSION.to_string(),
            generated_at: Utc::now(),
            interrupted,
            to_fix,
            working,
            ignored,
            untested: snapshot
                .untested()
                .into_iter()
                .map(|command| command.text().to_string())
                .collect(),
        }
    }
}

/// Destination for report collections.
pub trait ReportSink: Send + Sync {
    /// Persists one set of collections, replacing any earlier output.
    fn write(&self, collections: &ReportCollections) -> Result<(), ReportError>;
}

/// Writes `results.json` and the two Markdown reports into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryReportSink {
    dir: PathBuf,
}

impl DirectoryReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_file(&self, name: &str, contents: &str) -> Result<(), ReportError> {
        let path = self.dir.join(name);
        fs::write(&path, contents).map_err(|err| ReportError::io(&path, err))
    }
}

impl ReportSink for DirectoryReportSink {
    fn write(&self, collections: &ReportCollections) -> Result<(), ReportError> {
        fs::create_dir_all(&self.dir).map_err(|err| ReportError::io(&self.dir, err))?;
        let json = serde_json::to_string_pretty(collections)
            .map_err(|err| ReportError::json(self.dir.join(RESULTS_FILE), err))?;
        self.write_file(RESULTS_FILE, &json)?;
        self.write_file(TO_FIX_FILE, &render_to_fix_markdown(collections))?;
        self.write_file(WORKING_FILE, &render_working_markdown(collections))?;
        info!(
            dir = %self.dir.display(),
            to_fix = collections.to_fix.len(),
            working = collections.working.len(),
            "Wrote reports"
        );
        Ok(())
    }
}

/// Reads collections back from a `results.json`.
///
/// # Errors
///
/// Returns [`ReportError::Io`] if the file cannot be read or
/// [`ReportError::Json`] if it does not hold report collections.
pub fn load_results(path: impl AsRef<Path>) -> Result<ReportCollections, ReportError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|err| ReportError::io(path, err))?;
    serde_json::from_str(&raw).map_err(|err| ReportError::json(path, err))
}

/// Re-renders the Markdown reports in `dir` from its `results.json`.
///
/// # Errors
///
/// Propagates read, parse and write failures.
pub fn regenerate_markdown(dir: impl AsRef<Path>) -> Result<ReportCollections, ReportError> {
    let sink = DirectoryReportSink::new(dir.as_ref());
    let collections = load_results(dir.as_ref().join(RESULTS_FILE))?;
    sink.write_file(TO_FIX_FILE, &render_to_fix_markdown(&collections))?;
    sink.write_file(WORKING_FILE, &render_working_markdown(&collections))?;
    Ok(collections)
}

fn source_label(source: &Option<PathBuf>) -> String {
    source
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn header(out: &mut String, title: &str, collections: &ReportCollections) {
    out.push_str(&format!("# {title}\n\n"));
    out.push_str(&format!(
        "_Generated {}_\n\n",
        collections.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if collections.interrupted {
        out.push_str("> **Partial results:** the run was interrupted before every command was tested.\n\n");
    }
}

/// Markdown for the failed commands, grouped by source file.
pub fn render_to_fix_markdown(collections: &ReportCollections) -> String {
    let mut out = String::new();
    header(&mut out, "Commands to fix", collections);

    if collections.to_fix.is_empty() {
        out.push_str("No failing commands.\n");
        return out;
    }
    out.push_str(&format!("{} failing command(s).\n", collections.to_fix.len()));

    let mut current: Option<&Option<PathBuf>> = None;
    for entry in &collections.to_fix {
        if current != Some(&entry.source_file) {
            out.push_str(&format!("\n## {}\n", source_label(&entry.source_file)));
            current = Some(&entry.source_file);
        }
        out.push_str(&format!("\n### `{}`\n\n", entry.command));
        let code = entry
            .return_code
            .map_or_else(|| "none".to_string(), |code| code.to_string());
        out.push_str(&format!("- **Return code:** {code}\n"));
        out.push_str(&format!(
            "- **Duration:** {}s\n",
            format_seconds(round_centis(entry.duration_seconds))
        ));
        for note in &entry.notes {
            out.push_str(&format!("- **Note:** {}\n", note.trim_end().replace('\n', "\n  ")));
        }
        if !entry.error.is_empty() {
            out.push_str("\n```text\n");
            out.push_str(entry.error.trim_end());
            out.push_str("\n```\n");
        }
    }
    out
}

/// Markdown table of the working commands.
pub fn render_working_markdown(collections: &ReportCollections) -> String {
    let mut out = String::new();
    header(&mut out, "Working commands", collections);

    if collections.working.is_empty() {
        out.push_str("No working commands.\n");
        return out;
    }
    out.push_str("| Command | Source | Duration |\n");
    out.push_str("|---------|--------|----------|\n");
    for entry in &collections.working {
        out.push_str(&format!(
            "| `{}` | {} | {}s |\n",
            entry.command.replace('|', "\\|"),
            source_label(&entry.source_file),
            format_seconds(round_centis(entry.duration_seconds))
        ));
    }
    out
}

fn round_centis(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}
