//! Project walking and command harvesting.
//!
//! [`discover_files`] lists the files a registry can parse, honoring the
//! default excluded directories, include/exclude globs and a depth limit.
//! [`scan_project`] runs the selected parser on each file and collects the
//! candidates. A file that fails to read or parse is recorded in
//! [`ScanOutcome::parse_errors`]; the scan always continues.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use command_harvest_core::{Command, CommandKey};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::parser::ParserRegistry;
use crate::parser::util::slash_path;

/// Directory names never descended into, in addition to hidden directories.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "build",
    "dist",
    "__pycache__",
    "venv",
    ".venv",
    ".tox",
    "vendor",
];

/// Default walk depth below the project root.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Files larger than this are skipped.
pub const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Errors that prevent a scan from starting.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("project root {0} is not a directory")]
    RootNotFound(PathBuf),

    #[error("invalid discovery glob `{pattern}`: {message}")]
    InvalidGlob { pattern: String, message: String },
}

/// Scope of a project scan.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub root: PathBuf,
    pub max_depth: usize,
    /// When non-empty, only files whose relative path matches are scanned.
    pub include: Vec<String>,
    /// Files and directories whose relative path matches are skipped.
    pub exclude: Vec<String>,
}

impl DiscoveryOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: DEFAULT_MAX_DEPTH,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_include(mut self, patterns: Vec<String>) -> Self {
        self.include = patterns;
        self
    }

    pub fn with_exclude(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }
}

/// A file that could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseFailure {
    /// Path relative to the project root.
    pub file: PathBuf,
    pub parser: String,
    pub message: String,
}

/// Result of scanning a project.
#[derive(Debug, Default, Serialize)]
pub struct ScanOutcome {
    /// Candidates in sorted file order, then extraction order.
    pub commands: Vec<Command>,
    pub parse_errors: Vec<ParseFailure>,
    pub files_scanned: usize,
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, DiscoveryError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .map_err(|err| DiscoveryError::InvalidGlob {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|err| DiscoveryError::InvalidGlob {
            pattern: patterns.join(", "),
            message: err.to_string(),
        })
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || DEFAULT_EXCLUDED_DIRS.contains(&name.as_ref())
}

/// Lists parseable files under `options.root`, relative to the root, in
/// sorted order. Reads nothing but directory entries.
///
/// # Errors
///
/// Returns [`DiscoveryError::RootNotFound`] if the root is not a directory,
/// or [`DiscoveryError::InvalidGlob`] for a malformed include/exclude glob.
pub fn discover_files(
    options: &DiscoveryOptions,
    registry: &ParserRegistry,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let root = &options.root;
    if !root.is_dir() {
        return Err(DiscoveryError::RootNotFound(root.clone()));
    }
    let include = build_globset(&options.include)?;
    let exclude = build_globset(&options.exclude)?;

    let relative = |entry: &DirEntry| -> PathBuf {
        entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf()
    };

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(options.max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if is_excluded_dir(entry) {
                return false;
            }
            match &exclude {
                Some(set) if entry.depth() > 0 => !set.is_match(slash_path(&relative(entry))),
                _ => true,
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative(&entry);
        if include.as_ref().is_some_and(|set| !set.is_match(slash_path(&rel))) {
            continue;
        }
        if registry.select(&rel).is_some() {
            files.push(rel);
        }
    }

    debug!(root = %root.display(), files = files.len(), "Discovered parseable files");
    Ok(files)
}

/// Scans a project and harvests candidate commands.
///
/// Each command gets its source file and working directory set relative to
/// the root. Duplicates on `(text, source_file)` keep the first occurrence.
///
/// # Errors
///
/// Only setup failures from [`discover_files`] are returned; per-file read
/// and parse failures are collected in the outcome.
pub fn scan_project(
    options: &DiscoveryOptions,
    registry: &ParserRegistry,
) -> Result<ScanOutcome, DiscoveryError> {
    let files = discover_files(options, registry)?;
    let mut outcome = ScanOutcome::default();
    let mut seen: HashSet<CommandKey> = HashSet::new();

    for rel in files {
        let Some(parser) = registry.select(&rel) else {
            continue;
        };
        let abs = options.root.join(&rel);
        let failure = |message: String| ParseFailure {
            file: rel.clone(),
            parser: parser.name().to_string(),
            message,
        };

        match fs::metadata(&abs) {
            Ok(meta) if meta.len() > MAX_FILE_BYTES => {
                warn!(file = %rel.display(), bytes = meta.len(), "Skipping oversized file");
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(file = %rel.display(), error = %err, "Failed to stat file");
                outcome.parse_errors.push(failure(err.to_string()));
                continue;
            }
        }

        let contents = match fs::read_to_string(&abs) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(file = %rel.display(), error = %err, "Failed to read file");
                outcome.parse_errors.push(failure(err.to_string()));
                continue;
            }
        };
        outcome.files_scanned += 1;

        let extracted = match parser.extract(&contents, &abs) {
            Ok(commands) => commands,
            Err(err) => {
                warn!(file = %rel.display(), parser = parser.name(), error = %err, "Failed to parse file");
                outcome.parse_errors.push(failure(err.to_string()));
                continue;
            }
        };

        let working_directory = working_directory_for(&rel);
        let before = outcome.commands.len();
        for command in extracted {
            let mut command = command.with_source_file(&rel);
            if let Some(dir) = &working_directory {
                command = command.with_working_directory(dir);
            }
            if seen.insert(command.key()) {
                outcome.commands.push(command);
            }
        }
        debug!(
            file = %rel.display(),
            parser = parser.name(),
            commands = outcome.commands.len() - before,
            "Parsed file"
        );
    }

    Ok(outcome)
}

fn working_directory_for(rel: &Path) -> Option<PathBuf> {
    rel.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
