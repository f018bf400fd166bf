//! Plain-text ignore file loading.
//!
//! One rule per line. Blank lines and lines starting with `#` are skipped.
//! Lines that fail to compile are reported and skipped; the remaining rules
//! still load.

use std::fs;
use std::path::Path;

use command_harvest_core::{IgnoreRule, IgnoreRuleSet};
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};

/// Rules parsed from one file plus the lines that were rejected.
#[derive(Debug, Default)]
pub struct ParsedIgnoreFile {
    pub rules: IgnoreRuleSet,
    pub rejected: Vec<ConfigError>,
}

/// Parses ignore-file contents. `path` is only used for error context.
pub fn parse_ignore_rules(contents: &str, path: &Path) -> ParsedIgnoreFile {
    let mut parsed = ParsedIgnoreFile::default();

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match IgnoreRule::parse(line) {
            Ok(rule) => parsed.rules.push(rule),
            Err(source) => parsed.rejected.push(ConfigError::InvalidRule {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            }),
        }
    }

    parsed
}

/// Loads an ignore file, skipping rules that fail to compile.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read.
pub fn load_ignore_file(path: impl AsRef<Path>) -> Result<IgnoreRuleSet> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
    let parsed = parse_ignore_rules(&contents, path);
    for rejected in &parsed.rejected {
        warn!(error = %rejected, "Skipping invalid ignore rule");
    }
    debug!(path = %path.display(), rules = parsed.rules.len(), "Loaded ignore file");
    Ok(parsed.rules)
}

/// Loads an ignore file, degrading to an empty rule set on any error.
pub fn load_ignore_file_or_empty(path: impl AsRef<Path>) -> IgnoreRuleSet {
    let path = path.as_ref();
    match load_ignore_file(path) {
        Ok(rules) => rules,
        Err(err) => {
            warn!(error = %err, "Ignore file unusable, continuing without ignore rules");
            IgnoreRuleSet::default()
        }
    }
}
