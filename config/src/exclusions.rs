//! Appending container-verified failures to an ignore file.
//!
//! Each new entry is a marker comment followed by one rule line, so later
//! scans treat the command as known-broken and skip it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use command_harvest_core::IgnoreRuleSet;
use tracing::info;

use crate::error::{ConfigError, Result};
use crate::ignore_file::parse_ignore_rules;

/// Comment prefix written above every appended entry.
pub const EXCLUSION_MARKER: &str = "# cmd-harvest: container-verified failure";

/// Returns the rule line that matches exactly `command_text`.
///
/// The rule is an anchored, escaped, case-sensitive regex, so it never
/// catches sibling commands that merely contain the text.
///
/// # Examples
///
/// ```
/// use command_harvest_config::exclusion_rule_for;
///
/// assert_eq!(exclusion_rule_for("make lint"), "case:re:^make lint$");
/// assert_eq!(exclusion_rule_for("ls *.py"), r"case:re:^ls \*\.py$");
/// ```
pub fn exclusion_rule_for(command_text: &str) -> String {
    format!("case:re:^{}$", regex::escape(command_text.trim()))
}

/// Appends `failing` commands to the ignore file at `path`.
///
/// Commands whose rule line is already present, and duplicates within
/// `failing`, are skipped. The file and its parent directory are created
/// when missing. Returns the number of entries written.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read or written.
pub fn append_exclusions(path: impl AsRef<Path>, failing: &[String]) -> Result<usize> {
    let path = path.as_ref();
    let existing = if path.exists() {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
        parse_ignore_rules(&contents, path).rules
    } else {
        IgnoreRuleSet::default()
    };

    let mut pending: Vec<String> = Vec::new();
    for text in failing {
        if text.trim().is_empty() {
            continue;
        }
        let rule = exclusion_rule_for(text);
        if existing.contains_source(&rule) || pending.contains(&rule) {
            continue;
        }
        pending.push(rule);
    }

    if pending.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| ConfigError::io(parent, err))?;
    }

    let needs_leading_newline = fs::read(path)
        .map(|bytes| bytes.last().is_some_and(|last| *last != b'\n'))
        .unwrap_or(false);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| ConfigError::io(path, err))?;

    let stamp = Utc::now().to_rfc3339();
    let mut block = String::new();
    if needs_leading_newline {
        block.push('\n');
    }
    for rule in &pending {
        block.push_str(&format!("{EXCLUSION_MARKER} ({stamp})\n{rule}\n"));
    }
    file.write_all(block.as_bytes())
        .map_err(|err| ConfigError::io(path, err))?;

    info!(path = %path.display(), added = pending.len(), "Appended container failures to exclusion file");
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use command_harvest_core::{Command, should_ignore};

    use super::*;

    #[test]
    fn test_rule_for_prefixed_text_is_regex() {
        assert_eq!(exclusion_rule_for("re:thing"), "case:re:^re:thing$");
        assert!(exclusion_rule_for("# not a comment").starts_with("case:re:^"));
    }

    #[test]
    fn test_generated_rule_skips_sibling_commands() {
        let rule = command_harvest_core::IgnoreRule::parse(&exclusion_rule_for("make lint")).unwrap();
        let rules = [rule];

        assert!(should_ignore(&Command::new("make lint", "make_target"), &rules));
        assert!(!should_ignore(&Command::new("make lint-fix", "make_target"), &rules));
        assert!(!should_ignore(&Command::new("MAKE LINT", "make_target"), &rules));

        let script = Command::new("npm run ci", "npm_script")
            .with_metadata("script", "make lint && make test");
        assert!(!should_ignore(&script, &rules));
    }

    #[test]
    fn test_generated_rules_match_their_command() {
        for text in ["make lint", "ls *.py", "[ -f x ] && echo ok", "case:Odd"] {
            let rule = command_harvest_core::IgnoreRule::parse(&exclusion_rule_for(text)).unwrap();
            assert!(should_ignore(&Command::new(text, "t"), &[rule]), "{text}");
        }
    }

    #[test]
    fn test_append_skips_existing_and_duplicate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ignore");
        fs::write(&path, "make clean").unwrap();

        let added = append_exclusions(
            &path,
            &["make clean".into(), "make lint".into(), "make lint".into()],
        )
        .unwrap();
        assert_eq!(added, 1);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "make clean");
        assert!(lines[1].starts_with(EXCLUSION_MARKER));
        assert_eq!(lines[2], "case:re:^make lint$");
        assert_eq!(lines.len(), 3);

        assert_eq!(append_exclusions(&path, &["make lint".into()]).unwrap(), 0);
    }

    #[test]
    fn test_append_creates_missing_file_and_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ignore");
        assert_eq!(append_exclusions(&path, &["pytest -q".into()]).unwrap(), 1);
        assert!(fs::read_to_string(&path).unwrap().ends_with("case:re:^pytest -q$\n"));
    }
}
