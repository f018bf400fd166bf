//! Ignore rules and the pure filter that decides whether a candidate runs.
//!
//! A rule is a literal substring, a glob, or a regular expression. Rules are
//! case-insensitive unless prefixed with `case:`. A command is ignored when
//! any rule matches any of its attributes: full text, the text after a known
//! launcher prefix, kind, description, source file, or any string metadata.
//!
//! # Examples
//!
//! ```
//! use command_harvest_core::{Command, IgnoreRule, should_ignore};
//!
//! let rules = vec![
//!     IgnoreRule::parse("make clean").unwrap(),
//!     IgnoreRule::parse("re:^deploy").unwrap(),
//! ];
//!
//! assert!(should_ignore(&Command::new("make clean", "make_target"), &rules));
//! assert!(should_ignore(&Command::new("npm run deploy:prod", "npm_script"), &rules));
//! assert!(!should_ignore(&Command::new("make build", "make_target"), &rules));
//! ```

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::Command;

/// Launcher prefixes whose remainder is matched as its own attribute, so a
/// rule `test` catches `npm run test` without also needing `npm run`.
pub const LAUNCHER_PREFIXES: &[&str] = &[
    "npm run-script ",
    "npm run ",
    "yarn run ",
    "yarn ",
    "pnpm run ",
    "pnpm ",
    "make ",
    "just ",
    "poetry run ",
    "pipenv run ",
    "pdm run ",
    "task ",
    "npx ",
];

const REGEX_PREFIXES: &[&str] = &["re:", "regex:"];
const CASE_SENSITIVE_PREFIX: &str = "case:";

/// Errors raised while compiling a rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IgnoreRuleError {
    #[error("ignore rule is empty")]
    Empty,
    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
    #[error("invalid glob '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },
}

/// How a rule's pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    Literal,
    Glob,
    Regex,
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Glob(GlobMatcher),
    Regex(Regex),
}

/// A compiled ignore rule.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    source: String,
    pattern: String,
    mode: RuleMode,
    case_sensitive: bool,
    matcher: Matcher,
}

impl IgnoreRule {
    /// Parses one rule line.
    ///
    /// `re:`/`regex:` selects regex mode, any of `*`, `?`, `[` selects glob
    /// mode, anything else is a literal substring. A leading `case:` makes
    /// the rule case-sensitive.
    ///
    /// # Errors
    ///
    /// Returns [`IgnoreRuleError`] for empty lines or patterns that fail to
    /// compile.
    pub fn parse(line: &str) -> Result<Self, IgnoreRuleError> {
        let source = line.trim();
        let (case_sensitive, rest) = match source.strip_prefix(CASE_SENSITIVE_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, source),
        };

        let regex_body = REGEX_PREFIXES
            .iter()
            .find_map(|prefix| rest.strip_prefix(prefix));

        let (mode, pattern) = match regex_body {
            Some(body) => (RuleMode::Regex, body.trim()),
            None if rest.contains(['*', '?', '[']) => (RuleMode::Glob, rest.trim()),
            None => (RuleMode::Literal, rest.trim()),
        };

        if pattern.is_empty() {
            return Err(IgnoreRuleError::Empty);
        }

        Self::compile(source, pattern, mode, case_sensitive)
    }

    /// Builds a literal substring rule without interpreting prefixes.
    pub fn literal(pattern: &str) -> Result<Self, IgnoreRuleError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(IgnoreRuleError::Empty);
        }
        Self::compile(pattern, pattern, RuleMode::Literal, false)
    }

    fn compile(
        source: &str,
        pattern: &str,
        mode: RuleMode,
        case_sensitive: bool,
    ) -> Result<Self, IgnoreRuleError> {
        let matcher = match mode {
            RuleMode::Literal => Matcher::Literal(if case_sensitive {
                pattern.to_string()
            } else {
                pattern.to_lowercase()
            }),
            RuleMode::Glob => {
                let glob = GlobBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .literal_separator(false)
                    .build()
                    .map_err(|err| IgnoreRuleError::InvalidGlob {
                        pattern: pattern.to_string(),
                        message: err.kind().to_string(),
                    })?;
                Matcher::Glob(glob.compile_matcher())
            }
            RuleMode::Regex => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|err| IgnoreRuleError::InvalidRegex {
                        pattern: pattern.to_string(),
                        message: err.to_string(),
                    })?;
                Matcher::Regex(regex)
            }
        };

        Ok(Self {
            source: source.to_string(),
            pattern: pattern.to_string(),
            mode,
            case_sensitive,
            matcher,
        })
    }

    /// The rule exactly as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn mode(&self) -> RuleMode {
        self.mode
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Matches a single attribute value.
    pub fn matches_value(&self, value: &str) -> bool {
        match &self.matcher {
            Matcher::Literal(needle) if self.case_sensitive => value.contains(needle.as_str()),
            Matcher::Literal(needle) => value.to_lowercase().contains(needle.as_str()),
            Matcher::Glob(glob) => glob.is_match(value),
            Matcher::Regex(regex) => regex.is_match(value),
        }
    }

    /// Matches any attribute of `command`.
    pub fn matches(&self, command: &Command) -> bool {
        command_attributes(command).any(|value| self.matches_value(&value))
    }
}

impl fmt::Display for IgnoreRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Attribute values a rule is tested against, in a fixed order.
fn command_attributes(command: &Command) -> impl Iterator<Item = String> + '_ {
    let text = command.text();
    let launcher_remainder = LAUNCHER_PREFIXES
        .iter()
        .find_map(|prefix| text.strip_prefix(prefix))
        .map(|rest| rest.trim().to_string());

    std::iter::once(text.to_string())
        .chain(launcher_remainder)
        .chain(std::iter::once(command.kind.clone()))
        .chain(command.description.clone())
        .chain(
            command
                .source_file
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
        )
        .chain(command.string_metadata().map(str::to_string))
}

/// Returns `true` when any rule matches any attribute of `command`.
///
/// Pure: the answer depends only on the arguments.
pub fn should_ignore(command: &Command, rules: &[IgnoreRule]) -> bool {
    first_matching_rule(command, rules).is_some()
}

/// Returns the first rule matching `command`, if any.
pub fn first_matching_rule<'a>(command: &Command, rules: &'a [IgnoreRule]) -> Option<&'a IgnoreRule> {
    rules.iter().find(|rule| rule.matches(command))
}

/// An ordered collection of rules loaded from one or more sources.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRuleSet {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRuleSet {
    pub fn new(rules: Vec<IgnoreRule>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: IgnoreRule) {
        self.rules.push(rule);
    }

    pub fn extend(&mut self, other: IgnoreRuleSet) {
        self.rules.extend(other.rules);
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn should_ignore(&self, command: &Command) -> bool {
        should_ignore(command, &self.rules)
    }

    pub fn first_match(&self, command: &Command) -> Option<&IgnoreRule> {
        first_matching_rule(command, &self.rules)
    }

    /// Returns `true` if a rule with exactly this source text exists.
    pub fn contains_source(&self, source: &str) -> bool {
        self.rules.iter().any(|rule| rule.source() == source.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(lines: &[&str]) -> Vec<IgnoreRule> {
        lines.iter().map(|line| IgnoreRule::parse(line).unwrap()).collect()
    }

    #[test]
    fn test_parse_selects_mode() {
        assert_eq!(IgnoreRule::parse("make clean").unwrap().mode(), RuleMode::Literal);
        assert_eq!(IgnoreRule::parse("npm run test*").unwrap().mode(), RuleMode::Glob);
        assert_eq!(IgnoreRule::parse("re:^make").unwrap().mode(), RuleMode::Regex);
        assert_eq!(IgnoreRule::parse("regex:lint$").unwrap().mode(), RuleMode::Regex);
    }

    #[test]
    fn test_parse_rejects_empty_and_invalid_patterns() {
        assert_eq!(IgnoreRule::parse("   ").unwrap_err(), IgnoreRuleError::Empty);
        assert_eq!(IgnoreRule::parse("re:").unwrap_err(), IgnoreRuleError::Empty);
        assert!(matches!(
            IgnoreRule::parse("re:(unclosed").unwrap_err(),
            IgnoreRuleError::InvalidRegex { .. }
        ));
        assert!(matches!(
            IgnoreRule::parse("make [clean").unwrap_err(),
            IgnoreRuleError::InvalidGlob { .. }
        ));
    }

    #[test]
    fn test_literal_is_case_insensitive_by_default() {
        let rules = rules(&["MAKE CLEAN"]);
        assert!(should_ignore(&Command::new("make clean", "make_target"), &rules));
    }

    #[test]
    fn test_case_prefix_makes_rule_case_sensitive() {
        let rules = rules(&["case:Make clean"]);
        assert!(!should_ignore(&Command::new("make clean", "make_target"), &rules));
        assert!(should_ignore(&Command::new("Make clean", "make_target"), &rules));
    }

    #[test]
    fn test_glob_matches_whole_text() {
        let rules = rules(&["npm run test*"]);
        assert!(should_ignore(&Command::new("npm run test:unit", "npm_script"), &rules));
        assert!(!should_ignore(&Command::new("npm run build", "npm_script"), &rules));
    }

    #[test]
    fn test_glob_character_class() {
        let rules = rules(&["make test[0-9]"]);
        assert!(should_ignore(&Command::new("make test1", "make_target"), &rules));
        assert!(!should_ignore(&Command::new("make testx", "make_target"), &rules));
    }

    #[test]
    fn test_launcher_remainder_is_matched() {
        let rules = rules(&["re:^deploy$"]);
        assert!(should_ignore(&Command::new("npm run deploy", "npm_script"), &rules));
        assert!(should_ignore(&Command::new("make deploy", "make_target"), &rules));
        assert!(!should_ignore(&Command::new("make deploy-docs", "make_target"), &rules));
    }

    #[test]
    fn test_kind_description_source_and_metadata_are_matched() {
        let kind = rules(&["ansible_task"]);
        assert!(should_ignore(&Command::new("echo hi", "ansible_task"), &kind));

        let description = rules(&["dangerous"]);
        let cmd = Command::new("rm -rf out", "make_target").with_description("Dangerous cleanup");
        assert!(should_ignore(&cmd, &description));

        let source = rules(&["*legacy/*"]);
        let cmd = Command::new("make", "make_target").with_source_file("legacy/Makefile");
        assert!(should_ignore(&cmd, &source));

        let metadata = rules(&["prepublish"]);
        let cmd = Command::new("npm run x", "npm_script").with_metadata("script", "prepublishOnly");
        assert!(should_ignore(&cmd, &metadata));
    }

    #[test]
    fn test_no_rules_never_ignores() {
        assert!(!should_ignore(&Command::new("make", "make_target"), &[]));
    }

    #[test]
    fn test_should_ignore_is_deterministic() {
        let rules = rules(&["make clean", "re:lint", "docker*"]);
        let commands = [
            Command::new("make clean", "make_target"),
            Command::new("make build", "make_target"),
            Command::new("npm run lint", "npm_script"),
            Command::new("docker compose up", "compose_command"),
        ];
        let first: Vec<bool> = commands.iter().map(|c| should_ignore(c, &rules)).collect();
        for _ in 0..3 {
            let again: Vec<bool> = commands.iter().rev().map(|c| should_ignore(c, &rules)).collect();
            let again: Vec<bool> = again.into_iter().rev().collect();
            assert_eq!(first, again);
        }
        assert_eq!(first, vec![true, false, true, true]);
    }

    #[test]
    fn test_first_match_reports_rule_source() {
        let set = IgnoreRuleSet::new(rules(&["re:^never$", "clean"]));
        let cmd = Command::new("make clean", "make_target");
        assert_eq!(set.first_match(&cmd).map(IgnoreRule::source), Some("clean"));
        assert!(set.contains_source("clean"));
    }
}
