//! Parser interface and file-pattern dispatch.
//!
//! Every format-specific extractor implements [`Parser`]. A
//! [`ParserRegistry`] keeps parsers in registration order and picks one per
//! file:
//!
//! 1. every parser whose declared file patterns match the file is a
//!    candidate;
//! 2. the candidate whose matching pattern is most specific wins, where
//!    specificity is the number of literal (non-wildcard) characters;
//! 3. ties go to the parser registered first.
//!
//! Patterns containing `/` are matched against the path relative to the
//! project root; all others against the file name.

pub mod strategies;
pub(crate) mod util;

use std::path::Path;

use command_harvest_core::Command;
use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;
use tracing::warn;

/// Failure to extract commands from one file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Content parsed but does not have the expected shape.
    #[error("{0}")]
    Invalid(String),
}

/// A format-specific command extractor.
pub trait Parser: Send + Sync {
    /// Stable identifier used in logs and reports.
    fn name(&self) -> &'static str;

    /// Glob patterns of files this parser understands.
    fn file_patterns(&self) -> &'static [&'static str];

    /// Extracts candidate commands from `contents`, read from `path`.
    ///
    /// Implementations only set kind, description and metadata; the scanner
    /// fills in source file and working directory.
    fn extract(&self, contents: &str, path: &Path) -> Result<Vec<Command>, ParseError>;
}

struct FilePattern {
    matcher: GlobMatcher,
    specificity: usize,
    match_relative_path: bool,
}

impl FilePattern {
    fn compile(pattern: &str) -> Option<Self> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .map_err(|err| warn!(pattern, error = %err, "Skipping invalid parser file pattern"))
            .ok()?;
        Some(Self {
            matcher: glob.compile_matcher(),
            specificity: pattern_specificity(pattern),
            match_relative_path: pattern.contains('/'),
        })
    }

    fn matches(&self, file_name: &str, relative_path: &str) -> bool {
        if self.match_relative_path {
            self.matcher.is_match(relative_path)
        } else {
            self.matcher.is_match(file_name)
        }
    }
}

/// Number of literal characters in a glob pattern.
///
/// # Examples
///
/// ```
/// use command_harvest_discovery::parser::pattern_specificity;
///
/// assert_eq!(pattern_specificity("Makefile"), 8);
/// assert_eq!(pattern_specificity("*.mk"), 3);
/// assert_eq!(pattern_specificity("Dockerfile.*"), 11);
/// assert_eq!(pattern_specificity("[Mm]akefile"), 7);
/// ```
pub fn pattern_specificity(pattern: &str) -> usize {
    let mut count = 0;
    let mut in_class = false;
    for ch in pattern.chars() {
        match ch {
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '*' | '?' | '{' | '}' | ',' if !in_class => {}
            _ if in_class => {}
            _ => count += 1,
        }
    }
    count
}

struct Registered {
    parser: Box<dyn Parser>,
    patterns: Vec<FilePattern>,
}

/// Ordered set of parsers with most-specific-pattern dispatch.
pub struct ParserRegistry {
    parsers: Vec<Registered>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ParserRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// A registry holding every built-in parser.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        for parser in strategies::builtin_parsers() {
            registry.register(parser);
        }
        registry
    }

    pub fn register(&mut self, parser: Box<dyn Parser>) {
        let patterns = parser
            .file_patterns()
            .iter()
            .filter_map(|pattern| FilePattern::compile(pattern))
            .collect();
        self.parsers.push(Registered { parser, patterns });
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|entry| entry.parser.name()).collect()
    }

    /// Selects the parser for `relative_path`, or `None` if nothing matches.
    pub fn select(&self, relative_path: &Path) -> Option<&dyn Parser> {
        let file_name = relative_path.file_name()?.to_string_lossy();
        let relative = util::slash_path(relative_path);

        let mut best: Option<(usize, &dyn Parser)> = None;
        for entry in &self.parsers {
            let Some(specificity) = entry
                .patterns
                .iter()
                .filter(|pattern| pattern.matches(&file_name, &relative))
                .map(|pattern| pattern.specificity)
                .max()
            else {
                continue;
            };
            if best.is_none_or(|(current, _)| specificity > current) {
                best = Some((specificity, entry.parser.as_ref()));
            }
        }
        best.map(|(_, parser)| parser)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    struct Fixed {
        name: &'static str,
        patterns: &'static [&'static str],
    }

    impl Parser for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn file_patterns(&self) -> &'static [&'static str] {
            self.patterns
        }

        fn extract(&self, _contents: &str, _path: &Path) -> Result<Vec<Command>, ParseError> {
            Ok(vec![Command::new(self.name, "test")])
        }
    }

    fn registry(parsers: Vec<Fixed>) -> ParserRegistry {
        let mut registry = ParserRegistry::empty();
        for parser in parsers {
            registry.register(Box::new(parser));
        }
        registry
    }

    #[test]
    fn test_most_specific_pattern_wins_over_registration_order() {
        let registry = registry(vec![
            Fixed { name: "generic-yaml", patterns: &["*.yml"] },
            Fixed { name: "compose", patterns: &["docker-compose.yml"] },
        ]);
        let parser = registry.select(&PathBuf::from("docker-compose.yml")).unwrap();
        assert_eq!(parser.name(), "compose");
        let parser = registry.select(&PathBuf::from("other.yml")).unwrap();
        assert_eq!(parser.name(), "generic-yaml");
    }

    #[test]
    fn test_ties_go_to_first_registered() {
        let registry = registry(vec![
            Fixed { name: "first", patterns: &["*.yml"] },
            Fixed { name: "second", patterns: &["*.yml"] },
        ]);
        let parser = registry.select(&PathBuf::from("site.yml")).unwrap();
        assert_eq!(parser.name(), "first");
    }

    #[test]
    fn test_slash_patterns_match_relative_path() {
        let registry = registry(vec![Fixed { name: "tasks", patterns: &["*/tasks/*.yml"] }]);
        assert!(registry.select(&PathBuf::from("roles/web/tasks/main.yml")).is_some());
        assert!(registry.select(&PathBuf::from("main.yml")).is_none());
    }

    #[test]
    fn test_builtin_registry_dispatches_known_files() {
        let registry = ParserRegistry::with_builtin();
        let cases = [
            ("Makefile", "makefile"),
            ("build/rules.mk", "makefile"),
            ("web/package.json", "npm"),
            ("justfile", "justfile"),
            ("Dockerfile", "dockerfile"),
            ("docker/Dockerfile.dev", "dockerfile"),
            ("docker-compose.yml", "compose"),
            ("compose.yaml", "compose"),
            ("deploy/playbook.yml", "ansible"),
            ("roles/db/tasks/main.yml", "ansible"),
            ("pyproject.toml", "pyproject"),
        ];
        for (path, expected) in cases {
            let parser = registry.select(&PathBuf::from(path));
            assert_eq!(parser.map(|p| p.name()), Some(expected), "{path}");
        }
        assert!(registry.select(&PathBuf::from("README.md")).is_none());
        assert!(registry.select(&PathBuf::from("config.yml")).is_none());
    }
}
