//! Makefile target parser.

use std::collections::HashSet;
use std::path::Path;

use command_harvest_core::Command;

use super::super::util::join_continuations;
use super::super::{ParseError, Parser};

pub const KIND: &str = "make_target";

/// Emits `make <target>` for every explicit target.
///
/// Special targets (`.PHONY`), pattern rules (`%.o`), targets built from
/// variables and variable assignments are skipped. A `## text` trailing
/// comment or a `##` comment on the line above becomes the description.
pub struct MakefileParser;

impl Parser for MakefileParser {
    fn name(&self) -> &'static str {
        "makefile"
    }

    fn file_patterns(&self) -> &'static [&'static str] {
        &["Makefile", "makefile", "GNUmakefile", "*.mk"]
    }

    fn extract(&self, contents: &str, _path: &Path) -> Result<Vec<Command>, ParseError> {
        let mut commands = Vec::new();
        let mut seen = HashSet::new();
        let mut previous_doc: Option<String> = None;

        for (_, line) in join_continuations(contents) {
            if line.starts_with('\t') || line.starts_with(' ') {
                previous_doc = None;
                continue;
            }
            let trimmed = line.trim();
            if let Some(doc) = trimmed.strip_prefix("##") {
                previous_doc = Some(doc.trim().to_string());
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with('#') {
                previous_doc = None;
                continue;
            }

            let doc = previous_doc.take();
            let Some((targets, trailing_doc)) = parse_rule_line(trimmed) else {
                continue;
            };

            let description = trailing_doc.or(doc);
            for target in targets {
                if !seen.insert(target.clone()) {
                    continue;
                }
                let mut command =
                    Command::new(format!("make {target}"), KIND).with_metadata("target", target);
                if let Some(description) = &description {
                    command = command.with_description(description.clone());
                }
                commands.push(command);
            }
        }

        Ok(commands)
    }
}

/// Splits a rule line into its explicit targets and trailing `##` doc.
fn parse_rule_line(line: &str) -> Option<(Vec<String>, Option<String>)> {
    const DIRECTIVES: &[&str] = &[
        "include", "-include", "sinclude", "define", "endef", "ifeq", "ifneq", "ifdef", "ifndef",
        "else", "endif", "export", "unexport", "override", "vpath",
    ];

    let first_word = line.split_whitespace().next()?;
    if DIRECTIVES.contains(&first_word) {
        return None;
    }

    let colon = line.find(':')?;
    let (head, rest) = line.split_at(colon);
    // `a := b`, `a ::= b` and `a ?= b:c` are assignments, not rules.
    if head.contains('=') || rest.starts_with(":=") || rest.starts_with("::=") {
        return None;
    }

    let trailing_doc = rest
        .find("##")
        .map(|idx| rest[idx + 2..].trim().to_string())
        .filter(|doc| !doc.is_empty());

    let targets = head
        .split_whitespace()
        .filter(|target| is_explicit_target(target))
        .map(str::to_string)
        .collect::<Vec<_>>();
    if targets.is_empty() {
        return None;
    }
    Some((targets, trailing_doc))
}

fn is_explicit_target(target: &str) -> bool {
    !target.starts_with('.')
        && !target.contains('%')
        && !target.contains('$')
        && !target.contains('/')
        && !target.contains('(')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(contents: &str) -> Vec<Command> {
        MakefileParser
            .extract(contents, Path::new("Makefile"))
            .unwrap()
    }

    fn texts(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(Command::text).collect()
    }

    #[test]
    fn test_extracts_targets_and_skips_special_rules() {
        let contents = "\
CC := gcc
VERSION = 1.0
.PHONY: build test clean

## Build the project
build: deps
\t$(CC) -o app main.c

test: build ## Run the tests
\t./app --test

%.o: %.c
\t$(CC) -c $<

clean:
\trm -rf out
";
        let commands = extract(contents);
        assert_eq!(texts(&commands), vec!["make build", "make test", "make clean"]);
        assert_eq!(commands[0].description.as_deref(), Some("Build the project"));
        assert_eq!(commands[1].description.as_deref(), Some("Run the tests"));
        assert_eq!(commands[2].description, None);
        assert_eq!(commands[1].metadata_str("target"), Some("test"));
    }

    #[test]
    fn test_multiple_targets_on_one_line_are_deduplicated() {
        let commands = extract("lint fmt: \nlint:\n\techo again\n");
        assert_eq!(texts(&commands), vec!["make lint", "make fmt"]);
    }

    #[test]
    fn test_directives_and_assignments_are_not_targets() {
        let contents = "ifeq ($(OS),Windows_NT)\nexport PATH := x:y\nendif\nA ?= b:c\nB ::= c\n";
        assert!(extract(contents).is_empty());
    }

    #[test]
    fn test_comment_between_doc_and_target_clears_doc() {
        let contents = "## Stale doc\n# plain comment\nrun:\n\t./run\n";
        let commands = extract(contents);
        assert_eq!(commands[0].description, None);
    }
}
