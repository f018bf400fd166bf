//! Dockerfile `RUN` instruction parser.

use std::path::Path;

use command_harvest_core::Command;

use super::super::util::{join_continuations, squash_whitespace};
use super::super::{ParseError, Parser};

pub const KIND: &str = "dockerfile_run";

/// Emits the shell-form body of every `RUN` instruction.
///
/// Leading `--mount=`/`--network=` style flags are stripped. Exec-form
/// (`RUN ["a", "b"]`) and heredoc bodies are skipped. The most recent `FROM`
/// image is recorded under the `image` metadata key, which the container
/// stage uses as a hint.
pub struct DockerfileParser;

impl Parser for DockerfileParser {
    fn name(&self) -> &'static str {
        "dockerfile"
    }

    fn file_patterns(&self) -> &'static [&'static str] {
        &["Dockerfile", "Dockerfile.*", "*.dockerfile", "Containerfile"]
    }

    fn extract(&self, contents: &str, _path: &Path) -> Result<Vec<Command>, ParseError> {
        let mut commands = Vec::new();
        let mut image: Option<String> = None;
        let mut stage = 0usize;

        for (line_number, line) in join_continuations(contents) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (instruction, rest) = trimmed
                .split_once(char::is_whitespace)
                .unwrap_or((trimmed, ""));

            if instruction.eq_ignore_ascii_case("FROM") {
                stage += 1;
                image = rest
                    .split_whitespace()
                    .find(|word| !word.starts_with("--"))
                    .map(str::to_string);
                continue;
            }
            if !instruction.eq_ignore_ascii_case("RUN") {
                continue;
            }

            let body = strip_run_flags(rest.trim());
            if body.is_empty() || body.starts_with('[') || body.contains("<<") {
                continue;
            }

            let mut command = Command::new(squash_whitespace(body), KIND)
                .with_metadata("line", line_number)
                .with_metadata("stage", stage);
            if let Some(image) = &image {
                command = command.with_metadata("image", image.as_str());
            }
            commands.push(command);
        }

        Ok(commands)
    }
}

fn strip_run_flags(mut body: &str) -> &str {
    while body.starts_with("--") {
        body = match body.split_once(char::is_whitespace) {
            Some((_, rest)) => rest.trim_start(),
            None => "",
        };
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_instructions_with_flags_and_continuations() {
        let contents = "\
FROM --platform=linux/amd64 python:3.11-slim AS base
# comment
RUN pip install -r requirements.txt
RUN --mount=type=cache,target=/root/.cache \\
    apt-get update && \\
    apt-get install -y curl
RUN [\"echo\", \"exec form\"]
COPY . /app
FROM node:20
run npm ci
";
        let commands = DockerfileParser
            .extract(contents, Path::new("Dockerfile"))
            .unwrap();
        let texts: Vec<_> = commands.iter().map(Command::text).collect();
        assert_eq!(
            texts,
            vec![
                "pip install -r requirements.txt",
                "apt-get update && apt-get install -y curl",
                "npm ci",
            ]
        );
        assert_eq!(commands[0].metadata_str("image"), Some("python:3.11-slim"));
        assert_eq!(commands[1].metadata["line"], 4);
        assert_eq!(commands[2].metadata_str("image"), Some("node:20"));
        assert_eq!(commands[2].metadata["stage"], 2);
    }

    #[test]
    fn test_heredoc_run_is_skipped() {
        let contents = "FROM alpine\nRUN <<EOF\necho hi\nEOF\n";
        let commands = DockerfileParser
            .extract(contents, Path::new("Dockerfile"))
            .unwrap();
        assert!(commands.is_empty());
    }
}
