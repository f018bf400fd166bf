//! Docker Compose file parser.

use std::path::Path;

use command_harvest_core::Command;
use serde_yaml::Value;

use super::super::util::file_name;
use super::super::{ParseError, Parser};

pub const KIND_CONFIG: &str = "compose_config";
pub const KIND_COMMAND: &str = "compose_command";

/// Emits a config validation command for the file plus each service's
/// `command` override.
///
/// Service commands carry the service image under the `image` metadata key.
pub struct ComposeParser;

impl Parser for ComposeParser {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn file_patterns(&self) -> &'static [&'static str] {
        &[
            "docker-compose.yml",
            "docker-compose.yaml",
            "compose.yml",
            "compose.yaml",
            "docker-compose.*.yml",
            "docker-compose.*.yaml",
        ]
    }

    fn extract(&self, contents: &str, path: &Path) -> Result<Vec<Command>, ParseError> {
        let document: Value = serde_yaml::from_str(contents)?;
        let Some(services) = document.get("services").and_then(Value::as_mapping) else {
            return Ok(Vec::new());
        };

        let file = file_name(path);
        let mut commands = vec![
            Command::new(format!("docker compose -f {file} config --quiet"), KIND_CONFIG)
                .with_description(format!("Validate {file}")),
        ];

        for (name, service) in services {
            let Some(name) = name.as_str() else {
                continue;
            };
            let Some(text) = service.get("command").and_then(render_command) else {
                continue;
            };
            let mut command = Command::new(text, KIND_COMMAND)
                .with_description(format!("Command of service `{name}`"))
                .with_metadata("service", name);
            if let Some(image) = service.get("image").and_then(Value::as_str) {
                command = command.with_metadata("image", image);
            }
            commands.push(command);
        }

        Ok(commands)
    }
}

/// Renders a `command:` value given as a string or a list of arguments.
fn render_command(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::String(arg) => quote_arg(arg),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => String::new(),
            })
            .filter(|arg| !arg.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || r#"'"$`\;&|<>"#.contains(c)) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = "\
services:
  web:
    image: node:20
    command: npm start
  worker:
    image: python:3.11
    command: [\"celery\", \"-A\", \"app worker\"]
  db:
    image: postgres:16
";

    #[test]
    fn test_validation_and_service_commands() {
        let commands = ComposeParser
            .extract(COMPOSE, Path::new("deploy/docker-compose.yml"))
            .unwrap();
        let texts: Vec<_> = commands.iter().map(Command::text).collect();
        assert_eq!(
            texts,
            vec![
                "docker compose -f docker-compose.yml config --quiet",
                "npm start",
                "celery -A 'app worker'",
            ]
        );
        assert_eq!(commands[1].metadata_str("image"), Some("node:20"));
        assert_eq!(commands[2].metadata_str("service"), Some("worker"));
        assert_eq!(commands[2].kind, KIND_COMMAND);
    }

    #[test]
    fn test_file_without_services_yields_nothing() {
        let commands = ComposeParser
            .extract("version: '3'\n", Path::new("compose.yml"))
            .unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        let err = ComposeParser
            .extract("services: [unclosed", Path::new("compose.yml"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Yaml(_)));
    }
}
