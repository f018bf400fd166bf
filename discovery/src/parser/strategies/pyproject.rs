//! `pyproject.toml` parser.

use std::path::Path;

use command_harvest_core::Command;
use toml::Value;

use super::super::{ParseError, Parser};

pub const KIND_ENTRY_POINT: &str = "python_entry_point";
pub const KIND_POETRY: &str = "poetry_script";
pub const KIND_TASKIPY: &str = "taskipy_task";
pub const KIND_PDM: &str = "pdm_script";

/// Emits commands for declared entry points and task-runner scripts.
///
/// | Table                  | Command                     |
/// |------------------------|-----------------------------|
/// | `[project.scripts]`    | `<name> --help`             |
/// | `[tool.poetry.scripts]`| `poetry run <name> --help`  |
/// | `[tool.taskipy.tasks]` | `task <name>`               |
/// | `[tool.pdm.scripts]`   | `pdm run <name>`            |
pub struct PyprojectParser;

impl Parser for PyprojectParser {
    fn name(&self) -> &'static str {
        "pyproject"
    }

    fn file_patterns(&self) -> &'static [&'static str] {
        &["pyproject.toml"]
    }

    fn extract(&self, contents: &str, _path: &Path) -> Result<Vec<Command>, ParseError> {
        let document: Value = toml::from_str(contents)?;
        let mut commands = Vec::new();

        for (name, target) in table_entries(&document, &["project", "scripts"]) {
            let mut command = Command::new(format!("{name} --help"), KIND_ENTRY_POINT)
                .with_metadata("script", name);
            if let Some(target) = target.as_str() {
                command = command.with_metadata("entry_point", target);
            }
            commands.push(command);
        }

        for (name, target) in table_entries(&document, &["tool", "poetry", "scripts"]) {
            let mut command = Command::new(format!("poetry run {name} --help"), KIND_POETRY)
                .with_metadata("script", name);
            if let Some(target) = target.as_str() {
                command = command.with_metadata("entry_point", target);
            }
            commands.push(command);
        }

        for (name, task) in table_entries(&document, &["tool", "taskipy", "tasks"]) {
            let mut command =
                Command::new(format!("task {name}"), KIND_TASKIPY).with_metadata("task", name);
            if let Some(body) = script_body(task) {
                command = command.with_description(body);
            }
            commands.push(command);
        }

        for (name, script) in table_entries(&document, &["tool", "pdm", "scripts"]) {
            // `_` holds shared options, not a script.
            if name == "_" {
                continue;
            }
            let mut command =
                Command::new(format!("pdm run {name}"), KIND_PDM).with_metadata("script", name);
            if let Some(body) = script_body(script) {
                command = command.with_description(body);
            }
            commands.push(command);
        }

        Ok(commands)
    }
}

fn table_entries<'a>(document: &'a Value, path: &[&str]) -> Vec<(&'a str, &'a Value)> {
    let mut current = document;
    for key in path {
        match current.get(*key) {
            Some(next) => current = next,
            None => return Vec::new(),
        }
    }
    current
        .as_table()
        .map(|table| table.iter().map(|(key, value)| (key.as_str(), value)).collect())
        .unwrap_or_default()
}

/// Script body from either `name = "cmd"` or `name = { cmd = "..." }` forms.
fn script_body(value: &Value) -> Option<String> {
    if let Some(body) = value.as_str() {
        return Some(body.to_string());
    }
    ["cmd", "shell", "call"]
        .iter()
        .find_map(|key| value.get(*key))
        .and_then(|body| match body {
            Value::String(text) => Some(text.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYPROJECT: &str = r#"
[project]
name = "app"

[project.scripts]
app-cli = "app.cli:main"

[tool.poetry.scripts]
serve = "app.server:run"

[tool.taskipy.tasks]
lint = "ruff check ."
test = { cmd = "pytest -q", help = "run tests" }

[tool.pdm.scripts]
_ = { env_file = ".env" }
fmt = { shell = "black ." }
"#;

    #[test]
    fn test_all_script_tables() {
        let commands = PyprojectParser
            .extract(PYPROJECT, Path::new("pyproject.toml"))
            .unwrap();
        let texts: Vec<_> = commands.iter().map(Command::text).collect();
        assert_eq!(
            texts,
            vec![
                "app-cli --help",
                "poetry run serve --help",
                "task lint",
                "task test",
                "pdm run fmt",
            ]
        );
        assert_eq!(commands[0].metadata_str("entry_point"), Some("app.cli:main"));
        assert_eq!(commands[3].description.as_deref(), Some("pytest -q"));
        assert_eq!(commands[4].description.as_deref(), Some("black ."));
        assert_eq!(commands[4].kind, KIND_PDM);
    }

    #[test]
    fn test_project_without_scripts() {
        let commands = PyprojectParser
            .extract("[project]\nname = \"x\"\n", Path::new("pyproject.toml"))
            .unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let err = PyprojectParser
            .extract("[project\n", Path::new("pyproject.toml"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Toml(_)));
    }
}
