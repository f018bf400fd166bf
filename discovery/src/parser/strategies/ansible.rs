//! Ansible playbook and task file parser.

use std::path::Path;

use command_harvest_core::Command;
use serde_yaml::Value;

use super::super::util::file_name;
use super::super::{ParseError, Parser};

pub const KIND_TASK: &str = "ansible_task";
pub const KIND_SYNTAX_CHECK: &str = "ansible_syntax_check";

const SHELL_MODULES: &[&str] = &[
    "shell",
    "command",
    "ansible.builtin.shell",
    "ansible.builtin.command",
    "ansible.legacy.shell",
    "ansible.legacy.command",
];

/// Task list keys of a play.
const PLAY_TASK_KEYS: &[&str] = &["pre_tasks", "tasks", "post_tasks", "handlers"];

/// Block section keys of a task.
const BLOCK_KEYS: &[&str] = &["block", "rescue", "always"];

/// Free-form arguments that configure the module rather than the command.
const INLINE_ARGS: &[&str] = &["chdir=", "creates=", "removes=", "executable="];

/// Emits the command of every `shell`/`command` task.
///
/// Handles playbooks (a list of plays) and bare task files (a list of
/// tasks), descending into `block`/`rescue`/`always`. Commands containing
/// Jinja expressions are skipped since they cannot run outside Ansible.
/// Playbooks also yield an `ansible-playbook --syntax-check` command.
pub struct AnsibleParser;

impl Parser for AnsibleParser {
    fn name(&self) -> &'static str {
        "ansible"
    }

    fn file_patterns(&self) -> &'static [&'static str] {
        &[
            "*playbook*.yml",
            "*playbook*.yaml",
            "site.yml",
            "site.yaml",
            "tasks/*.yml",
            "*/tasks/*.yml",
            "*/handlers/*.yml",
        ]
    }

    fn extract(&self, contents: &str, path: &Path) -> Result<Vec<Command>, ParseError> {
        let document: Value = serde_yaml::from_str(contents)?;
        let Some(entries) = document.as_sequence() else {
            return Ok(Vec::new());
        };

        let mut commands = Vec::new();
        let is_playbook = entries.iter().any(is_play);
        if is_playbook {
            let file = file_name(path);
            commands.push(
                Command::new(format!("ansible-playbook --syntax-check {file}"), KIND_SYNTAX_CHECK)
                    .with_description(format!("Syntax check {file}")),
            );
            for play in entries.iter().filter(|entry| is_play(entry)) {
                for key in PLAY_TASK_KEYS {
                    if let Some(tasks) = play.get(*key).and_then(Value::as_sequence) {
                        collect_tasks(tasks, &mut commands);
                    }
                }
            }
        } else {
            collect_tasks(entries, &mut commands);
        }

        Ok(commands)
    }
}

fn is_play(entry: &Value) -> bool {
    entry.get("hosts").is_some() || entry.get("import_playbook").is_some()
}

fn collect_tasks(tasks: &[Value], commands: &mut Vec<Command>) {
    for task in tasks {
        let mut nested = false;
        for key in BLOCK_KEYS {
            if let Some(block) = task.get(*key).and_then(Value::as_sequence) {
                collect_tasks(block, commands);
                nested = true;
            }
        }
        if nested {
            continue;
        }
        if let Some(command) = task_command(task) {
            commands.push(command);
        }
    }
}

fn task_command(task: &Value) -> Option<Command> {
    let (module, args) = SHELL_MODULES
        .iter()
        .find_map(|module| task.get(*module).map(|args| (*module, args)))?;

    let (mut text, mut chdir) = match args {
        Value::String(raw) => split_inline_args(raw),
        Value::Mapping(_) => (
            args.get("cmd").and_then(Value::as_str)?.trim().to_string(),
            args.get("chdir").and_then(Value::as_str).map(str::to_string),
        ),
        _ => return None,
    };
    if let Some(dir) = task
        .get("args")
        .and_then(|args| args.get("chdir"))
        .and_then(Value::as_str)
    {
        chdir = Some(dir.to_string());
    }
    text = text.trim().to_string();
    if text.is_empty() || text.contains("{{") || text.contains("{%") {
        return None;
    }

    let mut command = Command::new(text, KIND_TASK).with_metadata("module", module);
    if let Some(name) = task.get("name").and_then(Value::as_str) {
        command = command.with_description(name);
    }
    if let Some(dir) = chdir {
        command = command.with_metadata("chdir", dir);
    }
    Some(command)
}

/// Splits trailing `chdir=...`-style module arguments off a free-form
/// command string.
fn split_inline_args(raw: &str) -> (String, Option<String>) {
    let mut words = raw.split_whitespace().collect::<Vec<_>>();
    let mut chdir = None;
    while let Some(last) = words.last() {
        if !INLINE_ARGS.iter().any(|arg| last.starts_with(arg)) {
            break;
        }
        if let Some(dir) = last.strip_prefix("chdir=") {
            chdir = Some(dir.to_string());
        }
        words.pop();
    }
    if chdir.is_none() && words.len() == raw.split_whitespace().count() {
        return (raw.to_string(), None);
    }
    (words.join(" "), chdir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(Command::text).collect()
    }

    #[test]
    fn test_playbook_tasks_blocks_and_syntax_check() {
        let contents = "\
- hosts: all
  pre_tasks:
    - name: Refresh cache
      ansible.builtin.command: apt-get update
  tasks:
    - name: Build
      shell: make build chdir=/srv/app
    - block:
        - name: Migrate
          command:
            cmd: ./manage.py migrate
            chdir: /srv/app
      rescue:
        - name: Report
          shell: echo failed
    - name: Templated
      shell: echo {{ item }}
    - name: Copy
      copy:
        src: a
        dest: b
";
        let commands = AnsibleParser
            .extract(contents, Path::new("deploy/playbook.yml"))
            .unwrap();
        assert_eq!(
            texts(&commands),
            vec![
                "ansible-playbook --syntax-check playbook.yml",
                "apt-get update",
                "make build",
                "./manage.py migrate",
                "echo failed",
            ]
        );
        assert_eq!(commands[1].description.as_deref(), Some("Refresh cache"));
        assert_eq!(commands[2].metadata_str("chdir"), Some("/srv/app"));
        assert_eq!(commands[3].metadata_str("chdir"), Some("/srv/app"));
        assert_eq!(commands[3].metadata_str("module"), Some("command"));
    }

    #[test]
    fn test_task_file_without_plays() {
        let contents = "- name: Restart\n  shell: systemctl restart app\n";
        let commands = AnsibleParser
            .extract(contents, Path::new("roles/app/tasks/main.yml"))
            .unwrap();
        assert_eq!(texts(&commands), vec!["systemctl restart app"]);
        assert_eq!(commands[0].kind, KIND_TASK);
    }

    #[test]
    fn test_non_list_document_yields_nothing() {
        let commands = AnsibleParser
            .extract("key: value\n", Path::new("site.yml"))
            .unwrap();
        assert!(commands.is_empty());
    }
}
