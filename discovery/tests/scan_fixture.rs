use std::path::{Path, PathBuf};

use command_harvest_core::Command;
use command_harvest_discovery::{DiscoveryOptions, ParseError, Parser, ParserRegistry, scan_project};

fn sample_project() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("sample-project")
}

fn find<'a>(commands: &'a [Command], text: &str) -> &'a Command {
    commands
        .iter()
        .find(|command| command.text() == text)
        .unwrap_or_else(|| panic!("missing command `{text}`"))
}

// ---------------------------------------------------------------------------
// Full project scan
// ---------------------------------------------------------------------------

#[test]
fn test_scan_sample_project_harvests_every_format() {
    let outcome =
        scan_project(&DiscoveryOptions::new(sample_project()), &ParserRegistry::default()).unwrap();

    let texts: Vec<_> = outcome.commands.iter().map(Command::text).collect();
    assert_eq!(
        texts,
        vec![
            "make build",
            "make test",
            "make clean",
            "systemctl restart app",
            "ansible-playbook --syntax-check site.yml",
            "df -h",
            "pip install --no-cache-dir -r requirements.txt",
            "docker compose -f docker-compose.yml config --quiet",
            "python -m app.server",
            "just fmt",
            "app --help",
            "task check",
            "pnpm run build",
            "pnpm run lint",
        ]
    );
    assert_eq!(outcome.files_scanned, 8);
    assert!(outcome.parse_errors.is_empty());
}

#[test]
fn test_scan_records_provenance() {
    let outcome =
        scan_project(&DiscoveryOptions::new(sample_project()), &ParserRegistry::default()).unwrap();

    let build = find(&outcome.commands, "make build");
    assert_eq!(build.kind, "make_target");
    assert_eq!(build.description.as_deref(), Some("Compile the project"));
    assert_eq!(build.source_file.as_deref(), Some(Path::new("Makefile")));
    assert_eq!(build.working_directory, None);

    let restart = find(&outcome.commands, "systemctl restart app");
    assert_eq!(
        restart.working_directory.as_deref(),
        Some(Path::new("deploy/roles/app/tasks"))
    );
    assert_eq!(restart.description.as_deref(), Some("Restart service"));

    let pip = find(&outcome.commands, "pip install --no-cache-dir -r requirements.txt");
    assert_eq!(pip.metadata_str("image"), Some("python:3.11-slim"));
    assert_eq!(pip.working_directory.as_deref(), Some(Path::new("docker")));
}

#[test]
fn test_node_modules_is_never_scanned() {
    let outcome =
        scan_project(&DiscoveryOptions::new(sample_project()), &ParserRegistry::default()).unwrap();
    assert!(outcome.commands.iter().all(|command| command.text() != "npm run never"));
}

#[test]
fn test_exclude_glob_drops_directory() {
    let options = DiscoveryOptions::new(sample_project()).with_exclude(vec!["deploy".to_string()]);
    let outcome = scan_project(&options, &ParserRegistry::default()).unwrap();
    assert!(
        outcome
            .commands
            .iter()
            .all(|command| !command.kind.starts_with("ansible"))
    );
}

// ---------------------------------------------------------------------------
// Custom parsers
// ---------------------------------------------------------------------------

struct ReadmeParser;

impl Parser for ReadmeParser {
    fn name(&self) -> &'static str {
        "readme"
    }

    fn file_patterns(&self) -> &'static [&'static str] {
        &["README.md"]
    }

    fn extract(&self, _contents: &str, _path: &Path) -> Result<Vec<Command>, ParseError> {
        Ok(vec![Command::new("cat README.md", "readme")])
    }
}

#[test]
fn test_custom_parser_joins_dispatch() {
    let mut registry = ParserRegistry::with_builtin();
    registry.register(Box::new(ReadmeParser));

    let outcome = scan_project(&DiscoveryOptions::new(sample_project()), &registry).unwrap();
    let readme = find(&outcome.commands, "cat README.md");
    assert_eq!(readme.source_file.as_deref(), Some(Path::new("README.md")));
    assert_eq!(outcome.files_scanned, 9);
}
