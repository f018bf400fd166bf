//! `package.json` script parser.

use std::path::Path;

use command_harvest_core::Command;
use serde_json::Value;

use super::super::{ParseError, Parser};

pub const KIND: &str = "npm_script";

/// Scripts the package manager runs implicitly around install and publish.
const LIFECYCLE_SCRIPTS: &[&str] = &[
    "preinstall",
    "install",
    "postinstall",
    "prepublish",
    "preprepare",
    "prepare",
    "postprepare",
    "prepublishOnly",
    "prepack",
    "postpack",
    "publish",
    "postpublish",
];

/// Emits `<manager> run <script>` for each entry under `scripts`.
///
/// The package manager is chosen from a lockfile next to the manifest
/// (`pnpm-lock.yaml`, `yarn.lock`), defaulting to npm. Lifecycle hooks and
/// `pre`/`post` wrappers of other scripts are skipped since the manager runs
/// them implicitly.
pub struct NpmParser;

impl Parser for NpmParser {
    fn name(&self) -> &'static str {
        "npm"
    }

    fn file_patterns(&self) -> &'static [&'static str] {
        &["package.json"]
    }

    fn extract(&self, contents: &str, path: &Path) -> Result<Vec<Command>, ParseError> {
        let manifest: Value = serde_json::from_str(contents)?;
        let Some(scripts) = manifest.get("scripts") else {
            return Ok(Vec::new());
        };
        let Some(scripts) = scripts.as_object() else {
            return Err(ParseError::Invalid("`scripts` is not an object".to_string()));
        };

        let manager = package_manager(path);
        let commands = scripts
            .iter()
            .filter(|(name, _)| !is_hook(name, |other| scripts.contains_key(other)))
            .filter_map(|(name, body)| {
                let body = body.as_str()?;
                Some(
                    Command::new(format!("{manager} run {name}"), KIND)
                        .with_description(body.to_string())
                        .with_metadata("script", name.as_str())
                        .with_metadata("script_body", body)
                        .with_metadata("package_manager", manager),
                )
            })
            .collect();
        Ok(commands)
    }
}

fn is_hook(name: &str, exists: impl Fn(&str) -> bool) -> bool {
    if LIFECYCLE_SCRIPTS.contains(&name) {
        return true;
    }
    ["pre", "post"].iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|base| !base.is_empty() && exists(base))
    })
}

fn package_manager(manifest: &Path) -> &'static str {
    let Some(dir) = manifest.parent() else {
        return "npm";
    };
    if dir.join("pnpm-lock.yaml").is_file() {
        "pnpm"
    } else if dir.join("yarn.lock").is_file() {
        "yarn"
    } else {
        "npm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "name": "web",
        "scripts": {
            "build": "tsc -p .",
            "prebuild": "rimraf dist",
            "test": "jest",
            "postinstall": "husky install",
            "preview": "vite preview"
        }
    }"#;

    fn texts(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(Command::text).collect()
    }

    #[test]
    fn test_scripts_become_npm_run_commands() {
        let commands = NpmParser
            .extract(MANIFEST, Path::new("/nonexistent/package.json"))
            .unwrap();
        assert_eq!(texts(&commands), vec!["npm run build", "npm run preview", "npm run test"]);
        assert_eq!(commands[0].metadata_str("script_body"), Some("tsc -p ."));
        assert_eq!(commands[0].description.as_deref(), Some("tsc -p ."));
    }

    #[test]
    fn test_lockfile_selects_package_manager() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        let commands = NpmParser
            .extract(MANIFEST, &dir.path().join("package.json"))
            .unwrap();
        assert!(texts(&commands).contains(&"yarn run build"));
        assert_eq!(commands[0].metadata_str("package_manager"), Some("yarn"));
    }

    #[test]
    fn test_manifest_without_scripts_yields_nothing() {
        let commands = NpmParser
            .extract(r#"{"name": "lib"}"#, Path::new("package.json"))
            .unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let err = NpmParser.extract("{ not json", Path::new("package.json")).unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }
}
