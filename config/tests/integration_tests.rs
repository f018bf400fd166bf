use std::fs;
use std::path::Path;

use command_harvest_config::{
    ConfigError, EXCLUSION_MARKER, Settings, append_exclusions, load_container_profiles,
    load_ignore_file, load_ignore_file_or_empty,
};
use command_harvest_core::Command;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Ignore file + exclusions
// ---------------------------------------------------------------------------

#[test]
fn test_appended_exclusions_are_honored_by_next_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), ".cmd-harvest-ignore", "# project ignores\nmake clean\n");

    let added = append_exclusions(&path, &["make lint".to_string()]).unwrap();
    assert_eq!(added, 1);

    let rules = load_ignore_file(&path).unwrap();
    assert_eq!(rules.len(), 2);
    assert!(rules.should_ignore(&Command::new("make lint", "make_target")));
    assert!(rules.should_ignore(&Command::new("make clean", "make_target")));
    assert!(!rules.should_ignore(&Command::new("make build", "make_target")));
    assert!(!rules.should_ignore(&Command::new("make lint-fix", "make_target")));

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents.matches(EXCLUSION_MARKER).count(), 1);
}

#[test]
fn test_ignore_file_with_bad_lines_keeps_good_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "ignore", "re:([\nnpm run deploy*\n");
    let rules = load_ignore_file_or_empty(&path);
    assert_eq!(rules.len(), 1);
    assert!(rules.should_ignore(&Command::new("npm run deploy:staging", "npm_script")));
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[test]
fn test_settings_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".cmd-harvest.yml");

    let mut settings = Settings::default();
    settings.timeout_secs = 12.0;
    settings.exclude = vec!["legacy/**".to_string()];
    settings.container.verify_slow = true;
    settings.save(&path).unwrap();

    let loaded = Settings::load(&path).unwrap();
    assert_eq!(loaded, settings);
    assert_eq!(Settings::find_in(dir.path()), Some(path));
}

#[test]
fn test_settings_load_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "settings.yml", "timeout_secs: -1\n");
    assert!(matches!(
        Settings::load(&path),
        Err(ConfigError::InvalidSetting { field: "timeout_secs", .. })
    ));

    let path = write(dir.path(), "broken.yml", "retries: [1, 2\n");
    assert!(matches!(Settings::load(&path), Err(ConfigError::Yaml { .. })));
}

#[test]
fn test_comment_only_settings_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "settings.yml", "# nothing yet\n");
    assert_eq!(Settings::load(&path).unwrap(), Settings::default());
}

// ---------------------------------------------------------------------------
// Container profiles
// ---------------------------------------------------------------------------

#[test]
fn test_profile_file_roundtrip_through_loader() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "containers.yml",
        "pytest:\n  image: python:3.9-slim\n  environment:\n    CI: \"1\"\n",
    );
    let profiles = load_container_profiles(&path).unwrap();
    let (_, profile) = profiles.resolve("pytest -q").unwrap();
    assert_eq!(profile.image.as_deref(), Some("python:3.9-slim"));
    assert_eq!(profile.environment["CI"], "1");
}
