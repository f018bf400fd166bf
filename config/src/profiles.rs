//! Container profile file loading.
//!
//! # Example YAML
//!
//! ```yaml
//! pytest:
//!   image: python:3.9-slim
//!   workdir: /app
//!   volumes:
//!     .: /app
//!     ./cache:
//!       bind: /root/.cache
//!       mode: rw
//!   environment:
//!     PYTHONDONTWRITEBYTECODE: "1"
//! "npm run":
//!   image: node:18
//! ```

use std::fs;
use std::path::Path;

use command_harvest_core::ContainerProfiles;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};

/// Parses profile YAML. A document with only blank or comment lines yields
/// no profiles.
pub fn parse_container_profiles(contents: &str, path: &Path) -> Result<ContainerProfiles> {
    let has_content = contents
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#'));
    if !has_content {
        return Ok(ContainerProfiles::default());
    }
    serde_yaml::from_str(contents).map_err(|err| ConfigError::yaml(path, err))
}

/// Loads a container profile file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, or
/// [`ConfigError::Yaml`] if it is not a mapping of profiles.
pub fn load_container_profiles(path: impl AsRef<Path>) -> Result<ContainerProfiles> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
    let profiles = parse_container_profiles(&contents, path)?;
    debug!(path = %path.display(), profiles = profiles.len(), "Loaded container profiles");
    Ok(profiles)
}

/// Loads a container profile file, degrading to no profiles on any error.
pub fn load_container_profiles_or_empty(path: impl AsRef<Path>) -> ContainerProfiles {
    match load_container_profiles(path) {
        Ok(profiles) => profiles,
        Err(err) => {
            warn!(error = %err, "Container profiles unusable, continuing without profiles");
            ContainerProfiles::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profiles_with_both_volume_forms() {
        let yaml = r#"
pytest:
  image: python:3.9-slim
  workdir: /app
  volumes:
    .: /app
    ./cache:
      bind: /root/.cache
      mode: ro
  environment:
    CI: "true"
"npm run":
  image: node:18
"#;
        let profiles = parse_container_profiles(yaml, Path::new("profiles.yml")).unwrap();
        assert_eq!(profiles.len(), 2);

        let (_, pytest) = profiles.resolve("pytest -q").unwrap();
        assert_eq!(pytest.image.as_deref(), Some("python:3.9-slim"));
        assert_eq!(pytest.workdir.as_deref(), Some("/app"));
        assert_eq!(pytest.volumes["."].container_path(), "/app");
        assert_eq!(pytest.volumes["./cache"].mode(), Some("ro"));
        assert_eq!(pytest.environment["CI"], "true");

        let (key, npm) = profiles.resolve("npm run build").unwrap();
        assert_eq!(key, "npm run");
        assert!(npm.volumes.is_empty());
    }

    #[test]
    fn test_empty_document_has_no_profiles() {
        let profiles = parse_container_profiles("\n# nothing\n", Path::new("p.yml")).unwrap();
        assert!(profiles.is_empty());
    }

    #[test]
    fn test_malformed_profiles_are_errors_but_degrade_on_load() {
        let err = parse_container_profiles("- just\n- a list\n", Path::new("p.yml"));
        assert!(matches!(err, Err(ConfigError::Yaml { .. })));
        assert!(load_container_profiles_or_empty("/nonexistent/profiles.yml").is_empty());
    }
}
