//! Container profile types.
//!
//! A profile maps a command-text prefix or substring to the image and mount
//! layout used when re-running that command inside a container. Profiles
//! are read-only once loaded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Volume declaration: either a bare container path or a `{bind, mode}`
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeSpec {
    Path(String),
    Bind {
        bind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
}

impl VolumeSpec {
    pub fn container_path(&self) -> &str {
        match self {
            Self::Path(path) => path,
            Self::Bind { bind, .. } => bind,
        }
    }

    pub fn mode(&self) -> Option<&str> {
        match self {
            Self::Path(_) => None,
            Self::Bind { mode, .. } => mode.as_deref(),
        }
    }
}

/// Container settings for commands matching one profile key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Host path to container mount.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

/// All loaded profiles, keyed by command-text prefix or substring.
///
/// # Examples
///
/// ```
/// use command_harvest_core::{ContainerProfile, ContainerProfiles};
///
/// let mut profiles = ContainerProfiles::default();
/// profiles.insert("pytest", ContainerProfile {
///     image: Some("python:3.9-slim".into()),
///     ..Default::default()
/// });
///
/// let (key, profile) = profiles.resolve("pytest -q").unwrap();
/// assert_eq!(key, "pytest");
/// assert_eq!(profile.image.as_deref(), Some("python:3.9-slim"));
/// assert!(profiles.resolve("make lint").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerProfiles {
    entries: BTreeMap<String, ContainerProfile>,
}

impl ContainerProfiles {
    pub fn new(entries: BTreeMap<String, ContainerProfile>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, key: impl Into<String>, profile: ContainerProfile) {
        self.entries.insert(key.into(), profile);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContainerProfile)> {
        self.entries.iter().map(|(key, profile)| (key.as_str(), profile))
    }

    /// Resolves the profile for `command_text`.
    ///
    /// The longest key that prefixes the text wins; otherwise the longest key
    /// contained anywhere in the text; otherwise `None`.
    pub fn resolve(&self, command_text: &str) -> Option<(&str, &ContainerProfile)> {
        let text = command_text.trim();
        fn longest<'a>(
            candidates: Vec<(&'a str, &'a ContainerProfile)>,
        ) -> Option<(&'a str, &'a ContainerProfile)> {
            candidates.into_iter().max_by_key(|(key, _)| key.len())
        }

        let prefixed = self
            .iter()
            .filter(|(key, _)| !key.is_empty() && text.starts_with(key))
            .collect::<Vec<_>>();
        if let Some(found) = longest(prefixed) {
            return Some(found);
        }

        let contained = self
            .iter()
            .filter(|(key, _)| !key.is_empty() && text.contains(key))
            .collect::<Vec<_>>();
        longest(contained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(image: &str) -> ContainerProfile {
        ContainerProfile {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_prefers_longest_prefix() {
        let mut profiles = ContainerProfiles::default();
        profiles.insert("npm", profile("node:18"));
        profiles.insert("npm run e2e", profile("cypress/included"));
        let (key, found) = profiles.resolve("npm run e2e -- --headless").unwrap();
        assert_eq!(key, "npm run e2e");
        assert_eq!(found.image.as_deref(), Some("cypress/included"));
    }

    #[test]
    fn test_resolve_prefix_beats_longer_substring() {
        let mut profiles = ContainerProfiles::default();
        profiles.insert("make", profile("gcc"));
        profiles.insert("pytest tests", profile("python"));
        let (key, _) = profiles.resolve("make pytest tests").unwrap();
        assert_eq!(key, "make");
    }

    #[test]
    fn test_resolve_falls_back_to_substring() {
        let mut profiles = ContainerProfiles::default();
        profiles.insert("cargo", profile("rust:1"));
        let (key, _) = profiles.resolve("cd sub && cargo test").unwrap();
        assert_eq!(key, "cargo");
    }

    #[test]
    fn test_volume_spec_deserializes_both_forms() {
        let parsed: ContainerProfile = serde_json::from_value(serde_json::json!({
            "image": "python:3.9-slim",
            "workdir": "/app",
            "volumes": {
                "./data": "/data",
                "./cache": { "bind": "/cache", "mode": "ro" }
            },
            "environment": { "PYTHONPATH": "/app" }
        }))
        .unwrap();
        assert_eq!(parsed.volumes["./data"].container_path(), "/data");
        assert_eq!(parsed.volumes["./data"].mode(), None);
        assert_eq!(parsed.volumes["./cache"].container_path(), "/cache");
        assert_eq!(parsed.volumes["./cache"].mode(), Some("ro"));
        assert_eq!(parsed.environment["PYTHONPATH"], "/app");
    }
}
