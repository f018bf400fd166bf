//! Pipeline settings file.
//!
//! Controls execution limits, discovery scope and container fallback. Every
//! field is optional; missing fields take the defaults shown below.
//!
//! # Example YAML
//!
//! ```yaml
//! timeout_secs: 60
//! retries: 0
//! retry_delay_ms: 1000
//! backoff_multiplier: 2.0
//! slow_fraction: 0.8
//! jobs: 1
//! max_depth: 6
//! include: []
//! exclude:
//!   - "legacy/**"
//! container:
//!   default_image: "ubuntu:22.04"
//!   default_workdir: "/workspace"
//!   timeout_secs: 300
//!   auto_threshold: 0.5
//!   verify_slow: false
//! ```

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Settings file names looked up in the project root, in order.
pub const SETTINGS_FILE_NAMES: &[&str] = &[".cmd-harvest.yml", ".cmd-harvest.yaml"];

/// Default ignore file name in the project root.
pub const DEFAULT_IGNORE_FILE: &str = ".cmd-harvest-ignore";

/// Default container profile file name in the project root.
pub const DEFAULT_PROFILES_FILE: &str = ".cmd-harvest-containers.yml";

pub const DEFAULT_TIMEOUT_SECS: f64 = 60.0;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_SLOW_FRACTION: f64 = 0.8;
pub const DEFAULT_MAX_DEPTH: usize = 6;
pub const DEFAULT_CONTAINER_IMAGE: &str = "ubuntu:22.04";
pub const DEFAULT_CONTAINER_WORKDIR: &str = "/workspace";
pub const DEFAULT_CONTAINER_TIMEOUT_SECS: f64 = 300.0;
pub const DEFAULT_AUTO_CONTAINER_THRESHOLD: f64 = 0.5;
/// Upper bound for any timeout, in seconds (one week).
pub const MAX_TIMEOUT_SECS: f64 = 604_800.0;

/// Converts a timeout in seconds to a [`Duration`], clamped to
/// `[0, MAX_TIMEOUT_SECS]`. Non-finite or negative values become zero.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use command_harvest_config::{MAX_TIMEOUT_SECS, timeout_duration};
///
/// assert_eq!(timeout_duration(1.5), Duration::from_millis(1500));
/// assert_eq!(timeout_duration(1e20), Duration::from_secs_f64(MAX_TIMEOUT_SECS));
/// ```
pub fn timeout_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs.min(MAX_TIMEOUT_SECS)).unwrap_or(Duration::ZERO)
}

/// Container fallback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Image used when no profile matches a command.
    pub default_image: String,
    /// Working directory inside the container when no profile sets one.
    pub default_workdir: String,
    /// Upper bound on one container run, including image pull.
    pub timeout_secs: f64,
    /// Fraction of failed commands that triggers batch re-verification of
    /// every failure in a container.
    pub auto_threshold: f64,
    /// Also verify commands that succeeded close to their timeout.
    pub verify_slow: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            default_image: DEFAULT_CONTAINER_IMAGE.to_string(),
            default_workdir: DEFAULT_CONTAINER_WORKDIR.to_string(),
            timeout_secs: DEFAULT_CONTAINER_TIMEOUT_SECS,
            auto_threshold: DEFAULT_AUTO_CONTAINER_THRESHOLD,
            verify_slow: false,
        }
    }
}

/// Top-level pipeline settings.
///
/// # Examples
///
/// ```
/// use command_harvest_config::Settings;
///
/// let settings: Settings = serde_yaml::from_str("timeout_secs: 5\nretries: 2\n").unwrap();
/// assert_eq!(settings.timeout_secs, 5.0);
/// assert_eq!(settings.retries, 2);
/// assert_eq!(settings.jobs, 1);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timeout_secs: f64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of the timeout at which a successful command is flagged slow.
    pub slow_fraction: f64,
    /// Worker threads for command execution. `1` runs sequentially.
    pub jobs: usize,
    pub max_depth: usize,
    /// File globs that restrict discovery when non-empty.
    pub include: Vec<String>,
    /// File or directory globs excluded from discovery.
    pub exclude: Vec<String>,
    /// Shell used to run command text.
    pub shell: String,
    pub container: ContainerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: 0,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            slow_fraction: DEFAULT_SLOW_FRACTION,
            jobs: 1,
            max_depth: DEFAULT_MAX_DEPTH,
            include: Vec::new(),
            exclude: Vec::new(),
            shell: "sh".to_string(),
            container: ContainerSettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from a YAML file and validates them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if parsing fails, or
    /// [`ConfigError::InvalidSetting`] if a value is out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
        let has_content = raw
            .lines()
            .map(str::trim)
            .any(|line| !line.is_empty() && !line.starts_with('#'));
        let settings: Settings = if has_content {
            serde_yaml::from_str(&raw).map_err(|err| ConfigError::yaml(path, err))?
        } else {
            Settings::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Saves the settings as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be written, or
    /// [`ConfigError::Yaml`] if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = fs::File::create(path).map_err(|err| ConfigError::io(path, err))?;
        serde_yaml::to_writer(BufWriter::new(file), self).map_err(|err| ConfigError::yaml(path, err))
    }

    /// Finds a settings file in `root`, if one exists.
    pub fn find_in(root: &Path) -> Option<PathBuf> {
        SETTINGS_FILE_NAMES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file())
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
            ConfigError::InvalidSetting {
                field,
                message: message.into(),
            }
        }

        if !(self.timeout_secs > 0.0 && self.timeout_secs <= MAX_TIMEOUT_SECS) {
            return Err(invalid(
                "timeout_secs",
                format!("must be a positive number of at most {MAX_TIMEOUT_SECS} seconds"),
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(invalid("backoff_multiplier", "must be at least 1.0"));
        }
        if !(self.slow_fraction > 0.0 && self.slow_fraction <= 1.0) {
            return Err(invalid("slow_fraction", "must be in (0, 1]"));
        }
        if self.jobs == 0 {
            return Err(invalid("jobs", "must be at least 1"));
        }
        if self.shell.trim().is_empty() {
            return Err(invalid("shell", "cannot be empty"));
        }
        let container_timeout = self.container.timeout_secs;
        if !(container_timeout > 0.0 && container_timeout <= MAX_TIMEOUT_SECS) {
            return Err(invalid(
                "container.timeout_secs",
                format!("must be a positive number of at most {MAX_TIMEOUT_SECS} seconds"),
            ));
        }
        if !(0.0..=1.0).contains(&self.container.auto_threshold) {
            return Err(invalid("container.auto_threshold", "must be in [0, 1]"));
        }
        if self.container.default_image.trim().is_empty() {
            return Err(invalid("container.default_image", "cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let settings: Settings =
            serde_yaml::from_str("retries: 3\ncontainer:\n  auto_threshold: 0.25\n").unwrap();
        assert_eq!(settings.retries, 3);
        assert_eq!(settings.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(settings.container.auto_threshold, 0.25);
        assert_eq!(settings.container.default_image, DEFAULT_CONTAINER_IMAGE);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut settings = Settings::default();
        settings.slow_fraction = 1.5;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidSetting { field: "slow_fraction", .. })
        ));

        let mut settings = Settings::default();
        settings.jobs = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.container.auto_threshold = -0.1;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.backoff_multiplier = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_timeouts() {
        let mut settings = Settings::default();
        settings.timeout_secs = 1e20;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidSetting { field: "timeout_secs", .. })
        ));

        let mut settings = Settings::default();
        settings.container.timeout_secs = f64::INFINITY;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.timeout_secs = MAX_TIMEOUT_SECS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_timeout_duration_clamps_instead_of_panicking() {
        assert_eq!(timeout_duration(1e20), Duration::from_secs(604_800));
        assert_eq!(timeout_duration(f64::INFINITY), Duration::from_secs(604_800));
        assert_eq!(timeout_duration(f64::NAN), Duration::ZERO);
        assert_eq!(timeout_duration(-3.0), Duration::ZERO);
        assert_eq!(timeout_duration(0.25), Duration::from_millis(250));
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }
}
