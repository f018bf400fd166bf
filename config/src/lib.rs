//! Declarative inputs for the command harvesting pipeline.
//!
//! This crate loads everything the pipeline reads once per run and never
//! mutates during execution:
//!
//! - ignore files ([`load_ignore_file`]): one [`IgnoreRule`] per line;
//! - container profiles ([`load_container_profiles`]): YAML mapping of
//!   command prefixes to images, mounts and environment;
//! - pipeline settings ([`Settings`]): timeouts, retries, discovery scope
//!   and container fallback thresholds.
//!
//! It also owns the one write path into configuration:
//! [`append_exclusions`] records container-verified failures in an ignore
//! file.
//!
//! Broken ignore and profile files degrade to empty via the `*_or_empty`
//! loaders. A broken settings file is an error.
//!
//! # Quick start
//!
//! ```no_run
//! use command_harvest_config::{Settings, load_container_profiles_or_empty, load_ignore_file_or_empty};
//!
//! let settings = Settings::load(".cmd-harvest.yml").unwrap();
//! let rules = load_ignore_file_or_empty(".cmd-harvest-ignore");
//! let profiles = load_container_profiles_or_empty(".cmd-harvest-containers.yml");
//! println!("{} rules, {} profiles, timeout {}s", rules.len(), profiles.len(), settings.timeout_secs);
//! ```
//!
//! [`IgnoreRule`]: command_harvest_core::IgnoreRule

mod error;
mod exclusions;
mod ignore_file;
mod profiles;
mod settings;

pub use error::{ConfigError, Result};
pub use exclusions::{EXCLUSION_MARKER, append_exclusions, exclusion_rule_for};
pub use ignore_file::{
    ParsedIgnoreFile, load_ignore_file, load_ignore_file_or_empty, parse_ignore_rules,
};
pub use profiles::{
    load_container_profiles, load_container_profiles_or_empty, parse_container_profiles,
};
pub use settings::*;
