//! Core types for harvesting and verifying project commands.
//!
//! This crate defines the values passed between pipeline stages and the two
//! pieces of logic every stage shares:
//!
//! - [`Command`]: a candidate shell command harvested from a project file.
//! - [`CommandResult`]: the outcome of executing one command, including
//!   every retry attempt.
//! - [`Classification`]: the `successful`/`failed`/`ignored` bucket.
//! - [`IgnoreRule`] and [`should_ignore`]: the pure candidate filter.
//! - [`ContainerProfile`] and [`ContainerProfiles`]: per-command container
//!   settings used for fallback verification.
//! - [`Repository`]: the thread-safe classification store.
//!
//! # Example
//!
//! ```
//! use command_harvest_core::*;
//!
//! let rules = vec![IgnoreRule::parse("make clean").unwrap()];
//! let repo = Repository::new();
//!
//! for cmd in [
//!     Command::new("make clean", "make_target"),
//!     Command::new("make build", "make_target"),
//! ] {
//!     if should_ignore(&cmd, &rules) {
//!         repo.mark_ignored(cmd, Some("make clean".into()));
//!     } else {
//!         repo.mark_successful(cmd, CommandResult::completed(0, "", "", 0.4));
//!     }
//! }
//!
//! assert_eq!(repo.successful()[0].command.text(), "make build");
//! assert_eq!(repo.ignored()[0].command.text(), "make clean");
//! assert!(repo.failed().is_empty());
//! ```

mod container;
mod ignore;
mod repository;
mod types;

pub use container::{ContainerProfile, ContainerProfiles, VolumeSpec};
pub use ignore::{
    IgnoreRule, IgnoreRuleError, IgnoreRuleSet, LAUNCHER_PREFIXES, RuleMode, first_matching_rule,
    should_ignore,
};
pub use repository::{ClassificationSnapshot, ClassifiedCommand, Repository};
pub use types::*;
