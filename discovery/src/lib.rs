//! Project file discovery and candidate command harvesting.
//!
//! This crate walks a project tree, dispatches each recognized file to a
//! format-specific [`Parser`](parser::Parser) and returns the harvested
//! [`Command`](command_harvest_core::Command)s with their provenance.
//!
//! # Main entry points
//!
//! - [`scan_project`] walks the tree and parses every recognized file.
//! - [`discover_files`] lists recognized files without reading them.
//! - [`ParserRegistry`] selects the parser for a path; custom parsers can be
//!   registered alongside the built-in ones.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//!
//! use command_harvest_discovery::ParserRegistry;
//!
//! let registry = ParserRegistry::with_builtin();
//! let parser = registry.select(Path::new("Makefile")).unwrap();
//! let commands = parser
//!     .extract("build:\n\tcc main.c\n", Path::new("Makefile"))
//!     .unwrap();
//! assert_eq!(commands[0].text(), "make build");
//! ```

pub mod discover;
pub mod parser;

pub use discover::{
    DEFAULT_EXCLUDED_DIRS, DEFAULT_MAX_DEPTH, DiscoveryError, DiscoveryOptions, MAX_FILE_BYTES,
    ParseFailure, ScanOutcome, discover_files, scan_project,
};
pub use parser::{ParseError, Parser, ParserRegistry};
