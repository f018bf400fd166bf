//! Built-in format-specific parsers.
//!
//! Each parser is small and independent. They are registered in the order
//! returned by [`builtin_parsers`]; dispatch specificity makes that order
//! matter only for patterns of equal specificity.

pub mod ansible;
pub mod compose;
pub mod dockerfile;
pub mod justfile;
pub mod makefile;
pub mod npm;
pub mod pyproject;

use super::Parser;

/// Every built-in parser, in registration order.
pub fn builtin_parsers() -> Vec<Box<dyn Parser>> {
    vec![
        Box::new(makefile::MakefileParser),
        Box::new(npm::NpmParser),
        Box::new(justfile::JustfileParser),
        Box::new(dockerfile::DockerfileParser),
        Box::new(compose::ComposeParser),
        Box::new(ansible::AnsibleParser),
        Box::new(pyproject::PyprojectParser),
    ]
}
