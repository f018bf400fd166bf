//! Child environment assembly.
//!
//! Precedence, lowest first: the inherited process environment, the
//! detected virtualenv (its `bin` directory prepended to `PATH` and
//! `VIRTUAL_ENV` set), then the command's own `env` metadata.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;

use command_harvest_core::Command;
use tracing::debug;

/// Virtualenv directory names probed in the project root.
pub const VENV_DIR_NAMES: &[&str] = &["venv", ".venv"];

/// Finds the virtualenv to activate for commands under `root`.
///
/// An active `VIRTUAL_ENV` wins over a `venv`/`.venv` directory in the root.
pub fn detect_virtualenv(root: &Path) -> Option<PathBuf> {
    if let Some(active) = env::var_os("VIRTUAL_ENV").filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(active));
    }
    VENV_DIR_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|dir| venv_bin(dir).is_dir())
}

fn venv_bin(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts")
    } else {
        venv.join("bin")
    }
}

/// Environment overlay applied to every spawned command.
#[derive(Debug, Clone, Default)]
pub struct ExecutionEnvironment {
    virtualenv: Option<PathBuf>,
}

impl ExecutionEnvironment {
    pub fn new(virtualenv: Option<PathBuf>) -> Self {
        Self { virtualenv }
    }

    /// Detects the virtualenv for `root`.
    pub fn for_project(root: &Path) -> Self {
        let virtualenv = detect_virtualenv(root);
        if let Some(venv) = &virtualenv {
            debug!(venv = %venv.display(), "Using virtualenv for command execution");
        }
        Self { virtualenv }
    }

    pub fn virtualenv(&self) -> Option<&Path> {
        self.virtualenv.as_deref()
    }

    /// Resolved variable overrides for `command`, in application order.
    pub fn overrides_for(&self, command: &Command) -> Vec<(String, OsString)> {
        let mut vars = Vec::new();
        if let Some(venv) = &self.virtualenv {
            let inherited = env::var_os("PATH").unwrap_or_default();
            let paths = std::iter::once(venv_bin(venv)).chain(env::split_paths(&inherited));
            if let Ok(path) = env::join_paths(paths) {
                vars.push(("PATH".to_string(), path));
            }
            vars.push(("VIRTUAL_ENV".to_string(), venv.clone().into_os_string()));
        }
        for (key, value) in command.env_overrides() {
            vars.push((key, OsString::from(value)));
        }
        vars
    }

    /// Applies the overlay for `command` to a process builder.
    pub fn apply(&self, process: &mut ProcessCommand, command: &Command) {
        for (key, value) in self.overrides_for(command) {
            process.env(key, value);
        }
    }
}
