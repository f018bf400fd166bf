//! Container fallback verification.
//!
//! A [`ContainerTester`] re-runs command text inside an image to separate
//! "tool missing on this host" from "command is broken". The runtime sits
//! behind the [`ContainerRuntime`] trait; [`DockerRuntime`] is the built-in
//! implementation.
//!
//! A runtime that cannot be reached yields
//! [`ContainerVerdict::Unverifiable`], which never counts as a failure.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use command_harvest_config::{ContainerSettings, timeout_duration};
use command_harvest_core::{Command, ContainerProfile, ContainerProfiles, format_seconds};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::process::run_with_timeout;

/// Metadata key parsers use to hint at a suitable image.
pub const METADATA_IMAGE: &str = "image";

/// Whether a runtime can run containers right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeAvailability {
    Available { version: String },
    Unavailable { reason: String },
}

impl RuntimeAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// One bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub mode: Option<String>,
}

/// Everything needed to run one command in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInvocation {
    pub image: String,
    pub workdir: String,
    pub mounts: Vec<Mount>,
    pub environment: Vec<(String, String)>,
    pub shell: String,
    pub command_text: String,
}

impl ContainerInvocation {
    /// Arguments for `docker run`.
    pub fn docker_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        for mount in &self.mounts {
            let mut binding = format!("{}:{}", mount.host.display(), mount.container);
            if let Some(mode) = &mount.mode {
                binding.push(':');
                binding.push_str(mode);
            }
            args.push("-v".to_string());
            args.push(binding);
        }
        args.push("-w".to_string());
        args.push(self.workdir.clone());
        for (key, value) in &self.environment {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.image.clone());
        args.push(self.shell.clone());
        args.push("-c".to_string());
        args.push(self.command_text.clone());
        args
    }
}

/// Raw outcome of a container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRunOutput {
    /// `None` when the run hit its deadline.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Runtime-level failures that are not the command's fault.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime or its daemon cannot be reached.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// The image could not be found or pulled.
    #[error("image {image} unavailable")]
    ImageUnavailable { image: String, output: String },

    #[error("container runtime I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A container engine the tester can drive.
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn availability(&self) -> RuntimeAvailability;

    /// Runs one invocation, bounded by `timeout`.
    fn run(
        &self,
        invocation: &ContainerInvocation,
        timeout: Duration,
    ) -> Result<ContainerRunOutput, ContainerError>;
}

const DOCKER_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Output markers of a daemon that cannot be reached.
const DAEMON_UNREACHABLE_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "error during connect",
    "permission denied while trying to connect",
];

/// Output markers of a missing or unpullable image.
const IMAGE_PULL_MARKERS: &[&str] = &[
    "pull access denied",
    "manifest unknown",
    "manifest for",
    "repository does not exist",
    "error response from daemon: pull",
    "not found: manifest",
    "failed to resolve reference",
];

/// Docker CLI runtime.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        &self.binary
    }

    fn availability(&self) -> RuntimeAvailability {
        let mut probe = ProcessCommand::new(&self.binary);
        probe.args(["version", "--format", "{{.Server.Version}}"]);
        match run_with_timeout(probe, DOCKER_PROBE_TIMEOUT) {
            Ok(output) if output.exit_code == Some(0) => RuntimeAvailability::Available {
                version: output.stdout.trim().to_string(),
            },
            Ok(output) if output.timed_out => RuntimeAvailability::Unavailable {
                reason: format!("`{} version` timed out", self.binary),
            },
            Ok(output) => RuntimeAvailability::Unavailable {
                reason: first_line(&output.stderr)
                    .unwrap_or("daemon not reachable")
                    .to_string(),
            },
            Err(err) => RuntimeAvailability::Unavailable {
                reason: format!("`{}` could not be started: {err}", self.binary),
            },
        }
    }

    fn run(
        &self,
        invocation: &ContainerInvocation,
        timeout: Duration,
    ) -> Result<ContainerRunOutput, ContainerError> {
        let mut process = ProcessCommand::new(&self.binary);
        process.args(invocation.docker_args());
        debug!(image = %invocation.image, command = %invocation.command_text, "Running command in container");

        let output = match run_with_timeout(process, timeout) {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ContainerError::Unavailable(format!("`{}` not found", self.binary)));
            }
            Err(err) => return Err(ContainerError::Io(err)),
        };

        let combined = join_output(&output.stdout, &output.stderr);
        // 125 is docker's own failure code, as opposed to the command's.
        if output.exit_code == Some(125) {
            let lower = combined.to_ascii_lowercase();
            if DAEMON_UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) {
                return Err(ContainerError::Unavailable(
                    first_line(&combined).unwrap_or("daemon not reachable").to_string(),
                ));
            }
            if IMAGE_PULL_MARKERS.iter().any(|m| lower.contains(m)) {
                return Err(ContainerError::ImageUnavailable {
                    image: invocation.image.clone(),
                    output: combined,
                });
            }
        }

        Ok(ContainerRunOutput {
            exit_code: output.exit_code,
            output: combined,
        })
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}

fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, _) => stderr.trim_end().to_string(),
        (false, true) => stdout.trim_end().to_string(),
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
    }
}

/// Result of verifying one command in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContainerVerdict {
    Passed {
        output: String,
    },
    Failed {
        exit_code: Option<i32>,
        output: String,
    },
    ImageUnavailable {
        image: String,
        output: String,
    },
    /// The runtime could not be used; says nothing about the command.
    Unverifiable {
        reason: String,
    },
}

impl ContainerVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    /// True only when the command itself failed inside the container.
    pub fn command_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_unverifiable(&self) -> bool {
        matches!(self, Self::Unverifiable { .. })
    }

    /// Captured output, or the reason for an unverifiable run.
    pub fn output(&self) -> &str {
        match self {
            Self::Passed { output }
            | Self::Failed { output, .. }
            | Self::ImageUnavailable { output, .. } => output,
            Self::Unverifiable { reason } => reason,
        }
    }

    /// One-line summary for notes and console output.
    pub fn summary(&self) -> String {
        match self {
            Self::Passed { .. } => "passed in container".to_string(),
            Self::Failed {
                exit_code: Some(code),
                ..
            } => format!("failed in container (exit {code})"),
            Self::Failed { exit_code: None, .. } => "timed out in container".to_string(),
            Self::ImageUnavailable { image, .. } => format!("container image {image} unavailable"),
            Self::Unverifiable { reason } => format!("container verification unavailable: {reason}"),
        }
    }
}

/// Verdict for one command of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub command: String,
    /// Profile key that matched, if any.
    pub profile: Option<String>,
    pub image: String,
    pub verdict: ContainerVerdict,
}

/// Commands from a batch whose verdict is a command failure.
pub fn failing_commands(outcomes: &[BatchOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter(|outcome| outcome.verdict.command_failed())
        .map(|outcome| outcome.command.clone())
        .collect()
}

/// Resolves profiles, builds invocations and maps runtime output to
/// verdicts.
pub struct ContainerTester {
    runtime: Arc<dyn ContainerRuntime>,
    profiles: ContainerProfiles,
    root: PathBuf,
    default_image: String,
    default_workdir: String,
    timeout: Duration,
    shell: String,
    availability: OnceLock<RuntimeAvailability>,
}

impl ContainerTester {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        profiles: ContainerProfiles,
        root: impl Into<PathBuf>,
        settings: &ContainerSettings,
    ) -> Self {
        Self {
            runtime,
            profiles,
            root: root.into(),
            default_image: settings.default_image.clone(),
            default_workdir: settings.default_workdir.clone(),
            timeout: timeout_duration(settings.timeout_secs),
            shell: "sh".to_string(),
            availability: OnceLock::new(),
        }
    }

    pub fn profiles(&self) -> &ContainerProfiles {
        &self.profiles
    }

    /// Runtime availability, probed once and cached.
    pub fn availability(&self) -> &RuntimeAvailability {
        self.availability.get_or_init(|| {
            let availability = self.runtime.availability();
            match &availability {
                RuntimeAvailability::Available { version } => {
                    info!(runtime = self.runtime.name(), version = %version, "Container runtime available");
                }
                RuntimeAvailability::Unavailable { reason } => {
                    warn!(runtime = self.runtime.name(), reason = %reason, "Container runtime unavailable");
                }
            }
            availability
        })
    }

    pub fn is_available(&self) -> bool {
        self.availability().is_available()
    }

    /// Builds the invocation for `command_text` under `profile`, falling
    /// back to the default image and workdir with the project root mounted.
    pub fn invocation(
        &self,
        command_text: &str,
        profile: Option<&ContainerProfile>,
        image_hint: Option<&str>,
    ) -> ContainerInvocation {
        let image = profile
            .and_then(|p| p.image.clone())
            .or_else(|| image_hint.map(str::to_string))
            .unwrap_or_else(|| self.default_image.clone());
        let workdir = profile
            .and_then(|p| p.workdir.clone())
            .unwrap_or_else(|| self.default_workdir.clone());

        let mut mounts = profile
            .map(|p| {
                p.volumes
                    .iter()
                    .map(|(host, volume)| Mount {
                        host: self.host_path(host),
                        container: volume.container_path().to_string(),
                        mode: volume.mode().map(str::to_string),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if mounts.is_empty() {
            mounts.push(Mount {
                host: self.root.clone(),
                container: workdir.clone(),
                mode: Some("rw".to_string()),
            });
        }

        let environment = profile
            .map(|p| {
                p.environment
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        ContainerInvocation {
            image,
            workdir,
            mounts,
            environment,
            shell: self.shell.clone(),
            command_text: command_text.to_string(),
        }
    }

    fn host_path(&self, host: &str) -> PathBuf {
        let path = Path::new(host);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Runs `command_text` in a container built from `profile`, or from the
    /// defaults when `profile` is `None`.
    pub fn test_in_container(
        &self,
        command_text: &str,
        profile: Option<&ContainerProfile>,
    ) -> ContainerVerdict {
        self.run_invocation(&self.invocation(command_text, profile, None))
    }

    /// Targeted verification of one harvested command: its matching
    /// profile, else its `image` metadata hint, else the default image.
    pub fn verify(&self, command: &Command) -> ContainerVerdict {
        let profile = self.profiles.resolve(command.text()).map(|(_, profile)| profile);
        let hint = command.metadata_str(METADATA_IMAGE);
        self.run_invocation(&self.invocation(command.text(), profile, hint))
    }

    /// Tests every command text, in order.
    pub fn batch_test(&self, commands: &[String]) -> Vec<BatchOutcome> {
        commands
            .iter()
            .map(|text| {
                let resolved = self.profiles.resolve(text);
                let invocation = self.invocation(text, resolved.map(|(_, p)| p), None);
                let verdict = self.run_invocation(&invocation);
                info!(command = %text, verdict = %verdict.summary(), "Batch container test");
                BatchOutcome {
                    command: text.clone(),
                    profile: resolved.map(|(key, _)| key.to_string()),
                    image: invocation.image,
                    verdict,
                }
            })
            .collect()
    }

    fn run_invocation(&self, invocation: &ContainerInvocation) -> ContainerVerdict {
        if let RuntimeAvailability::Unavailable { reason } = self.availability() {
            return ContainerVerdict::Unverifiable {
                reason: reason.clone(),
            };
        }

        match self.runtime.run(invocation, self.timeout) {
            Ok(ContainerRunOutput {
                exit_code: Some(0),
                output,
            }) => ContainerVerdict::Passed { output },
            Ok(ContainerRunOutput {
                exit_code: Some(code),
                output,
            }) => ContainerVerdict::Failed {
                exit_code: Some(code),
                output,
            },
            Ok(ContainerRunOutput {
                exit_code: None,
                output,
            }) => ContainerVerdict::Failed {
                exit_code: None,
                output: format!(
                    "timed out after {}s\n{output}",
                    format_seconds(self.timeout.as_secs_f64())
                )
                .trim_end()
                .to_string(),
            },
            Err(ContainerError::ImageUnavailable { image, output }) => {
                ContainerVerdict::ImageUnavailable { image, output }
            }
            Err(err @ (ContainerError::Unavailable(_) | ContainerError::Io(_))) => {
                ContainerVerdict::Unverifiable {
                    reason: err.to_string(),
                }
            }
        }
    }
}
