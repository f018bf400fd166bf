//! In-memory classification store for one pipeline run.
//!
//! The repository owns every entry it holds and is the only place in the
//! pipeline with long-lived mutable state. All mutations go through one
//! [`Mutex`], so `mark_*` calls from parallel workers are safe.
//!
//! A command is a member of at most one of the `successful`, `failed` and
//! `ignored` sets. Marking it again moves it: the old membership is removed
//! before the new one is added.
//!
//! # Examples
//!
//! ```
//! use command_harvest_core::{Classification, Command, CommandResult, Repository};
//!
//! let repo = Repository::new();
//! let cmd = Command::new("make build", "make_target");
//!
//! repo.mark_failed(cmd.clone(), CommandResult::completed(2, "", "boom", 0.1));
//! repo.mark_successful(cmd.clone(), CommandResult::completed(0, "", "", 0.2));
//!
//! assert_eq!(repo.classification_of(&cmd), Some(Classification::Successful));
//! assert!(repo.failed().is_empty());
//! assert_eq!(repo.successful().len(), 1);
//! ```

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{Classification, Command, CommandKey, CommandResult};

/// A command together with the evidence for its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedCommand {
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    /// Why the command ended up here (matching ignore rule, container note).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Consistent copy of the repository taken under a single lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSnapshot {
    pub all: Vec<Command>,
    pub successful: Vec<ClassifiedCommand>,
    pub failed: Vec<ClassifiedCommand>,
    pub ignored: Vec<ClassifiedCommand>,
}

impl ClassificationSnapshot {
    /// Commands that were registered but never classified.
    pub fn untested(&self) -> Vec<&Command> {
        self.all
            .iter()
            .filter(|command| {
                let key = command.key();
                ![&self.successful, &self.failed, &self.ignored]
                    .iter()
                    .any(|set| set.iter().any(|entry| entry.command.key() == key))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    all: Vec<Command>,
    successful: Vec<ClassifiedCommand>,
    failed: Vec<ClassifiedCommand>,
    ignored: Vec<ClassifiedCommand>,
}

impl State {
    fn register(&mut self, command: &Command) {
        let key = command.key();
        if !self.all.iter().any(|known| known.key() == key) {
            self.all.push(command.clone());
        }
    }

    fn remove_everywhere(&mut self, key: &CommandKey) {
        self.successful.retain(|entry| entry.command.key() != *key);
        self.failed.retain(|entry| entry.command.key() != *key);
        self.ignored.retain(|entry| entry.command.key() != *key);
    }

    fn set_mut(&mut self, classification: Classification) -> &mut Vec<ClassifiedCommand> {
        match classification {
            Classification::Successful => &mut self.successful,
            Classification::Failed => &mut self.failed,
            Classification::Ignored => &mut self.ignored,
        }
    }

    fn mark(&mut self, classification: Classification, entry: ClassifiedCommand) {
        self.register(&entry.command);
        self.remove_everywhere(&entry.command.key());
        self.set_mut(classification).push(entry);
    }
}

/// Thread-safe store of commands and their classifications.
#[derive(Debug, Default)]
pub struct Repository {
    state: Mutex<State>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every mutation is one remove-then-push under the guard, so the
        // sets stay disjoint even when a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers candidates without classifying them.
    pub fn register_all(&self, commands: &[Command]) {
        let mut state = self.lock();
        for command in commands {
            state.register(command);
        }
    }

    pub fn mark_successful(&self, command: Command, result: CommandResult) {
        self.mark_successful_with_reason(command, result, None);
    }

    pub fn mark_successful_with_reason(
        &self,
        command: Command,
        result: CommandResult,
        reason: Option<String>,
    ) {
        self.lock().mark(
            Classification::Successful,
            ClassifiedCommand {
                command,
                result: Some(result),
                reason,
            },
        );
    }

    pub fn mark_failed(&self, command: Command, result: CommandResult) {
        self.mark_failed_with_reason(command, result, None);
    }

    pub fn mark_failed_with_reason(
        &self,
        command: Command,
        result: CommandResult,
        reason: Option<String>,
    ) {
        self.lock().mark(
            Classification::Failed,
            ClassifiedCommand {
                command,
                result: Some(result),
                reason,
            },
        );
    }

    pub fn mark_ignored(&self, command: Command, reason: Option<String>) {
        self.lock().mark(
            Classification::Ignored,
            ClassifiedCommand {
                command,
                result: None,
                reason,
            },
        );
    }

    /// Resets the three classification sets. Registered commands stay.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.successful.clear();
        state.failed.clear();
        state.ignored.clear();
    }

    /// Drops every registered command and classification.
    pub fn reset(&self) {
        *self.lock() = State::default();
    }

    pub fn all(&self) -> Vec<Command> {
        self.lock().all.clone()
    }

    pub fn successful(&self) -> Vec<ClassifiedCommand> {
        self.lock().successful.clone()
    }

    pub fn failed(&self) -> Vec<ClassifiedCommand> {
        self.lock().failed.clone()
    }

    pub fn ignored(&self) -> Vec<ClassifiedCommand> {
        self.lock().ignored.clone()
    }

    pub fn classification_of(&self, command: &Command) -> Option<Classification> {
        let key = command.key();
        let state = self.lock();
        let contains = |set: &[ClassifiedCommand]| set.iter().any(|e| e.command.key() == key);
        if contains(&state.successful) {
            Some(Classification::Successful)
        } else if contains(&state.failed) {
            Some(Classification::Failed)
        } else if contains(&state.ignored) {
            Some(Classification::Ignored)
        } else {
            None
        }
    }

    /// Returns the stored entry for `command` in whichever set holds it.
    pub fn entry_of(&self, command: &Command) -> Option<(Classification, ClassifiedCommand)> {
        let key = command.key();
        let state = self.lock();
        [
            (Classification::Successful, &state.successful),
            (Classification::Failed, &state.failed),
            (Classification::Ignored, &state.ignored),
        ]
        .into_iter()
        .find_map(|(classification, set)| {
            set.iter()
                .find(|entry| entry.command.key() == key)
                .map(|entry| (classification, entry.clone()))
        })
    }

    pub fn snapshot(&self) -> ClassificationSnapshot {
        let state = self.lock();
        ClassificationSnapshot {
            all: state.all.clone(),
            successful: state.successful.clone(),
            failed: state.failed.clone(),
            ignored: state.ignored.clone(),
        }
    }
}
