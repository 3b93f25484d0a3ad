//! # Process-wide task registry.
//!
//! [`TaskRegistry`] maps task names to [`TaskDefinition`]s. It is populated
//! at startup, either by explicit [`register`](TaskRegistry::register) calls from
//! the host or by the manifest loader, and read-mostly afterwards.
//!
//! ## Rules
//! - All operations are safe under concurrent access (`RwLock`).
//! - [`RegisterMode::Strict`] fails on duplicates; `Force` replaces;
//!   `Silent` keeps the existing definition.
//! - [`list`](TaskRegistry::list) is ordered by name for determinism.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::RuntimeError;

use super::definition::TaskDefinition;

/// Conflict handling for [`TaskRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterMode {
    /// Fail with [`RuntimeError::DuplicateTask`] when the name exists.
    Strict,
    /// Replace an existing definition.
    Force,
    /// Keep the existing definition and ignore the new one.
    Silent,
}

/// Thread-safe, duplicate-aware mapping from task name to definition.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskDefinition>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition under its name.
    pub fn register(&self, def: TaskDefinition, mode: RegisterMode) -> Result<(), RuntimeError> {
        let mut tasks = self.tasks.write().expect("task registry lock poisoned");
        if tasks.contains_key(def.name()) {
            match mode {
                RegisterMode::Strict => {
                    return Err(RuntimeError::DuplicateTask {
                        name: def.name().to_owned(),
                    });
                }
                RegisterMode::Silent => return Ok(()),
                RegisterMode::Force => {}
            }
        }
        tasks.insert(def.name().to_owned(), def);
        Ok(())
    }

    /// Looks up a definition by name.
    pub fn get(&self, name: &str) -> Result<TaskDefinition, RuntimeError> {
        self.tasks
            .read()
            .expect("task registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownTask {
                name: name.to_owned(),
            })
    }

    /// True when a definition exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.tasks
            .read()
            .expect("task registry lock poisoned")
            .contains_key(name)
    }

    /// All definitions, ordered by name.
    pub fn list(&self) -> Vec<TaskDefinition> {
        let tasks = self.tasks.read().expect("task registry lock poisoned");
        let mut defs: Vec<TaskDefinition> = tasks.values().cloned().collect();
        defs.sort_by(|a, b| a.name().cmp(b.name()));
        defs
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.read().expect("task registry lock poisoned").len()
    }

    /// True when no tasks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every definition. Intended for tests.
    pub fn clear(&self) {
        self.tasks.write().expect("task registry lock poisoned").clear();
    }
}
