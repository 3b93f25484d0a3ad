//! # Task manifest loader.
//!
//! The discovery pipeline (external to this crate) writes a JSON manifest
//! of tasks it found. At worker startup the manifest is read back and bound
//! to the handlers the host actually links, ending in
//! [`TaskRegistry::register`] like every other registration path.
//!
//! Manifest schema (v2.0):
//! ```json
//! {
//!   "version": "2.0",
//!   "tasks": {
//!     "billing.tasks.send_invoice": {
//!       "file": "billing/tasks.py",
//!       "line": 42,
//!       "name": "send_invoice",
//!       "metadata": { "retries": 3, "timeout_secs": 30.0, "tags": ["billing"] }
//!     }
//!   }
//! }
//! ```
//!
//! Entries whose `name` has no handler binding are skipped with a warning:
//! discovery may list tasks a given worker build does not link. A missing
//! file yields an empty manifest; invalid JSON or a version mismatch is
//! [`RuntimeError::ManifestCorrupt`] (fatal at startup).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::RuntimeError;

use super::definition::TaskDefinition;
use super::handler::HandlerRef;
use super::registry::{RegisterMode, TaskRegistry};

/// Manifest schema version this loader understands.
pub const MANIFEST_VERSION: &str = "2.0";

/// Host-supplied mapping from task name to the handler that implements it.
pub type HandlerBindings = HashMap<String, HandlerRef>;

/// Per-task execution metadata carried by the manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestMetadata {
    /// Default retry budget.
    #[serde(default)]
    pub retries: Option<u32>,
    /// Default retry delay in seconds.
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
    /// Default wall-clock limit in seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    /// Whether terminal outcomes are persisted.
    #[serde(default)]
    pub store_result: Option<bool>,
    /// Human tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Human description.
    #[serde(default)]
    pub description: Option<String>,
}

/// One discovered task.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Source file the task was discovered in.
    pub file: String,
    /// Line number of the definition.
    #[serde(default)]
    pub line: u32,
    /// Registered task name.
    pub name: String,
    /// Execution metadata.
    #[serde(default)]
    pub metadata: ManifestMetadata,
}

/// Parsed task manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskManifest {
    /// Schema version.
    pub version: String,
    /// Discovered tasks keyed by fully-qualified symbol.
    #[serde(default)]
    pub tasks: BTreeMap<String, ManifestEntry>,
}

impl TaskManifest {
    /// An empty manifest at the current version.
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION.to_owned(),
            tasks: BTreeMap::new(),
        }
    }
}

/// Reads and validates the manifest at `path`.
///
/// A missing file is not an error (discovery simply has not run) and
/// yields an empty manifest.
pub fn load_manifest(path: &Path) -> Result<TaskManifest, RuntimeError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("no manifest found at {}", path.display());
            return Ok(TaskManifest::empty());
        }
        Err(e) => {
            return Err(RuntimeError::ManifestCorrupt {
                path: path.to_owned(),
                reason: e.to_string(),
            });
        }
    };

    let manifest: TaskManifest =
        serde_json::from_str(&raw).map_err(|e| RuntimeError::ManifestCorrupt {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;

    if manifest.version != MANIFEST_VERSION {
        return Err(RuntimeError::ManifestCorrupt {
            path: path.to_owned(),
            reason: format!(
                "version mismatch: {} != {}",
                manifest.version, MANIFEST_VERSION
            ),
        });
    }

    Ok(manifest)
}

/// Registers every bound manifest entry into `registry`.
///
/// Returns the number of tasks registered. Entries without a binding are
/// skipped with a warning.
pub fn register_from_manifest(
    registry: &TaskRegistry,
    manifest: &TaskManifest,
    bindings: &HandlerBindings,
    mode: RegisterMode,
) -> Result<usize, RuntimeError> {
    let mut registered = 0;
    for (symbol, entry) in &manifest.tasks {
        let Some(handler) = bindings.get(&entry.name) else {
            log::warn!(
                "manifest task '{}' ({symbol}) has no handler binding; skipping",
                entry.name
            );
            continue;
        };

        let meta = &entry.metadata;
        let mut builder = TaskDefinition::builder(&entry.name, handler.clone());
        if let Some(retries) = meta.retries {
            builder = builder.retries(retries);
        }
        if let Some(delay) = meta.retry_delay_secs {
            builder = builder.retry_delay_secs(delay);
        }
        if let Some(timeout) = meta.timeout_secs {
            builder = builder.timeout_secs(timeout);
        }
        if let Some(store) = meta.store_result {
            builder = builder.store_result(store);
        }
        if !meta.tags.is_empty() {
            builder = builder.tags(meta.tags.clone());
        }
        if let Some(desc) = &meta.description {
            builder = builder.description(desc.clone());
        }

        registry.register(builder.build(), mode)?;
        registered += 1;
    }
    Ok(registered)
}
