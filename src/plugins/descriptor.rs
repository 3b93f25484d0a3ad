//! # Plugin descriptor file.
//!
//! A TOML file at a well-known path enumerates plugins grouped by
//! capability:
//!
//! ```toml
//! [plugins]
//! queue_backend  = ["my_ext::RedisQueuePlugin"]
//! result_backend = []
//! monitoring     = ["my_ext::PrometheusPlugin"]
//! ```
//!
//! Each entry is a constructor spec the host has provided to the
//! [`PluginLoader`](super::PluginLoader). A missing descriptor means no
//! plugins; a malformed one is fatal at startup.

use std::path::Path;

use serde::Deserialize;

use crate::error::RuntimeError;

use super::contracts::Capability;

/// Well-known descriptor location at the project root.
pub const DEFAULT_DESCRIPTOR_PATH: &str = "nuvom_plugins.toml";

/// Plugin specs grouped by the capability they are expected to provide.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginDescriptor {
    /// Plugins registering queue backends.
    #[serde(default)]
    pub queue_backend: Vec<String>,
    /// Plugins registering result backends.
    #[serde(default)]
    pub result_backend: Vec<String>,
    /// Plugins installing monitoring sinks.
    #[serde(default)]
    pub monitoring: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    plugins: PluginDescriptor,
}

impl PluginDescriptor {
    /// Reads the descriptor at `path`. A missing file yields an empty
    /// descriptor; a malformed one is a [`RuntimeError::PluginLoad`].
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(RuntimeError::PluginLoad {
                    spec: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let file: DescriptorFile =
            toml::from_str(&raw).map_err(|e| RuntimeError::PluginLoad {
                spec: path.display().to_string(),
                reason: format!("invalid TOML: {e}"),
            })?;
        Ok(file.plugins)
    }

    /// Reads the descriptor at [`DEFAULT_DESCRIPTOR_PATH`].
    pub fn load_default() -> Result<Self, RuntimeError> {
        Self::load(Path::new(DEFAULT_DESCRIPTOR_PATH))
    }

    /// All entries in load order: queue backends, result backends, then
    /// monitoring, each group in listed order.
    pub fn entries(&self) -> Vec<(Capability, &str)> {
        let mut entries = Vec::new();
        for spec in &self.queue_backend {
            entries.push((Capability::QueueBackend, spec.as_str()));
        }
        for spec in &self.result_backend {
            entries.push((Capability::ResultBackend, spec.as_str()));
        }
        for spec in &self.monitoring {
            entries.push((Capability::Monitoring, spec.as_str()));
        }
        entries
    }

    /// True when no plugins are listed.
    pub fn is_empty(&self) -> bool {
        self.queue_backend.is_empty() && self.result_backend.is_empty() && self.monitoring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grouped_entries_in_order() {
        let raw = r#"
            [plugins]
            queue_backend = ["ext::QueuePlugin"]
            monitoring = ["ext::MetricsPlugin", "ext::AuditPlugin"]
        "#;
        let file: DescriptorFile = toml::from_str(raw).unwrap();
        let descriptor = file.plugins;
        let entries = descriptor.entries();
        assert_eq!(
            entries,
            vec![
                (Capability::QueueBackend, "ext::QueuePlugin"),
                (Capability::Monitoring, "ext::MetricsPlugin"),
                (Capability::Monitoring, "ext::AuditPlugin"),
            ]
        );
    }

    #[test]
    fn missing_file_is_empty_and_garbage_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml");
        assert!(PluginDescriptor::load(&missing).unwrap().is_empty());

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "not [valid toml").unwrap();
        assert!(matches!(
            PluginDescriptor::load(&bad),
            Err(RuntimeError::PluginLoad { .. })
        ));
    }
}
