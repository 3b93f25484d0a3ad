//! # Plugin loader.
//!
//! Rust links plugins statically, so discovery is split in two:
//! - the **host** provides constructors for the plugins it compiled in,
//!   keyed by spec string ([`PluginLoader::provide`]);
//! - the **descriptor** selects which of those specs actually start, and
//!   in what order.
//!
//! Loading happens exactly once per process, before any worker is created.
//! Any failure (unknown spec, api major-version mismatch, a capability
//! the plugin does not provide, or a failed `start`) is a fatal
//! [`RuntimeError::PluginLoad`]. `stop_all` runs in reverse start order
//! and is idempotent.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Settings;
use crate::error::RuntimeError;

use super::contracts::{major_compatible, Plugin, API_VERSION};
use super::context::PluginContext;
use super::descriptor::PluginDescriptor;
use super::registry::CapabilityRegistry;

type PluginCtor = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Binds descriptor specs to host-provided plugin constructors and drives
/// the start/stop lifecycle.
#[derive(Default)]
pub struct PluginLoader {
    ctors: HashMap<String, PluginCtor>,
    started: Mutex<Vec<Arc<dyn Plugin>>>,
    loaded: AtomicBool,
}

impl PluginLoader {
    /// Creates a loader with no constructors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provides a constructor for descriptor spec `spec`.
    pub fn provide<F>(mut self, spec: impl Into<String>, ctor: F) -> Self
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.ctors.insert(spec.into(), Arc::new(ctor));
        self
    }

    /// Starts every plugin the descriptor lists. Called exactly once by
    /// the pool during startup; later calls are no-ops.
    pub async fn load(
        &self,
        descriptor: &PluginDescriptor,
        caps: &CapabilityRegistry,
        settings: &Settings,
    ) -> Result<(), RuntimeError> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut seen: HashSet<String> = HashSet::new();
        for (capability, spec) in descriptor.entries() {
            let ctor = self.ctors.get(spec).ok_or_else(|| RuntimeError::PluginLoad {
                spec: spec.to_owned(),
                reason: "no constructor provided by the host".to_owned(),
            })?;
            let plugin = ctor();

            if !major_compatible(API_VERSION, plugin.api_version()) {
                return Err(RuntimeError::PluginLoad {
                    spec: spec.to_owned(),
                    reason: format!(
                        "api_version {} incompatible with core {API_VERSION}",
                        plugin.api_version()
                    ),
                });
            }
            if !plugin.provides().contains(&capability) {
                return Err(RuntimeError::PluginLoad {
                    spec: spec.to_owned(),
                    reason: format!("listed under '{capability}' but does not provide it"),
                });
            }
            // A plugin listed under several capabilities starts once.
            if !seen.insert(plugin.name().to_owned()) {
                continue;
            }

            let mut ctx = PluginContext::new(caps);
            plugin
                .start(&mut ctx, settings)
                .await
                .map_err(|reason| RuntimeError::PluginLoad {
                    spec: spec.to_owned(),
                    reason,
                })?;
            log::info!("plugin '{}' started", plugin.name());
            self.started
                .lock()
                .expect("plugin loader poisoned")
                .push(plugin);
        }
        Ok(())
    }

    /// Stops started plugins in reverse start order. Safe to call twice.
    pub async fn stop_all(&self) {
        let mut plugins = {
            let mut started = self.started.lock().expect("plugin loader poisoned");
            std::mem::take(&mut *started)
        };
        while let Some(plugin) = plugins.pop() {
            log::info!("stopping plugin '{}'", plugin.name());
            plugin.stop().await;
        }
    }

    /// Names of started plugins, in start order. For diagnostics.
    pub fn started_names(&self) -> Vec<String> {
        self.started
            .lock()
            .expect("plugin loader poisoned")
            .iter()
            .map(|p| p.name().to_owned())
            .collect()
    }
}
