//! # Registration surface handed to plugins during `start`.

use std::sync::Arc;

use crate::events::Subscribe;

use super::registry::{CapabilityRegistry, QueueFactory, ResultFactory};

/// What a plugin may do while starting: register backend factories and
/// install monitoring sinks. Plugins never see the registry itself.
pub struct PluginContext<'a> {
    caps: &'a CapabilityRegistry,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(caps: &'a CapabilityRegistry) -> Self {
        Self { caps }
    }

    /// Registers a queue backend factory under `name`, shadowing any
    /// built-in with the same name.
    pub fn register_queue_backend(&mut self, name: &str, factory: QueueFactory) {
        self.caps.register_queue_backend(name, factory, true);
    }

    /// Registers a result backend factory under `name`, shadowing any
    /// built-in with the same name.
    pub fn register_result_backend(&mut self, name: &str, factory: ResultFactory) {
        self.caps.register_result_backend(name, factory, true);
    }

    /// Installs an event sink; it will receive the runtime event stream
    /// once the pool starts.
    pub fn install_monitoring_sink(&mut self, sink: Arc<dyn Subscribe>) {
        self.caps.install_monitoring_sink(sink);
    }
}
