//! # Plugin subsystem: contract, descriptor, loader, capability registry.
//!
//! Plugins extend the runtime with queue backends, result backends, and
//! monitoring sinks. The flow at startup:
//!
//! ```text
//! host ── provide(spec, ctor) ──► PluginLoader
//! nuvom_plugins.toml ───────────► PluginDescriptor (which specs, what order)
//! pool ── load() ──► for each entry:
//!                      version gate ► capability check ► start(ctx, settings)
//!                                                          └─► register_*_backend /
//!                                                              install_monitoring_sink
//! shutdown ── stop_all() ──► reverse start order
//! ```

mod context;
mod contracts;
mod descriptor;
mod loader;
mod registry;

pub use context::PluginContext;
pub use contracts::{Capability, Plugin, API_VERSION};
pub use descriptor::{PluginDescriptor, DEFAULT_DESCRIPTOR_PATH};
pub use loader::PluginLoader;
pub use registry::{CapabilityRegistry, QueueFactory, ResultFactory};
