//! # Plugin protocol and core version pinning.
//!
//! [`Plugin`] is the formal contract every external extension implements.
//! The loader refuses plugins whose [`Plugin::api_version`] major number
//! differs from [`API_VERSION`].

use async_trait::async_trait;

use crate::config::Settings;

use super::context::PluginContext;

/// Plugin protocol version spoken by this core.
pub const API_VERSION: &str = "1.0";

/// Capabilities a plugin may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Registers one or more queue backend factories.
    QueueBackend,
    /// Registers one or more result backend factories.
    ResultBackend,
    /// Installs a monitoring sink (event subscriber and/or metrics poller).
    Monitoring,
}

impl Capability {
    /// Stable snake_case name, matching the descriptor keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::QueueBackend => "queue_backend",
            Capability::ResultBackend => "result_backend",
            Capability::Monitoring => "monitoring",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true when `plugin` shares a major version with `core`.
pub(crate) fn major_compatible(core: &str, plugin: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_owned);
    major(core) == major(plugin)
}

/// Contract every plugin must implement.
///
/// `start` is called exactly once, after configuration is ready and before
/// any worker exists; it registers the plugin's capabilities through the
/// [`PluginContext`]. `stop` is called during graceful shutdown, in reverse
/// start order.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Protocol version this plugin was built against.
    fn api_version(&self) -> &str;

    /// Unique plugin identifier (e.g. `"redis"`, `"prometheus"`).
    fn name(&self) -> &str;

    /// Capabilities this plugin offers.
    fn provides(&self) -> &[Capability];

    /// Registers the plugin's backends/sinks. Errors are fatal at startup.
    async fn start(
        &self,
        ctx: &mut PluginContext<'_>,
        settings: &Settings,
    ) -> Result<(), String>;

    /// Releases plugin resources during graceful shutdown.
    async fn stop(&self);
}
