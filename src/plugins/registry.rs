//! # Capability registry: backend factories and monitoring sinks by name.
//!
//! Populated once at startup (built-ins first, then whatever plugins
//! register) and read-only afterwards. The worker pool resolves the
//! configured backend names against it; the dispatcher only ever holds the
//! opaque handles that come back.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

use crate::codec;
use crate::config::Settings;
use crate::error::RuntimeError;
use crate::events::Subscribe;
use crate::queue::{FileQueue, MemoryQueue, QueueRef, SqliteQueue};
use crate::results::{FileResultBackend, MemoryResultBackend, ResultRef, SqliteResultBackend};

/// Factory building a queue backend from settings.
pub type QueueFactory =
    Arc<dyn Fn(Settings) -> BoxFuture<'static, Result<QueueRef, RuntimeError>> + Send + Sync>;

/// Factory building a result backend from settings.
pub type ResultFactory =
    Arc<dyn Fn(Settings) -> BoxFuture<'static, Result<ResultRef, RuntimeError>> + Send + Sync>;

/// Named factories for every swappable capability.
pub struct CapabilityRegistry {
    queues: RwLock<HashMap<String, QueueFactory>>,
    results: RwLock<HashMap<String, ResultFactory>>,
    sinks: Mutex<Vec<Arc<dyn Subscribe>>>,
}

impl CapabilityRegistry {
    /// Creates a registry pre-seeded with the built-in `memory`, `file`,
    /// and `sqlite` backends, so plugins can override them by name.
    pub fn with_builtins() -> Self {
        let registry = Self {
            queues: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            sinks: Mutex::new(Vec::new()),
        };

        registry.register_queue_backend(
            "memory",
            Arc::new(|settings: Settings| {
                async move {
                    Ok(Arc::new(MemoryQueue::new(settings.queue_maxsize)) as QueueRef)
                }
                .boxed()
            }),
            true,
        );
        registry.register_queue_backend(
            "file",
            Arc::new(|settings: Settings| {
                async move {
                    let codec = codec::for_name(&settings.serialization_backend)?;
                    let queue = FileQueue::open(
                        settings.file_queue_dir.clone(),
                        codec,
                        settings.visibility_timeout(),
                    )?;
                    Ok(Arc::new(queue) as QueueRef)
                }
                .boxed()
            }),
            true,
        );
        registry.register_queue_backend(
            "sqlite",
            Arc::new(|settings: Settings| {
                async move {
                    let codec = codec::for_name(&settings.serialization_backend)?;
                    let queue = SqliteQueue::connect(
                        &settings.sqlite_queue_path,
                        codec,
                        settings.visibility_timeout(),
                    )
                    .await?;
                    Ok(Arc::new(queue) as QueueRef)
                }
                .boxed()
            }),
            true,
        );

        registry.register_result_backend(
            "memory",
            Arc::new(|_settings: Settings| {
                async move { Ok(Arc::new(MemoryResultBackend::new()) as ResultRef) }.boxed()
            }),
            true,
        );
        registry.register_result_backend(
            "file",
            Arc::new(|settings: Settings| {
                async move {
                    let store = FileResultBackend::open(settings.file_results_dir.clone())?;
                    Ok(Arc::new(store) as ResultRef)
                }
                .boxed()
            }),
            true,
        );
        registry.register_result_backend(
            "sqlite",
            Arc::new(|settings: Settings| {
                async move {
                    let store = SqliteResultBackend::connect(&settings.sqlite_result_path).await?;
                    Ok(Arc::new(store) as ResultRef)
                }
                .boxed()
            }),
            true,
        );

        registry
    }

    /// Registers a queue backend factory under `name`.
    ///
    /// With `replace = false` an existing name is kept and the call is
    /// logged; plugins register with `replace = true` so they can shadow
    /// built-ins.
    pub fn register_queue_backend(&self, name: &str, factory: QueueFactory, replace: bool) {
        let mut queues = self.queues.write().expect("capability registry poisoned");
        let key = name.to_ascii_lowercase();
        if !replace && queues.contains_key(&key) {
            log::warn!("queue backend '{key}' already registered; keeping existing");
            return;
        }
        queues.insert(key, factory);
    }

    /// Registers a result backend factory under `name`.
    pub fn register_result_backend(&self, name: &str, factory: ResultFactory, replace: bool) {
        let mut results = self.results.write().expect("capability registry poisoned");
        let key = name.to_ascii_lowercase();
        if !replace && results.contains_key(&key) {
            log::warn!("result backend '{key}' already registered; keeping existing");
            return;
        }
        results.insert(key, factory);
    }

    /// Installs a monitoring sink; drained by the pool into its
    /// subscriber set when the event loop starts.
    pub fn install_monitoring_sink(&self, sink: Arc<dyn Subscribe>) {
        self.sinks
            .lock()
            .expect("capability registry poisoned")
            .push(sink);
    }

    /// Removes and returns the installed monitoring sinks.
    pub fn take_sinks(&self) -> Vec<Arc<dyn Subscribe>> {
        std::mem::take(&mut *self.sinks.lock().expect("capability registry poisoned"))
    }

    /// Builds the queue backend registered under `name`.
    pub async fn resolve_queue(
        &self,
        name: &str,
        settings: &Settings,
    ) -> Result<QueueRef, RuntimeError> {
        let factory = self
            .queues
            .read()
            .expect("capability registry poisoned")
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownBackend {
                kind: "queue",
                name: name.to_owned(),
            })?;
        factory(settings.clone()).await
    }

    /// Builds the result backend registered under `name`.
    pub async fn resolve_result(
        &self,
        name: &str,
        settings: &Settings,
    ) -> Result<ResultRef, RuntimeError> {
        let factory = self
            .results
            .read()
            .expect("capability registry poisoned")
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownBackend {
                kind: "result",
                name: name.to_owned(),
            })?;
        factory(settings.clone()).await
    }

    /// Registered queue backend names, sorted. For diagnostics.
    pub fn queue_backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .read()
            .expect("capability registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    /// Registered result backend names, sorted. For diagnostics.
    pub fn result_backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .results
            .read()
            .expect("capability registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtins_are_seeded() {
        let caps = CapabilityRegistry::with_builtins();
        assert_eq!(caps.queue_backend_names(), ["file", "memory", "sqlite"]);
        assert_eq!(caps.result_backend_names(), ["file", "memory", "sqlite"]);

        let mut settings = Settings::default();
        settings.queue_backend = "memory".into();
        assert!(caps.resolve_queue("memory", &settings).await.is_ok());
        assert!(matches!(
            caps.resolve_queue("redis", &settings).await,
            Err(RuntimeError::UnknownBackend { .. })
        ));
    }

    #[tokio::test]
    async fn replace_flag_controls_shadowing() {
        let caps = CapabilityRegistry::with_builtins();
        let marker: QueueFactory = Arc::new(|settings: Settings| {
            async move { Ok(Arc::new(MemoryQueue::new(settings.queue_maxsize)) as QueueRef) }
                .boxed()
        });
        // Not replacing keeps the builtin; replacing shadows it.
        caps.register_queue_backend("memory", marker.clone(), false);
        caps.register_queue_backend("memory", marker, true);
        assert_eq!(caps.queue_backend_names(), ["file", "memory", "sqlite"]);
    }
}
