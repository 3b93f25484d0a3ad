//! # Worker pool: startup wiring, dispatch, and graceful shutdown.
//!
//! [`WorkerPool`] owns the whole runtime: it loads plugins, resolves the
//! configured backends, spawns `max_workers` single-slot workers plus one
//! dispatcher, fans events out to subscribers, and installs itself as the
//! process metrics provider.
//!
//! ## Architecture
//! ```text
//! WorkerPoolBuilder::build()
//!   ├─► PluginLoader::load()          (descriptor order, fatal on error)
//!   ├─► CapabilityRegistry::resolve_* (queue / result backends by name)
//!   ├─► manifest → TaskRegistry       (when bindings are provided)
//!   ├─► spawn subscriber listener     (Bus ──► SubscriberSet)
//!   ├─► spawn workers                 (personal queue + JobRunner each)
//!   └─► spawn dispatcher              (pop_batch ──► least-busy worker)
//! ```
//!
//! ## Shutdown timeline
//! ```text
//! signal / shutdown() ──► publish ShutdownRequested
//!   ─► cancel dispatcher token, join dispatcher          (stop pulling)
//!   ─► cancel drain token                                (workers finish
//!       current job, nack their queued backlog)
//!   ─► join workers, bounded by shutdown_grace_secs
//!   ─► past grace: nack still-running jobs (zero delay)  → GraceExceeded
//!   ─► plugins stop in reverse start order
//!   ─► subscriber set drained, metrics provider cleared,
//!      logs flushed, backends closed
//! ```
//!
//! ## Rules
//! - Shutting down twice is a no-op after the first call.
//! - After a clean shutdown every pulled job is either terminal in the
//!   result backend or visible again in the queue.

mod dispatcher;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{BackendError, RuntimeError};
use crate::events::{Bus, Event, EventKind, Subscribe, SubscriberSet};
use crate::job::Job;
use crate::metrics::{self, MetricsProvider, MetricsSnapshot};
use crate::plugins::{CapabilityRegistry, PluginDescriptor, PluginLoader};
use crate::queue::{QueueBackend as _, QueueRef};
use crate::registry::{
    load_manifest, register_from_manifest, HandlerBindings, RegisterMode, TaskRegistry,
};
use crate::results::{ResultBackend as _, ResultRef};
use crate::runner::JobRunner;

use dispatcher::Dispatcher;
use worker::{spawn_worker, WorkerSlot};

/// Capacity of the runtime event bus.
const BUS_CAPACITY: usize = 1024;

/// Completes when the process receives a termination signal: `SIGINT`,
/// `SIGTERM`, or `SIGQUIT` on unix (terminal Ctrl-C arrives as `SIGINT`),
/// Ctrl-C elsewhere.
#[cfg(unix)]
async fn termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::quit(),
    ];
    let mut listeners = kinds
        .into_iter()
        .map(signal)
        .collect::<std::io::Result<Vec<_>>>()?;
    let waits: Vec<_> = listeners.iter_mut().map(|l| Box::pin(l.recv())).collect();
    futures::future::select_all(waits).await;
    Ok(())
}

/// Completes when the process receives Ctrl-C.
#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Fluent construction of a [`WorkerPool`].
pub struct WorkerPoolBuilder {
    settings: Settings,
    registry: Arc<TaskRegistry>,
    loader: PluginLoader,
    descriptor: Option<PluginDescriptor>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    bindings: Option<HandlerBindings>,
}

impl WorkerPoolBuilder {
    /// Starts a builder with the given settings and an empty registry.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: Arc::new(TaskRegistry::new()),
            loader: PluginLoader::new(),
            descriptor: None,
            subscribers: Vec::new(),
            bindings: None,
        }
    }

    /// Uses a pre-populated task registry.
    pub fn registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Provides the plugin loader (with host constructors).
    pub fn plugins(mut self, loader: PluginLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Uses an explicit plugin descriptor instead of the well-known file.
    pub fn descriptor(mut self, descriptor: PluginDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Adds an event subscriber (on top of plugin monitoring sinks).
    pub fn subscriber(mut self, sub: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(sub);
        self
    }

    /// Provides handler bindings so the task manifest is loaded into the
    /// registry at startup.
    pub fn manifest_bindings(mut self, bindings: HandlerBindings) -> Self {
        self.bindings = Some(bindings);
        self
    }

    /// Loads plugins, resolves backends, populates the registry, and
    /// spawns the runtime. Errors are fatal startup failures.
    pub async fn build(self) -> Result<WorkerPool, RuntimeError> {
        let settings = self.settings.clone();
        log::info!("starting worker pool: {}", settings.summary());

        let caps = CapabilityRegistry::with_builtins();
        let descriptor = match &self.descriptor {
            Some(d) => d.clone(),
            None => PluginDescriptor::load_default()?,
        };
        self.loader.load(&descriptor, &caps, &settings).await?;

        // Anything failing after this point must unwind the plugins it
        // already started.
        let wired = self.wire_backends(&caps, &settings).await;
        let (queue, results) = match wired {
            Ok(pair) => pair,
            Err(e) => {
                self.loader.stop_all().await;
                return Err(e);
            }
        };

        let bus = Bus::new(BUS_CAPACITY);
        let mut subscribers = self.subscribers;
        subscribers.extend(caps.take_sinks());
        let subscriber_set = Arc::new(SubscriberSet::new(subscribers, bus.clone()));

        let pool = WorkerPool {
            settings,
            registry: self.registry,
            queue,
            results,
            bus,
            loader: Arc::new(self.loader),
            slots: Vec::new(),
            worker_handles: Mutex::new(Vec::new()),
            dispatcher_handle: Mutex::new(None),
            listener_handle: Mutex::new(None),
            subscriber_set: Mutex::new(Some(subscriber_set)),
            dispatch_token: CancellationToken::new(),
            drain_token: CancellationToken::new(),
            listener_token: CancellationToken::new(),
            queue_gauge: Arc::new(AtomicUsize::new(0)),
            stopped: AtomicBool::new(false),
        };
        Ok(pool.spawn_runtime())
    }

    /// Manifest registration plus backend resolution; split out so a
    /// failure can unwind started plugins.
    async fn wire_backends(
        &self,
        caps: &CapabilityRegistry,
        settings: &Settings,
    ) -> Result<(QueueRef, ResultRef), RuntimeError> {
        if let Some(bindings) = &self.bindings {
            let manifest = load_manifest(&settings.manifest_path)?;
            let n =
                register_from_manifest(&self.registry, &manifest, bindings, RegisterMode::Silent)?;
            log::info!("registered {n} tasks from manifest");
        }
        let queue = caps.resolve_queue(&settings.queue_backend, settings).await?;
        let results = caps
            .resolve_result(&settings.result_backend, settings)
            .await?;
        Ok((queue, results))
    }
}

/// Reads the pool's live gauges for the metrics hook.
struct PoolMetrics {
    queue_gauge: Arc<AtomicUsize>,
    slots: Vec<WorkerSlot>,
}

impl MetricsProvider for PoolMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_size: self.queue_gauge.load(Ordering::Relaxed),
            inflight_jobs: self.slots.iter().map(|s| s.load()).sum(),
            worker_count: self.slots.len(),
        }
    }
}

/// Owns the workers, the dispatcher, and graceful shutdown.
pub struct WorkerPool {
    settings: Settings,
    registry: Arc<TaskRegistry>,
    queue: QueueRef,
    results: ResultRef,
    bus: Bus,
    loader: Arc<PluginLoader>,
    slots: Vec<WorkerSlot>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    subscriber_set: Mutex<Option<Arc<SubscriberSet>>>,
    dispatch_token: CancellationToken,
    drain_token: CancellationToken,
    listener_token: CancellationToken,
    queue_gauge: Arc<AtomicUsize>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawns the listener, workers, and dispatcher; installs the metrics
    /// provider. Called once from the builder.
    fn spawn_runtime(mut self) -> Self {
        self.spawn_listener();

        let worker_count = self.settings.max_workers.max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let runner = JobRunner::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.queue),
                Arc::clone(&self.results),
                self.bus.clone(),
                index,
                self.settings.job_timeout(),
            );
            let (slot, handle) = spawn_worker(
                index,
                runner,
                Arc::clone(&self.queue),
                self.drain_token.clone(),
            );
            self.slots.push(slot);
            handles.push(handle);
        }
        *self.worker_handles.lock().expect("pool poisoned") = handles;

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.queue),
            self.slots.clone(),
            self.settings.batch_size,
            self.dispatch_token.clone(),
            Arc::clone(&self.queue_gauge),
        );
        *self.dispatcher_handle.lock().expect("pool poisoned") =
            Some(tokio::spawn(dispatcher.run()));

        metrics::install_provider(Arc::new(PoolMetrics {
            queue_gauge: Arc::clone(&self.queue_gauge),
            slots: self.slots.clone(),
        }));

        self
    }

    /// Forwards bus events to the subscriber set until shutdown.
    fn spawn_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = self
            .subscriber_set
            .lock()
            .expect("pool poisoned")
            .as_ref()
            .map(Arc::clone);
        let Some(set) = set else { return };
        let token = self.listener_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit_arc(Arc::new(ev)),
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("event listener lagged, skipped {n} events");
                            continue;
                        }
                    }
                }
            }
        });
        *self.listener_handle.lock().expect("pool poisoned") = Some(handle);
    }

    /// Enqueues a job on the pool's queue backend.
    pub async fn submit(&self, job: &Job) -> Result<(), BackendError> {
        self.queue.enqueue(job).await
    }

    /// The active queue backend.
    pub fn queue(&self) -> QueueRef {
        Arc::clone(&self.queue)
    }

    /// The active result backend.
    pub fn results(&self) -> ResultRef {
        Arc::clone(&self.results)
    }

    /// The task registry this pool executes against.
    pub fn registry(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.registry)
    }

    /// The runtime event bus (e.g. for extra subscribers in tests).
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// Current queue/in-flight/worker gauges.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_size: self.queue_gauge.load(Ordering::Relaxed),
            inflight_jobs: self.slots.iter().map(|s| s.load()).sum(),
            worker_count: self.slots.len(),
        }
    }

    /// Runs until the process receives a termination signal, then shuts
    /// down gracefully.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        if let Err(e) = termination_signal().await {
            log::error!("signal listener failed: {e}; shutting down");
        }
        self.shutdown().await
    }

    /// Graceful shutdown. Safe to call more than once; later calls are
    /// no-ops.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.publish(Event::now(EventKind::ShutdownRequested));

        // Phase 1: stop pulling new batches.
        self.dispatch_token.cancel();
        let dispatcher = self.dispatcher_handle.lock().expect("pool poisoned").take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }

        // Phase 2: let each worker finish its current job and return its
        // queued backlog, bounded by the grace period.
        self.drain_token.cancel();
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.worker_handles.lock().expect("pool poisoned"));
        let grace = self.settings.shutdown_grace();
        let drained = timeout(grace, futures::future::join_all(handles)).await;

        let result = match drained {
            Ok(_) => {
                self.bus.publish(Event::now(EventKind::DrainedWithinGrace));
                Ok(())
            }
            Err(_) => {
                // Phase 3: jobs still running past the grace re-enter the
                // pending set; their abandoned executions are discarded.
                self.bus.publish(Event::now(EventKind::GraceExceeded));
                let stuck = self.nack_running_jobs().await;
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };

        // Phase 4: plugins stop in reverse start order.
        self.loader.stop_all().await;

        // Phase 5: stop event delivery, clear metrics, flush, close.
        self.listener_token.cancel();
        let listener = self.listener_handle.lock().expect("pool poisoned").take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        let set = self.subscriber_set.lock().expect("pool poisoned").take();
        if let Some(set) = set {
            if let Ok(set) = Arc::try_unwrap(set) {
                set.shutdown().await;
            }
        }
        metrics::clear_provider();
        log::logger().flush();
        self.queue.close().await;
        self.results.close().await;

        log::info!("worker pool stopped");
        result
    }

    /// Returns the ids of jobs still marked current on any worker after
    /// the grace period, nacking each with zero delay.
    async fn nack_running_jobs(&self) -> Vec<String> {
        let mut stuck = Vec::new();
        for slot in &self.slots {
            if let Some(id) = slot.current_job() {
                if let Err(e) = self.queue.nack(&id, Duration::ZERO).await {
                    log::warn!("could not return stuck job {id}: {e}");
                }
                stuck.push(id);
            }
        }
        stuck
    }
}
