//! # nuvom
//!
//! **Nuvom** is a lightweight, broker-less background job execution engine:
//! tasks are registered in-process, invocations are serialized into durable
//! jobs, and a local worker pool runs them with retry and timeout
//! discipline: no Redis, no AMQP, first-class support for non-POSIX hosts.
//!
//! ## Features
//!
//! | Area              | Description                                                        | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------------|---------------------------------------------|
//! | **Jobs**          | Durable invocation records with retry/timeout parameters.          | [`Job`], [`JobStatus`], [`TimeoutPolicy`]   |
//! | **Tasks**         | Registered callables plus default execution parameters.            | [`TaskRegistry`], [`TaskDefinition`], [`TaskFn`] |
//! | **Queues**        | Swappable backends: in-memory, atomic per-job files, SQLite.       | [`QueueBackend`], [`FileQueue`], [`SqliteQueue`] |
//! | **Results**       | Terminal records with attempts, errors, tracebacks.                | [`ResultBackend`], [`JobRecord`]            |
//! | **Plugins**       | Descriptor-selected extensions with a versioned protocol.          | [`Plugin`], [`PluginLoader`], [`Capability`] |
//! | **Execution**     | Worker pool with least-busy dispatch and graceful shutdown.        | [`WorkerPool`], [`WorkerPoolBuilder`]       |
//! | **Observability** | Event bus with isolated subscribers and a pull metrics hook.       | [`Subscribe`], [`MetricsProvider`]          |
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use nuvom::{
//!     JobValue, RegisterMode, Settings, TaskDefinition, TaskFn, TaskRegistry,
//!     WorkerPoolBuilder,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(TaskRegistry::new());
//!     let add = TaskDefinition::builder(
//!         "add",
//!         TaskFn::arc(|args, _kwargs| async move {
//!             let x = args[0].as_int().unwrap_or(0);
//!             let y = args[1].as_int().unwrap_or(0);
//!             Ok(JobValue::Int(x + y))
//!         }),
//!     )
//!     .retries(2)
//!     .build();
//!     registry.register(add.clone(), RegisterMode::Strict)?;
//!
//!     let mut settings = Settings::from_env();
//!     settings.queue_backend = "memory".into();
//!
//!     let pool = WorkerPoolBuilder::new(settings)
//!         .registry(registry)
//!         .build()
//!         .await?;
//!
//!     let job = add.make_job(vec![JobValue::Int(2), JobValue::Int(3)], BTreeMap::new());
//!     pool.submit(&job).await?;
//!
//!     pool.run_until_signal().await?;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod codec;
mod config;
mod error;
mod events;
mod fsutil;
mod job;
mod metrics;
mod plugins;
mod policies;
mod pool;
mod queue;
mod registry;
mod results;
mod runner;

// ---- Public re-exports ----

pub use codec::{BincodeCodec, CodecRef, JobCodec};
pub use config::{Environment, Settings};
pub use error::{BackendError, CodecError, JobError, RuntimeError};
pub use events::{Bus, Event, EventKind, LogWriter, Subscribe, SubscriberSet};
pub use job::{Attempt, Job, JobStatus, JobValue, TimeoutPolicy};
pub use metrics::{
    clear_provider, current_provider, install_provider, MetricsProvider, MetricsSnapshot,
};
pub use plugins::{
    Capability, CapabilityRegistry, Plugin, PluginContext, PluginDescriptor, PluginLoader,
    QueueFactory, ResultFactory, API_VERSION, DEFAULT_DESCRIPTOR_PATH,
};
pub use policies::BackoffPolicy;
pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use queue::{FileQueue, MemoryQueue, QueueBackend, QueueRef, SqliteQueue};
pub use registry::{
    load_manifest, register_from_manifest, AfterHook, BeforeHook, ErrorHook, HandlerBindings,
    HandlerRef, Hooks, ManifestEntry, ManifestMetadata, RegisterMode, TaskDefinition,
    TaskDefinitionBuilder, TaskFailure, TaskFn, TaskHandler, TaskManifest, TaskRegistry,
    MANIFEST_VERSION,
};
pub use results::{
    FileResultBackend, JobFilter, JobRecord, MemoryResultBackend, ResultBackend, ResultRef,
    SqliteResultBackend,
};
pub use runner::JobRunner;
