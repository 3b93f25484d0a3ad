//! # Queue backend contract and built-in implementations.
//!
//! Every queue backend implements [`QueueBackend`]; the dispatcher and
//! runner only ever hold a [`QueueRef`] resolved by name at startup, never
//! a concrete type.
//!
//! ## Lease semantics
//! A successful `dequeue`/`pop_batch` moves the job into the backend's
//! in-flight set under a visibility timeout. The holder must finish the
//! lease with exactly one of:
//! - [`ack`](QueueBackend::ack): the job reached a terminal outcome;
//!   the backend forgets it.
//! - [`nack`](QueueBackend::nack): release the lease unchanged; the job
//!   becomes visible again after `requeue_delay` with the payload the
//!   backend already holds (`retries_left` untouched).
//! - [`requeue`](QueueBackend::requeue): release the lease with an
//!   **updated** payload (the runner's retry path: decremented budget,
//!   appended attempt records).
//!
//! Leases that are never finished are reclaimed by
//! [`reclaim_expired`](QueueBackend::reclaim_expired) once the visibility
//! timeout elapses; the dispatcher calls it periodically.
//!
//! ## Ordering
//! Arrival order is preserved up to batch granularity and lease requeues.
//! Callers treat order as a hint.

mod file;
mod memory;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::job::Job;

pub use file::FileQueue;
pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

/// Shared handle to a queue backend.
pub type QueueRef = Arc<dyn QueueBackend>;

/// Swappable job queue implementation.
#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    /// Makes the job visible for dequeue. Callers must not re-submit an id.
    async fn enqueue(&self, job: &Job) -> Result<(), BackendError>;

    /// Blocking wait up to `timeout` for a single job; `None` on
    /// timeout/empty. A returned job is leased to the caller.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, BackendError>;

    /// Non-blocking best-effort claim of up to `max` jobs, in arrival
    /// order. Every returned job is leased to the caller.
    async fn pop_batch(&self, max: usize) -> Result<Vec<Job>, BackendError>;

    /// Finishes a lease positively: the job reached a terminal outcome.
    async fn ack(&self, id: &str) -> Result<(), BackendError>;

    /// Releases a lease with the stored payload unchanged; the job becomes
    /// visible again after `requeue_delay`.
    async fn nack(&self, id: &str, requeue_delay: Duration) -> Result<(), BackendError>;

    /// Releases a lease with an updated payload (retry bookkeeping); the
    /// job becomes visible again after `requeue_delay`.
    async fn requeue(&self, job: &Job, requeue_delay: Duration) -> Result<(), BackendError>;

    /// Approximate pending count; may be eventually consistent.
    async fn qsize(&self) -> Result<usize, BackendError>;

    /// Removes all pending and in-flight jobs. Intended for tests.
    async fn clear(&self) -> Result<(), BackendError>;

    /// Returns expired leases to the pending set with `retries_left`
    /// unchanged; reports how many were reclaimed. No-op for backends
    /// without persistence.
    async fn reclaim_expired(&self) -> Result<usize, BackendError> {
        Ok(0)
    }

    /// Releases backend resources during graceful shutdown. No-op by
    /// default.
    async fn close(&self) {}
}
