//! # Dispatcher: pulls batches from the queue and feeds workers.
//!
//! One dispatcher task per pool. Each iteration:
//! 1. Periodically sweeps expired leases back into the pending set and
//!    refreshes the queue-size gauge.
//! 2. Claims up to `batch_size` jobs (`pop_batch`).
//! 3. Assigns each job to the **least-busy** worker: fewest in-flight
//!    jobs, ties broken by lowest index.
//! 4. When the queue is empty, falls back to a short blocking `dequeue`
//!    so an idle pool wakes up promptly without spinning.
//!
//! The dispatcher stops pulling the moment its token is cancelled; that is
//! phase one of graceful shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::queue::{QueueBackend as _, QueueRef};

use super::worker::WorkerSlot;

/// Idle wait used when a batch comes back empty.
const IDLE_DEQUEUE_WAIT: Duration = Duration::from_millis(250);
/// Pause after a queue error before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);
/// How often expired leases are swept and the size gauge refreshed.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) struct Dispatcher {
    queue: QueueRef,
    workers: Vec<WorkerSlot>,
    batch_size: usize,
    token: CancellationToken,
    queue_gauge: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(
        queue: QueueRef,
        workers: Vec<WorkerSlot>,
        batch_size: usize,
        token: CancellationToken,
        queue_gauge: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            queue,
            workers,
            batch_size: batch_size.max(1),
            token,
            queue_gauge,
        }
    }

    /// Main loop; returns when the dispatch token is cancelled.
    pub async fn run(self) {
        log::info!("[dispatcher] started");
        self.maintenance().await;
        let mut last_maintenance = Instant::now();

        while !self.token.is_cancelled() {
            if last_maintenance.elapsed() >= MAINTENANCE_INTERVAL {
                last_maintenance = Instant::now();
                self.maintenance().await;
            }

            match self.queue.pop_batch(self.batch_size).await {
                Ok(jobs) if !jobs.is_empty() => {
                    for job in jobs {
                        self.assign(job).await;
                    }
                }
                Ok(_) => {
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        res = self.queue.dequeue(IDLE_DEQUEUE_WAIT) => match res {
                            Ok(Some(job)) => self.assign(job).await,
                            Ok(None) => {}
                            Err(e) => {
                                log::warn!("[dispatcher] dequeue failed: {e}");
                                time::sleep(ERROR_BACKOFF).await;
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[dispatcher] pop_batch failed: {e}");
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        log::info!("[dispatcher] shutdown signal received, exiting");
    }

    /// Sweeps expired leases and refreshes the queue-size gauge.
    async fn maintenance(&self) {
        if let Err(e) = self.queue.reclaim_expired().await {
            log::warn!("[dispatcher] lease sweep failed: {e}");
        }
        match self.queue.qsize().await {
            Ok(n) => self.queue_gauge.store(n, Ordering::Relaxed),
            Err(e) => log::debug!("[dispatcher] qsize failed: {e}"),
        }
    }

    /// Hands the job to the least-busy worker (lowest index on ties).
    async fn assign(&self, job: crate::job::Job) {
        let target = self
            .workers
            .iter()
            .min_by_key(|w| (w.load(), w.index))
            .expect("pool has at least one worker");
        log::debug!("[dispatcher] job {} -> worker-{}", job.id, target.index);
        let id = job.id.clone();
        if !target.submit(job) {
            // Worker already exited (shutdown race); release the lease so
            // the job stays visible.
            if let Err(e) = self.queue.nack(&id, Duration::ZERO).await {
                log::warn!("[dispatcher] could not return job {id}: {e}");
            }
        }
    }
}
