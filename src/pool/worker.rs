//! # Worker: a single-slot executor with a personal queue.
//!
//! Each worker owns an unbounded personal queue fed by the dispatcher and
//! runs its assigned jobs strictly sequentially through the
//! [`JobRunner`]. The in-flight counter (assigned + running) is what the
//! dispatcher's least-busy assignment and the pool's metrics read.
//!
//! ## Drain protocol
//! When the drain token fires the worker finishes the job it is currently
//! executing, then nacks everything still sitting in its personal queue
//! (zero delay, straight back to the pending set) and exits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::job::Job;
use crate::queue::{QueueBackend as _, QueueRef};
use crate::runner::JobRunner;

/// Dispatcher-facing handle to one worker.
#[derive(Clone)]
pub(crate) struct WorkerSlot {
    /// Stable worker index; ties in least-busy assignment break on it.
    pub index: usize,
    tx: mpsc::UnboundedSender<Job>,
    load: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<String>>>,
}

impl WorkerSlot {
    /// Jobs assigned to this worker that have not finished (queued +
    /// running).
    pub fn load(&self) -> usize {
        self.load.load(Ordering::Relaxed)
    }

    /// Id of the job currently executing, if any.
    pub fn current_job(&self) -> Option<String> {
        self.current.lock().expect("worker slot poisoned").clone()
    }

    /// Hands a job to this worker. Returns false when the worker has
    /// already exited (the caller must release the lease).
    pub fn submit(&self, job: Job) -> bool {
        self.load.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(job).is_err() {
            self.load.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }
}

/// Spawns worker `index` and returns its slot and join handle.
pub(crate) fn spawn_worker(
    index: usize,
    runner: JobRunner,
    queue: QueueRef,
    drain: CancellationToken,
) -> (WorkerSlot, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let load = Arc::new(AtomicUsize::new(0));
    let current = Arc::new(Mutex::new(None::<String>));

    let slot_load = Arc::clone(&load);
    let slot_current = Arc::clone(&current);

    let handle = tokio::spawn(async move {
        log::info!("[worker-{index}] online");
        loop {
            tokio::select! {
                // Drain wins over more queued work: after the current job
                // finishes, a cancelled token means no further job starts.
                biased;
                _ = drain.cancelled() => {
                    // Return everything still queued to the pending set.
                    while let Ok(job) = rx.try_recv() {
                        if let Err(e) = queue.nack(&job.id, Duration::ZERO).await {
                            log::warn!(
                                "[worker-{index}] could not return job {} on drain: {e}",
                                job.id
                            );
                        }
                        load.fetch_sub(1, Ordering::Relaxed);
                    }
                    break;
                }
                job = rx.recv() => {
                    let Some(job) = job else { break };
                    *current.lock().expect("worker slot poisoned") = Some(job.id.clone());
                    log::debug!("[worker-{index}] executing job {} ({})", job.id, job.func_name);
                    runner.run(job).await;
                    *current.lock().expect("worker slot poisoned") = None;
                    load.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
        log::info!("[worker-{index}] drained, shutting down");
    });

    (
        WorkerSlot {
            index,
            tx,
            load: slot_load,
            current: slot_current,
        },
        handle,
    )
}
