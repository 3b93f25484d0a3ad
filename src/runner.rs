//! # Job runner: executes one job with timeout, hooks, and retry logic.
//!
//! The runner owns everything that happens between a worker receiving a
//! job and the queue lease being finished:
//!
//! 1. Resolve the task; unknown names are terminal `FAILED`.
//! 2. Mark `RUNNING`, call the `before_job` hook (hook errors log, never
//!    abort).
//! 3. Execute the handler on its own spawned task with the configured
//!    wall-clock limit.
//! 4. Persist the outcome, finish the lease (`ack` on terminal outcomes,
//!    `requeue` with the updated payload on retries), publish events.
//!
//! ## Timeout semantics
//! The handler future runs on a dedicated `tokio::spawn`. On deadline the
//! `JoinHandle` is dropped: the task keeps running detached and its result
//! is discarded. Cooperative cancellation of user code is not guaranteed:
//! the worker slot is returned immediately, the runaway future is lost
//! until it completes on its own.
//!
//! ## Rules
//! - The runner never propagates an execution error out of its frame;
//!   every outcome becomes a terminal status or a requeue.
//! - Each attempt appends exactly one record to `attempts`, so
//!   `attempts.len() <= max_retries + 1`.
//! - Backend I/O goes through a bounded retry (3 attempts, exponential
//!   backoff) for transient failures. A terminal record that still cannot
//!   be persisted sends the job back to the queue (`nack`) instead of
//!   acking it: a lease only ends in `ack` once the record is stored, so
//!   either a terminal record exists or the job is visible again. A lost
//!   `ack` is recovered by the lease sweeper as a re-execution.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinError;
use tokio::time;

use crate::error::{BackendError, JobError};
use crate::events::{Bus, Event, EventKind};
use crate::job::{now_ms, Attempt, Job, JobValue, TimeoutPolicy};
use crate::policies::BackoffPolicy;
use crate::queue::{QueueBackend as _, QueueRef};
use crate::registry::{TaskDefinition, TaskFailure, TaskRegistry};
use crate::results::{JobRecord, ResultBackend as _, ResultRef};

/// Bounded attempts for backend I/O before escalating.
const BACKEND_ATTEMPTS: usize = 3;

/// Executes a single job against the registry, queue, and result store.
pub struct JobRunner {
    registry: Arc<TaskRegistry>,
    queue: QueueRef,
    results: ResultRef,
    bus: Bus,
    worker_id: usize,
    default_timeout: Duration,
    backoff: BackoffPolicy,
}

impl JobRunner {
    /// Creates a runner for one worker slot.
    pub fn new(
        registry: Arc<TaskRegistry>,
        queue: QueueRef,
        results: ResultRef,
        bus: Bus,
        worker_id: usize,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            queue,
            results,
            bus,
            worker_id,
            default_timeout,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Runs `job` to a terminal outcome or a requeue. Never returns an
    /// error: all failures are captured into the job record.
    pub async fn run(&self, mut job: Job) {
        let attempt_no = job.attempts.len() as u32 + 1;
        self.bus.publish(
            Event::now(EventKind::JobStarting)
                .with_job(&job.id)
                .with_task(&job.func_name)
                .with_attempt(attempt_no),
        );

        let def = match self.registry.get(&job.func_name) {
            Ok(def) => def,
            Err(_) => {
                self.finish_unknown_task(&mut job).await;
                return;
            }
        };

        job.mark_running();
        if let Some(hook) = &def.hooks().before_job {
            if let Err(e) = hook() {
                log::warn!(
                    "[worker-{}] before_job hook failed for {}: {e}",
                    self.worker_id,
                    job.func_name
                );
            }
        }

        let started = now_ms();
        let outcome = self.execute(&def, &job).await;
        let finished = now_ms();

        match outcome {
            Ok(value) => {
                job.record_attempt(Attempt {
                    started_at: started,
                    finished_at: finished,
                    outcome: "success".to_owned(),
                    error: None,
                    traceback: None,
                });
                if let Some(hook) = &def.hooks().after_job {
                    if let Err(e) = hook(&value) {
                        log::warn!(
                            "[worker-{}] after_job hook failed for {}: {e}",
                            self.worker_id,
                            job.func_name
                        );
                    }
                }
                job.mark_success();
                let stored = if job.store_result {
                    self.persist(JobRecord::success(&job, value)).await
                } else {
                    Ok(())
                };
                if self.finish_terminal(&job, stored).await {
                    self.bus.publish(
                        Event::now(EventKind::JobSucceeded)
                            .with_job(&job.id)
                            .with_task(&job.func_name)
                            .with_attempt(attempt_no),
                    );
                }
            }
            Err(JobError::Timeout { timeout: limit }) => {
                let summary = format!("timed out after {:.3}s", limit.as_secs_f64());
                job.record_attempt(Attempt {
                    started_at: started,
                    finished_at: finished,
                    outcome: "timeout".to_owned(),
                    error: Some(summary.clone()),
                    traceback: None,
                });
                self.bus.publish(
                    Event::now(EventKind::JobTimedOut)
                        .with_job(&job.id)
                        .with_task(&job.func_name)
                        .with_attempt(attempt_no),
                );
                self.apply_timeout_policy(&mut job, &def, summary, attempt_no)
                    .await;
            }
            Err(error) => {
                let failure = match &error {
                    JobError::Execution {
                        kind,
                        message,
                        traceback,
                    } => {
                        let mut failure = TaskFailure::new(kind.clone(), message.clone());
                        if let Some(tb) = traceback {
                            failure = failure.with_traceback(tb.clone());
                        }
                        failure
                    }
                    other => TaskFailure::new(other.as_label(), other.to_string()),
                };
                if let Some(hook) = &def.hooks().on_error {
                    if let Err(e) = hook(&failure) {
                        log::warn!(
                            "[worker-{}] on_error hook failed for {}: {e}",
                            self.worker_id,
                            job.func_name
                        );
                    }
                }
                let summary = failure.summary();
                let traceback = failure
                    .traceback
                    .clone()
                    .unwrap_or_else(|| failure.summary());
                job.record_attempt(Attempt {
                    started_at: started,
                    finished_at: finished,
                    outcome: "failed".to_owned(),
                    error: Some(summary.clone()),
                    traceback: Some(traceback.clone()),
                });

                if error.is_retryable() && job.can_retry() {
                    job.consume_retry();
                    self.schedule_retry(&mut job, attempt_no).await;
                } else {
                    job.mark_failed();
                    let stored = if job.store_result {
                        self.persist(JobRecord::failure(&job, summary.clone(), Some(traceback)))
                            .await
                    } else {
                        Ok(())
                    };
                    if self.finish_terminal(&job, stored).await {
                        self.bus.publish(
                            Event::now(EventKind::JobFailed)
                                .with_job(&job.id)
                                .with_task(&job.func_name)
                                .with_attempt(attempt_no)
                                .with_error(summary),
                        );
                    }
                }
            }
        }
    }

    /// Runs the handler with the job's wall-clock limit. On deadline the
    /// spawned task is abandoned and its eventual result discarded.
    async fn execute(&self, def: &TaskDefinition, job: &Job) -> Result<JobValue, JobError> {
        let limit = job
            .timeout_secs
            .map(Duration::from_secs_f64)
            .unwrap_or(self.default_timeout);

        let handler = def.handler();
        let args = job.args.clone();
        let kwargs = job.kwargs.clone();
        let handle = tokio::spawn(async move { handler.call(args, kwargs).await });

        if limit.is_zero() {
            return match handle.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(failure)) => Err(execution_error(failure)),
                Err(join_err) => Err(execution_error(panic_failure(join_err))),
            };
        }

        match time::timeout(limit, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(failure))) => Err(execution_error(failure)),
            Ok(Err(join_err)) => Err(execution_error(panic_failure(join_err))),
            Err(_elapsed) => Err(JobError::Timeout { timeout: limit }),
        }
    }

    /// Applies the job's timeout policy after a timed-out attempt.
    async fn apply_timeout_policy(
        &self,
        job: &mut Job,
        def: &TaskDefinition,
        summary: String,
        attempt_no: u32,
    ) {
        match job.timeout_policy {
            TimeoutPolicy::Retry if job.can_retry() => {
                job.consume_retry();
                self.schedule_retry(job, attempt_no).await;
            }
            TimeoutPolicy::Retry | TimeoutPolicy::Fail => {
                if let Some(hook) = &def.hooks().on_error {
                    let failure = TaskFailure::new("Timeout", summary.clone());
                    if let Err(e) = hook(&failure) {
                        log::warn!(
                            "[worker-{}] on_error hook failed for {}: {e}",
                            self.worker_id,
                            job.func_name
                        );
                    }
                }
                self.finish_timeout(job, summary).await;
            }
            TimeoutPolicy::Ignore => {
                // Acknowledged without retry and without a traceback; the
                // record still says TIMEOUT so the outcome is inspectable.
                self.finish_timeout(job, summary).await;
            }
        }
    }

    async fn finish_timeout(&self, job: &mut Job, summary: String) {
        job.mark_timeout();
        let stored = if job.store_result {
            self.persist(JobRecord::failure(job, summary, None)).await
        } else {
            Ok(())
        };
        self.finish_terminal(job, stored).await;
    }

    /// Terminal failure for a job whose task name is not registered.
    async fn finish_unknown_task(&self, job: &mut Job) {
        let summary = format!("UnknownTask: task '{}' is not registered", job.func_name);
        log::error!("[worker-{}] {summary}", self.worker_id);
        let now = now_ms();
        job.mark_running();
        job.record_attempt(Attempt {
            started_at: now,
            finished_at: now,
            outcome: "unknown_task".to_owned(),
            error: Some(summary.clone()),
            traceback: None,
        });
        job.mark_failed();
        let stored = if job.store_result {
            self.persist(JobRecord::failure(job, summary.clone(), None)).await
        } else {
            Ok(())
        };
        if self.finish_terminal(job, stored).await {
            self.bus.publish(
                Event::now(EventKind::JobFailed)
                    .with_job(&job.id)
                    .with_task(&job.func_name)
                    .with_error(summary),
            );
        }
    }

    /// Returns the job to the queue with its updated retry bookkeeping.
    async fn schedule_retry(&self, job: &mut Job, attempt_no: u32) {
        job.mark_pending();
        let delay = Duration::from_secs(job.retry_delay_secs);
        let queue = Arc::clone(&self.queue);
        let payload = job.clone();
        let outcome = self
            .with_backend_retry("requeue", move || {
                let queue = Arc::clone(&queue);
                let payload = payload.clone();
                async move { queue.requeue(&payload, delay).await }.boxed()
            })
            .await;
        if let Err(e) = outcome {
            log::error!(
                "[worker-{}] could not requeue job {}: {e}; lease sweeper will recover it",
                self.worker_id,
                job.id
            );
            return;
        }
        self.bus.publish(
            Event::now(EventKind::RetryScheduled)
                .with_job(&job.id)
                .with_task(&job.func_name)
                .with_attempt(attempt_no)
                .with_delay(delay),
        );
    }

    /// Persists a terminal record, retrying transient backend failures.
    ///
    /// On exhaustion the caller must release the lease instead of acking:
    /// the job stays visible and the record is written on redelivery.
    async fn persist(&self, record: JobRecord) -> Result<(), BackendError> {
        let results = Arc::clone(&self.results);
        let is_success = record.result.is_some();
        let outcome = self
            .with_backend_retry("persist", move || {
                let results = Arc::clone(&results);
                let record = record.clone();
                async move {
                    if is_success {
                        results.set_result(record).await
                    } else {
                        results.set_error(record).await
                    }
                }
                .boxed()
            })
            .await;
        if let Err(e) = &outcome {
            log::error!(
                "[worker-{}] could not persist terminal record: {e}",
                self.worker_id
            );
        }
        outcome
    }

    /// Finishes the lease: `ack` once the terminal record is safely stored
    /// (or storage is suppressed), `nack` otherwise so the job stays
    /// visible. Returns true when the job was acked.
    async fn finish_terminal(&self, job: &Job, stored: Result<(), BackendError>) -> bool {
        match stored {
            Ok(()) => {
                self.ack(job).await;
                true
            }
            Err(_) => {
                self.release(job).await;
                false
            }
        }
    }

    /// Returns the job to the pending set after a persistence failure; the
    /// queue's stored payload is redelivered once visible again.
    async fn release(&self, job: &Job) {
        let queue = Arc::clone(&self.queue);
        let id = job.id.clone();
        let outcome = self
            .with_backend_retry("nack", move || {
                let queue = Arc::clone(&queue);
                let id = id.clone();
                async move { queue.nack(&id, Duration::ZERO).await }.boxed()
            })
            .await;
        if let Err(e) = outcome {
            log::error!(
                "[worker-{}] could not return job {}: {e}; lease sweeper will recover it",
                self.worker_id,
                job.id
            );
        }
    }

    /// Finishes the queue lease positively, retrying transient failures.
    async fn ack(&self, job: &Job) {
        let queue = Arc::clone(&self.queue);
        let id = job.id.clone();
        let outcome = self
            .with_backend_retry("ack", move || {
                let queue = Arc::clone(&queue);
                let id = id.clone();
                async move { queue.ack(&id).await }.boxed()
            })
            .await;
        if let Err(e) = outcome {
            // The lease will expire and the job re-run; at-least-once in
            // this failure mode.
            log::error!(
                "[worker-{}] ack of job {} failed: {e}",
                self.worker_id,
                job.id
            );
        }
    }

    /// Runs `op` up to [`BACKEND_ATTEMPTS`] times with backoff on
    /// transient failures.
    async fn with_backend_retry<F>(&self, what: &str, mut op: F) -> Result<(), BackendError>
    where
        F: FnMut() -> BoxFuture<'static, Result<(), BackendError>>,
    {
        let mut prev = None;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < BACKEND_ATTEMPTS => {
                    let delay = self.backoff.next(prev);
                    prev = Some(delay);
                    log::warn!(
                        "[worker-{}] {what} failed (attempt {attempt}): {e}; retrying in {delay:?}",
                        self.worker_id
                    );
                    time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn execution_error(failure: TaskFailure) -> JobError {
    JobError::Execution {
        kind: failure.kind,
        message: failure.message,
        traceback: failure.traceback,
    }
}

fn panic_failure(join_err: JoinError) -> TaskFailure {
    if join_err.is_panic() {
        TaskFailure::new("Panic", format!("task panicked: {join_err}"))
    } else {
        TaskFailure::new("Cancelled", join_err.to_string())
    }
}
