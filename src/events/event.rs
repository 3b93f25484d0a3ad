//! # Runtime events emitted by the dispatcher, workers, and runner.
//!
//! [`EventKind`] classifies events across three categories:
//! - **Job lifecycle**: starting, succeeded, failed, timed out, retry scheduled
//! - **Shutdown**: request, drained-within-grace, grace exceeded
//! - **Subscriber health**: overflow, panic
//!
//! [`Event`] carries the metadata a sink needs: job id, task name, attempt
//! number, error text, retry delay.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so sinks can re-order events delivered out-of-order
//! through async channels.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    SubscriberPanicked,
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or programmatic).
    ShutdownRequested,
    /// All workers drained within the configured grace period.
    DrainedWithinGrace,
    /// Grace period exceeded; some jobs were returned to the queue.
    GraceExceeded,

    // === Job lifecycle events ===
    /// A job is starting execution on a worker.
    JobStarting,
    /// A job finished and produced a result.
    JobSucceeded,
    /// A job reached terminal `FAILED`.
    JobFailed,
    /// A job hit its wall-clock limit.
    JobTimedOut,
    /// A failed or timed-out job was scheduled for another attempt.
    RetryScheduled,
}

/// Runtime event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Job id, if applicable.
    pub job: Option<String>,
    /// Task name, if applicable.
    pub task: Option<String>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Delay before the job becomes visible again (retries).
    pub delay: Option<Duration>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            job: None,
            task: None,
            attempt: None,
            error: None,
            delay: None,
        }
    }

    /// Attaches a job id.
    pub fn with_job(mut self, id: impl Into<String>) -> Self {
        self.job = Some(id.into());
        self
    }

    /// Attaches a task name.
    pub fn with_task(mut self, name: impl Into<String>) -> Self {
        self.task = Some(name.into());
        self
    }

    /// Attaches an attempt count.
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a retry delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_error(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_error(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::now(EventKind::JobStarting);
        let b = Event::now(EventKind::JobSucceeded);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::JobFailed)
            .with_job("j-1")
            .with_task("demo")
            .with_attempt(2)
            .with_error("boom")
            .with_delay(Duration::from_secs(1));
        assert_eq!(ev.job.as_deref(), Some("j-1"));
        assert_eq!(ev.task.as_deref(), Some("demo"));
        assert_eq!(ev.attempt, Some(2));
        assert_eq!(ev.error.as_deref(), Some("boom"));
        assert_eq!(ev.delay, Some(Duration::from_secs(1)));
    }
}
