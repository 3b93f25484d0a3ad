//! # Job model: one persisted invocation of a registered task.
//!
//! A [`Job`] binds a task name to concrete arguments plus the execution
//! parameters in force when it was submitted (retry budget, timeout,
//! timeout policy, result persistence). Jobs are what queue backends carry
//! and what the runner executes.
//!
//! ## Lifecycle
//! ```text
//! PENDING ──dequeue──► RUNNING ──ok────────► SUCCESS
//!                        │  └──exception──► FAILED ──retries_left>0──► PENDING
//!                        └──timeout──► (policy) ──► TIMEOUT | PENDING
//! PENDING ──withdrawn without requeue──► CANCELLED
//! ```
//!
//! ## Rules
//! - Terminal statuses (`SUCCESS`, `FAILED`, `TIMEOUT`, `CANCELLED`) are
//!   never replaced; `mark_*` on a terminal job is a no-op.
//! - `retries_left <= max_retries` and only ever decreases.
//! - `finished_at >= started_at >= enqueued_at >= created_at` whenever the
//!   later timestamp is set.

mod value;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use value::JobValue;

/// Current epoch milliseconds (UTC).
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current epoch nanoseconds (UTC). Saturates far in the future (year 2262).
pub(crate) fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Execution state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting in a queue backend.
    Pending,
    /// Held by exactly one worker lease.
    Running,
    /// Finished and produced a result.
    Success,
    /// Exhausted its retry budget with a failure.
    Failed,
    /// Hit its wall-clock limit under a non-retrying policy (or exhausted).
    Timeout,
    /// Withdrawn before execution without requeue.
    Cancelled,
}

impl JobStatus {
    /// Stable uppercase name used in persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Timeout => "TIMEOUT",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parses the persisted uppercase name.
    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "SUCCESS" => Some(JobStatus::Success),
            "FAILED" => Some(JobStatus::Failed),
            "TIMEOUT" => Some(JobStatus::Timeout),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// True once the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a job's wall-clock limit elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    /// Spend the retry budget; terminal `TIMEOUT` once exhausted.
    Retry,
    /// Terminal `TIMEOUT` immediately.
    Fail,
    /// Acknowledge and record `TIMEOUT` without traceback; never retry.
    Ignore,
}

impl TimeoutPolicy {
    /// Stable lowercase name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutPolicy::Retry => "retry",
            TimeoutPolicy::Fail => "fail",
            TimeoutPolicy::Ignore => "ignore",
        }
    }

    /// Parses the configuration name.
    pub fn parse(s: &str) -> Option<TimeoutPolicy> {
        match s {
            "retry" => Some(TimeoutPolicy::Retry),
            "fail" => Some(TimeoutPolicy::Fail),
            "ignore" => Some(TimeoutPolicy::Ignore),
            _ => None,
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        TimeoutPolicy::Fail
    }
}

/// One execution attempt of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// When the attempt started (epoch ms).
    pub started_at: i64,
    /// When the attempt finished (epoch ms).
    pub finished_at: i64,
    /// Stable outcome label (`success`, `failed`, `timeout`, `unknown_task`).
    pub outcome: String,
    /// Error summary, if the attempt failed.
    pub error: Option<String>,
    /// Full traceback text, if the attempt failed with one.
    pub traceback: Option<String>,
}

/// A concrete, persisted invocation of a task with fixed arguments and
/// execution parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique identifier, stable for the job's whole lifetime.
    pub id: String,
    /// Registered task name.
    pub func_name: String,
    /// Positional arguments.
    pub args: Vec<JobValue>,
    /// Named arguments.
    pub kwargs: BTreeMap<String, JobValue>,
    /// Remaining retry budget.
    pub retries_left: u32,
    /// Original retry budget.
    pub max_retries: u32,
    /// Delay before a retried job becomes visible again.
    pub retry_delay_secs: u64,
    /// Per-job wall-clock limit in seconds; `None` uses the runtime default.
    pub timeout_secs: Option<f64>,
    /// Decision to apply after a timeout.
    pub timeout_policy: TimeoutPolicy,
    /// When false, terminal outcomes are not persisted.
    pub store_result: bool,
    /// Submission time (epoch ms).
    pub created_at: i64,
    /// Set when the job entered a queue backend.
    pub enqueued_at: Option<i64>,
    /// Set when the first attempt started.
    pub started_at: Option<i64>,
    /// Set when the job reached a terminal status.
    pub finished_at: Option<i64>,
    /// Ordered record of every attempt.
    pub attempts: Vec<Attempt>,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Optional human metadata.
    pub tags: Vec<String>,
    /// Optional human description.
    pub description: Option<String>,
}

impl Job {
    /// Creates a pending job with a fresh v4 id and default parameters
    /// (no retries, runtime default timeout, results stored).
    pub fn new(
        func_name: impl Into<String>,
        args: Vec<JobValue>,
        kwargs: BTreeMap<String, JobValue>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            func_name: func_name.into(),
            args,
            kwargs,
            retries_left: 0,
            max_retries: 0,
            retry_delay_secs: 0,
            timeout_secs: None,
            timeout_policy: TimeoutPolicy::default(),
            store_result: true,
            created_at: now_ms(),
            enqueued_at: None,
            started_at: None,
            finished_at: None,
            attempts: Vec::new(),
            status: JobStatus::Pending,
            tags: Vec::new(),
            description: None,
        }
    }

    /// Sets the retry budget (both `max_retries` and `retries_left`).
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self.retries_left = retries;
        self
    }

    /// Sets the delay applied before a retried job becomes visible again.
    pub fn with_retry_delay_secs(mut self, secs: u64) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    /// Sets the per-job wall-clock limit.
    pub fn with_timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sets the timeout policy.
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    /// Suppresses or enables result persistence.
    pub fn with_store_result(mut self, store: bool) -> Self {
        self.store_result = store;
        self
    }

    /// Attaches tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Attaches a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True once the job can no longer change status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the retry budget allows another attempt.
    pub fn can_retry(&self) -> bool {
        self.retries_left > 0
    }

    /// Spends one retry. Returns false (and changes nothing) when the
    /// budget is empty.
    pub fn consume_retry(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }

    /// Records the enqueue transition.
    pub fn mark_enqueued(&mut self) {
        if self.enqueued_at.is_none() {
            self.enqueued_at = Some(now_ms());
        }
    }

    /// Transitions to `RUNNING` and stamps `started_at` on the first call.
    pub fn mark_running(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now_ms());
        }
    }

    /// Transitions to terminal `SUCCESS`.
    pub fn mark_success(&mut self) {
        self.finish(JobStatus::Success);
    }

    /// Transitions to terminal `FAILED`.
    pub fn mark_failed(&mut self) {
        self.finish(JobStatus::Failed);
    }

    /// Transitions to terminal `TIMEOUT`.
    pub fn mark_timeout(&mut self) {
        self.finish(JobStatus::Timeout);
    }

    /// Transitions to terminal `CANCELLED`.
    pub fn mark_cancelled(&mut self) {
        self.finish(JobStatus::Cancelled);
    }

    /// Returns the job to `PENDING` for a retry. No-op on terminal jobs.
    pub fn mark_pending(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Pending;
    }

    /// Appends an attempt record.
    pub fn record_attempt(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    fn finish(&mut self, terminal: JobStatus) {
        if self.is_terminal() {
            return;
        }
        self.status = terminal;
        if self.finished_at.is_none() {
            self.finished_at = Some(now_ms());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("demo", vec![JobValue::Int(1)], BTreeMap::new())
    }

    #[test]
    fn builder_sets_budget_and_params() {
        let j = job()
            .with_retries(3)
            .with_retry_delay_secs(5)
            .with_timeout_secs(1.5)
            .with_timeout_policy(TimeoutPolicy::Retry)
            .with_store_result(false);
        assert_eq!(j.retries_left, 3);
        assert_eq!(j.max_retries, 3);
        assert_eq!(j.retry_delay_secs, 5);
        assert_eq!(j.timeout_secs, Some(1.5));
        assert_eq!(j.timeout_policy, TimeoutPolicy::Retry);
        assert!(!j.store_result);
    }

    #[test]
    fn terminal_status_is_never_replaced() {
        let mut j = job();
        j.mark_running();
        j.mark_success();
        let finished = j.finished_at;
        j.mark_failed();
        j.mark_running();
        j.mark_cancelled();
        assert_eq!(j.status, JobStatus::Success);
        assert_eq!(j.finished_at, finished);
    }

    #[test]
    fn retry_budget_only_decreases() {
        let mut j = job().with_retries(1);
        assert!(j.can_retry());
        assert!(j.consume_retry());
        assert!(!j.can_retry());
        assert!(!j.consume_retry());
        assert_eq!(j.retries_left, 0);
        assert_eq!(j.max_retries, 1);
    }

    #[test]
    fn timestamps_are_ordered() {
        let mut j = job();
        j.mark_enqueued();
        j.mark_running();
        j.mark_success();
        let created = j.created_at;
        let enqueued = j.enqueued_at.unwrap();
        let started = j.started_at.unwrap();
        let finished = j.finished_at.unwrap();
        assert!(enqueued >= created);
        assert!(started >= enqueued);
        assert!(finished >= started);
    }

    #[test]
    fn status_names_round_trip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Failed,
            JobStatus::Timeout,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }
}
