//! # Result backend contract and built-in implementations.
//!
//! A result backend owns the terminal record of every finished job: the
//! value on success, the error summary and traceback on failure, plus the
//! attempt history and timestamps a post-mortem needs.
//!
//! ## Rules
//! - Records are keyed by job id.
//! - Terminal records are immutable: the first write for an id wins and
//!   later writes are ignored.
//! - [`list_jobs`](ResultBackend::list_jobs) returns newest-first by
//!   `finished_at` (records without one sort last).

mod file;
mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::job::{Attempt, Job, JobStatus, JobValue};

pub use file::FileResultBackend;
pub use memory::MemoryResultBackend;
pub use sqlite::SqliteResultBackend;

/// Shared handle to a result backend.
pub type ResultRef = Arc<dyn ResultBackend>;

/// Terminal record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job id.
    pub id: String,
    /// Task name.
    pub func_name: String,
    /// Terminal status.
    pub status: JobStatus,
    /// Result value, for successful jobs.
    pub result: Option<JobValue>,
    /// Error summary, for failed/timed-out jobs.
    pub error: Option<String>,
    /// Full traceback text, when one was captured.
    pub traceback: Option<String>,
    /// Ordered attempt history.
    pub attempts: Vec<Attempt>,
    /// Remaining retry budget at the end.
    pub retries_left: u32,
    /// Submission time (epoch ms).
    pub created_at: i64,
    /// First attempt start (epoch ms).
    pub started_at: Option<i64>,
    /// Terminal transition time (epoch ms).
    pub finished_at: Option<i64>,
    /// Human tags.
    pub tags: Vec<String>,
    /// Human description.
    pub description: Option<String>,
}

impl JobRecord {
    /// Builds a success record from a job in its terminal state.
    pub fn success(job: &Job, result: JobValue) -> Self {
        Self::from_job(job, Some(result), None, None)
    }

    /// Builds an error record from a job in its terminal state.
    pub fn failure(job: &Job, summary: impl Into<String>, traceback: Option<String>) -> Self {
        Self::from_job(job, None, Some(summary.into()), traceback)
    }

    fn from_job(
        job: &Job,
        result: Option<JobValue>,
        error: Option<String>,
        traceback: Option<String>,
    ) -> Self {
        Self {
            id: job.id.clone(),
            func_name: job.func_name.clone(),
            status: job.status,
            result,
            error,
            traceback,
            attempts: job.attempts.clone(),
            retries_left: job.retries_left,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            tags: job.tags.clone(),
            description: job.description.clone(),
        }
    }
}

/// Filter for [`ResultBackend::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only records with this terminal status.
    pub status: Option<JobStatus>,
    /// At most this many records.
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to one status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Caps the number of records returned.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Sorts newest-first by `finished_at`, records without one last, then
/// truncates to the filter's limit.
pub(crate) fn order_and_limit(mut records: Vec<JobRecord>, filter: &JobFilter) -> Vec<JobRecord> {
    records.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
    if let Some(limit) = filter.limit {
        records.truncate(limit);
    }
    records
}

/// Swappable terminal-record store.
#[async_trait]
pub trait ResultBackend: Send + Sync + 'static {
    /// Persists a terminal success. Ignored if a record already exists.
    async fn set_result(&self, record: JobRecord) -> Result<(), BackendError>;

    /// Persists a terminal failure or timeout. Ignored if a record already
    /// exists.
    async fn set_error(&self, record: JobRecord) -> Result<(), BackendError>;

    /// Returns the result value of a successful job, or `None`.
    async fn get_result(&self, id: &str) -> Result<Option<JobValue>, BackendError>;

    /// Returns the error summary of a failed/timed-out job, or `None`.
    async fn get_error(&self, id: &str) -> Result<Option<String>, BackendError>;

    /// Returns the complete terminal record, or `None`.
    async fn get_full(&self, id: &str) -> Result<Option<JobRecord>, BackendError>;

    /// Returns matching records, newest-first by `finished_at`.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, BackendError>;

    /// Releases backend resources during graceful shutdown. No-op by
    /// default.
    async fn close(&self) {}
}
