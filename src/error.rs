//! # Error types used by the nuvom runtime, backends, and job execution.
//!
//! Four enums cover the distinct failure domains:
//!
//! - [`RuntimeError`] fatal startup/orchestration failures (plugin load,
//!   unknown backend, corrupt manifest, duplicate registration).
//! - [`JobError`] outcomes of a single job execution attempt.
//! - [`BackendError`] I/O failures raised by queue and result backends.
//! - [`CodecError`] encode/decode failures of the job codec.
//!
//! All types provide `as_label` for logs/metrics. [`JobError`] additionally
//! exposes `is_retryable()`; [`BackendError`] exposes `is_transient()` which
//! drives the runner's bounded I/O retry.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the nuvom runtime itself.
///
/// Every variant is fatal during startup; a host CLI should exit non-zero
/// when one is returned from pool construction.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A plugin named in the descriptor could not be loaded or started.
    #[error("plugin '{spec}' failed to load: {reason}")]
    PluginLoad {
        /// The descriptor entry (e.g. `my_ext::SqlitePlugin`).
        spec: String,
        /// Human-readable cause.
        reason: String,
    },

    /// A configured backend name has no registered factory.
    #[error("no {kind} backend registered under name '{name}'")]
    UnknownBackend {
        /// Capability kind (`queue`, `result`, `codec`).
        kind: &'static str,
        /// The configured backend name.
        name: String,
    },

    /// The task manifest could not be parsed or has the wrong version.
    #[error("manifest {path:?} is corrupt: {reason}")]
    ManifestCorrupt {
        /// Manifest file location.
        path: PathBuf,
        /// Parse or version failure.
        reason: String,
    },

    /// Attempted to register a task name that already exists (strict mode).
    #[error("task '{name}' is already registered")]
    DuplicateTask {
        /// The conflicting task name.
        name: String,
    },

    /// Looked up a task name that is not in the registry.
    #[error("task '{name}' is not registered")]
    UnknownTask {
        /// The missing task name.
        name: String,
    },

    /// Shutdown grace period elapsed with jobs still running.
    #[error("shutdown grace {grace:?} exceeded; stuck jobs: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Ids of jobs that did not finish in time.
        stuck: Vec<String>,
    },

    /// A backend failed while the runtime was wiring itself up.
    #[error("backend failed during startup: {0}")]
    Backend(#[from] BackendError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::PluginLoad { .. } => "runtime_plugin_load",
            RuntimeError::UnknownBackend { .. } => "runtime_unknown_backend",
            RuntimeError::ManifestCorrupt { .. } => "runtime_manifest_corrupt",
            RuntimeError::DuplicateTask { .. } => "runtime_duplicate_task",
            RuntimeError::UnknownTask { .. } => "runtime_unknown_task",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Backend(_) => "runtime_backend",
        }
    }
}

/// Outcome of a single job execution attempt.
///
/// The runner never propagates these out of its frame; every variant is
/// mapped to a retry or a terminal job status.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum JobError {
    /// Execution exceeded its wall-clock limit; handed to the timeout policy.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// User task code failed. `kind` is the error class the task reported.
    #[error("{kind}: {message}")]
    Execution {
        kind: String,
        message: String,
        traceback: Option<String>,
    },

    /// The job names a task that is not in the registry. Terminal.
    #[error("task '{name}' is not registered")]
    UnknownTask { name: String },

    /// A queue/result backend failed while the runner was using it.
    #[error("backend unavailable: {0}")]
    Backend(#[from] BackendError),

    /// The job was withdrawn before it started.
    #[error("job canceled")]
    Canceled,
}

impl JobError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Timeout { .. } => "job_timeout",
            JobError::Execution { .. } => "job_execution",
            JobError::UnknownTask { .. } => "job_unknown_task",
            JobError::Backend(_) => "job_backend",
            JobError::Canceled => "job_canceled",
        }
    }

    /// Whether the retry budget applies to this error.
    ///
    /// Timeouts are retried through the timeout policy instead, and an
    /// unknown task can never succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Execution { .. })
    }
}

/// Errors raised by queue and result backends.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BackendError {
    /// Filesystem failure (file queue / file result store).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Database failure (sqlite queue / sqlite result store).
    #[error("db: {0}")]
    Db(#[from] sqlx::Error),

    /// A stored record could not be encoded or decoded.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// The backend is temporarily unable to serve the request.
    #[error("unavailable: {reason}")]
    Unavailable { reason: String },
}

impl BackendError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            BackendError::Io(_) => "backend_io",
            BackendError::Db(_) => "backend_db",
            BackendError::Codec(_) => "backend_codec",
            BackendError::Unavailable { .. } => "backend_unavailable",
        }
    }

    /// Whether retrying the operation after a short delay may succeed.
    ///
    /// Codec failures are deterministic and never transient; everything
    /// else (I/O contention, busy database, momentary unavailability) is
    /// worth the runner's bounded retry.
    pub fn is_transient(&self) -> bool {
        !matches!(self, BackendError::Codec(_))
    }
}

/// Errors raised by the job serialization codec.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodecError {
    /// The job contains a value the codec cannot represent.
    #[error("unencodable job: {reason}")]
    Unencodable { reason: String },

    /// The input is malformed, truncated, or has a mismatched version.
    #[error("corrupt record: {reason}")]
    Corrupt { reason: String },
}

impl CodecError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            CodecError::Unencodable { .. } => "codec_unencodable",
            CodecError::Corrupt { .. } => "codec_corrupt",
        }
    }
}
