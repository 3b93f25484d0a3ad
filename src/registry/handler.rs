//! # Task handler abstraction.
//!
//! [`TaskHandler`] is the async, object-safe unit of work a task definition
//! points at. [`TaskFn`] wraps a closure `F: Fn(args, kwargs) -> Fut`,
//! producing a fresh future per call so there is no shared mutable state
//! between attempts.
//!
//! ## Example
//! ```rust
//! use nuvom::{TaskFn, TaskFailure, JobValue};
//!
//! let add = TaskFn::arc(|args, _kwargs| async move {
//!     let x = args.first().and_then(|v| v.as_int()).ok_or_else(|| {
//!         TaskFailure::new("TypeError", "expected int x")
//!     })?;
//!     let y = args.get(1).and_then(|v| v.as_int()).ok_or_else(|| {
//!         TaskFailure::new("TypeError", "expected int y")
//!     })?;
//!     Ok(JobValue::Int(x + y))
//! });
//! # let _ = add;
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::job::JobValue;

/// Shared handle to a task handler.
pub type HandlerRef = Arc<dyn TaskHandler>;

/// Failure reported by user task code.
///
/// `kind` is the error class (what the attempt record and persisted error
/// summary lead with); `traceback`, when present, is stored verbatim.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Error class, e.g. `RuntimeError`, `TypeError`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Optional full traceback text.
    pub traceback: Option<String>,
}

impl TaskFailure {
    /// Creates a failure with a kind and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            traceback: None,
        }
    }

    /// Attaches a traceback.
    pub fn with_traceback(mut self, tb: impl Into<String>) -> Self {
        self.traceback = Some(tb.into());
        self
    }

    /// One-line summary: `kind: message`.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Asynchronous unit of work executed by the job runner.
///
/// ## Rules
/// - `call(&self)` is `Fn`-like: safe to invoke from multiple attempts,
///   each call returns an independent future.
/// - Once started, a handler is treated as non-cancellable; the runner
///   abandons it on timeout and discards its result.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Runs the task with the job's arguments.
    async fn call(
        &self,
        args: Vec<JobValue>,
        kwargs: BTreeMap<String, JobValue>,
    ) -> Result<JobValue, TaskFailure>;
}

/// Function-backed task handler.
///
/// Wraps a closure that *creates* a new future per call.
pub struct TaskFn<F> {
    f: F,
}

impl<F, Fut> TaskFn<F>
where
    F: Fn(Vec<JobValue>, BTreeMap<String, JobValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobValue, TaskFailure>> + Send + 'static,
{
    /// Creates a new function-backed handler.
    ///
    /// Prefer [`TaskFn::arc`] when you immediately need a [`HandlerRef`].
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(f: F) -> HandlerRef {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for TaskFn<F>
where
    F: Fn(Vec<JobValue>, BTreeMap<String, JobValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobValue, TaskFailure>> + Send + 'static,
{
    async fn call(
        &self,
        args: Vec<JobValue>,
        kwargs: BTreeMap<String, JobValue>,
    ) -> Result<JobValue, TaskFailure> {
        (self.f)(args, kwargs).await
    }
}
