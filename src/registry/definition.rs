//! # Task definition: a registered callable plus its default execution
//! parameters.
//!
//! [`TaskDefinition`] is created once through [`TaskDefinitionBuilder`] and
//! never mutated afterwards; the registry hands out clones (cheap; the
//! handler and hooks are `Arc`s).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::job::{Job, JobValue};

use super::handler::{HandlerRef, TaskFailure};

/// Hook invoked before an attempt starts.
pub type BeforeHook = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;
/// Hook invoked after a successful attempt, with the result.
pub type AfterHook = Arc<dyn Fn(&JobValue) -> Result<(), String> + Send + Sync>;
/// Hook invoked when an attempt fails, with the failure.
pub type ErrorHook = Arc<dyn Fn(&TaskFailure) -> Result<(), String> + Send + Sync>;

/// Optional lifecycle hooks attached to a task.
///
/// Hook errors are logged by the runner and never abort the job.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Runs before each attempt.
    pub before_job: Option<BeforeHook>,
    /// Runs after a successful attempt.
    pub after_job: Option<AfterHook>,
    /// Runs when an attempt fails.
    pub on_error: Option<ErrorHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before_job", &self.before_job.is_some())
            .field("after_job", &self.after_job.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A registered callable plus its default execution parameters.
#[derive(Clone)]
pub struct TaskDefinition {
    name: String,
    handler: HandlerRef,
    retries: u32,
    retry_delay_secs: u64,
    timeout_secs: Option<f64>,
    store_result: bool,
    hooks: Hooks,
    tags: Vec<String>,
    description: Option<String>,
}

impl TaskDefinition {
    /// Starts building a definition for `name` backed by `handler`.
    pub fn builder(name: impl Into<String>, handler: HandlerRef) -> TaskDefinitionBuilder {
        TaskDefinitionBuilder {
            def: TaskDefinition {
                name: name.into(),
                handler,
                retries: 0,
                retry_delay_secs: 0,
                timeout_secs: None,
                store_result: true,
                hooks: Hooks::default(),
                tags: Vec::new(),
                description: None,
            },
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The callable.
    pub fn handler(&self) -> HandlerRef {
        Arc::clone(&self.handler)
    }

    /// Default retry budget for jobs of this task.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Default retry delay in seconds.
    pub fn retry_delay_secs(&self) -> u64 {
        self.retry_delay_secs
    }

    /// Default wall-clock limit in seconds, if any.
    pub fn timeout_secs(&self) -> Option<f64> {
        self.timeout_secs
    }

    /// Whether terminal outcomes are persisted by default.
    pub fn store_result(&self) -> bool {
        self.store_result
    }

    /// Lifecycle hooks.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Human tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Human description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Builds a pending [`Job`] for this task, inheriting the definition's
    /// execution parameters.
    pub fn make_job(&self, args: Vec<JobValue>, kwargs: BTreeMap<String, JobValue>) -> Job {
        let mut job = Job::new(&self.name, args, kwargs)
            .with_retries(self.retries)
            .with_retry_delay_secs(self.retry_delay_secs)
            .with_store_result(self.store_result)
            .with_tags(self.tags.clone());
        if let Some(secs) = self.timeout_secs {
            job = job.with_timeout_secs(secs);
        }
        if let Some(desc) = &self.description {
            job = job.with_description(desc.clone());
        }
        job
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("timeout_secs", &self.timeout_secs)
            .field("store_result", &self.store_result)
            .field("hooks", &self.hooks)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Fluent builder for [`TaskDefinition`].
pub struct TaskDefinitionBuilder {
    def: TaskDefinition,
}

impl TaskDefinitionBuilder {
    /// Sets the default retry budget.
    pub fn retries(mut self, retries: u32) -> Self {
        self.def.retries = retries;
        self
    }

    /// Sets the default retry delay in seconds.
    pub fn retry_delay_secs(mut self, secs: u64) -> Self {
        self.def.retry_delay_secs = secs;
        self
    }

    /// Sets the default wall-clock limit in seconds.
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.def.timeout_secs = Some(secs);
        self
    }

    /// Enables or suppresses result persistence.
    pub fn store_result(mut self, store: bool) -> Self {
        self.def.store_result = store;
        self
    }

    /// Installs a before-attempt hook.
    pub fn before_job(mut self, hook: BeforeHook) -> Self {
        self.def.hooks.before_job = Some(hook);
        self
    }

    /// Installs an after-success hook.
    pub fn after_job(mut self, hook: AfterHook) -> Self {
        self.def.hooks.after_job = Some(hook);
        self
    }

    /// Installs an on-error hook.
    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.def.hooks.on_error = Some(hook);
        self
    }

    /// Attaches tags.
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.def.tags = tags;
        self
    }

    /// Attaches a description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.def.description = Some(description.into());
        self
    }

    /// Finishes the build.
    pub fn build(self) -> TaskDefinition {
        self.def
    }
}
