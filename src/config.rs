//! # Runtime configuration.
//!
//! [`Settings`] centralizes everything the worker pool needs: backend
//! names, worker counts, timeouts, grace periods, and on-disk paths.
//! Values come from `NUVOM_`-prefixed environment variables via
//! [`Settings::from_env`]; anything unset or unparsable falls back to its
//! default with a warning (configuration loading is a collaborator, not a
//! gatekeeper; fatal validation happens when backends are resolved).
//!
//! # Example
//! ```rust
//! use nuvom::Settings;
//!
//! let mut cfg = Settings::default();
//! cfg.max_workers = 2;
//! cfg.queue_backend = "memory".into();
//!
//! assert_eq!(cfg.max_workers, 2);
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::job::TimeoutPolicy;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl Environment {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Prod => "prod",
        }
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "prod" => Ok(Environment::Prod),
            _ => Err(()),
        }
    }
}

/// Global configuration for the runtime and worker pool.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Deployment environment.
    pub environment: Environment,
    /// Log level handed to the host's logger front-end.
    pub log_level: log::LevelFilter,

    /// Queue backend name (`memory`, `file`, `sqlite`, or plugin-provided).
    pub queue_backend: String,
    /// Result backend name (`memory`, `file`, `sqlite`, or plugin-provided).
    pub result_backend: String,
    /// Codec name (`bincode`).
    pub serialization_backend: String,

    /// Number of workers in the pool.
    pub max_workers: usize,
    /// Jobs pulled from the queue per dispatcher iteration.
    pub batch_size: usize,
    /// Capacity of the in-memory queue (0 = unbounded).
    pub queue_maxsize: usize,
    /// Default wall-clock limit for jobs that don't set their own.
    pub job_timeout_secs: u64,
    /// Default timeout policy for jobs that don't set their own.
    pub timeout_policy: TimeoutPolicy,
    /// Maximum time to wait for running jobs during graceful shutdown.
    pub shutdown_grace_secs: u64,
    /// Lease duration for dequeued-but-unacknowledged jobs.
    pub visibility_timeout_secs: u64,

    /// Task manifest location.
    pub manifest_path: PathBuf,
    /// File queue root directory.
    pub file_queue_dir: PathBuf,
    /// File result store root directory.
    pub file_results_dir: PathBuf,
    /// SQLite queue database file.
    pub sqlite_queue_path: PathBuf,
    /// SQLite result database file.
    pub sqlite_result_path: PathBuf,

    /// Port an optional monitoring plugin may serve metrics on.
    pub prometheus_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            log_level: log::LevelFilter::Info,
            queue_backend: "file".to_owned(),
            result_backend: "memory".to_owned(),
            serialization_backend: "bincode".to_owned(),
            max_workers: 4,
            batch_size: 1,
            queue_maxsize: 0,
            job_timeout_secs: 60,
            timeout_policy: TimeoutPolicy::Fail,
            shutdown_grace_secs: 30,
            visibility_timeout_secs: 30,
            manifest_path: PathBuf::from(".nuvom/manifest.json"),
            file_queue_dir: PathBuf::from(".nuvom/queue"),
            file_results_dir: PathBuf::from(".nuvom/results"),
            sqlite_queue_path: PathBuf::from(".nuvom/queue.db"),
            sqlite_result_path: PathBuf::from(".nuvom/results.db"),
            prometheus_port: 9150,
        }
    }
}

impl Settings {
    /// Loads settings from `NUVOM_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Settings::default();

        if let Some(v) = env_parse::<Environment>("NUVOM_ENVIRONMENT") {
            cfg.environment = v;
        }
        if let Some(v) = env_parse::<log::LevelFilter>("NUVOM_LOG_LEVEL") {
            cfg.log_level = v;
        }
        if let Some(v) = env_string("NUVOM_QUEUE_BACKEND") {
            cfg.queue_backend = v;
        }
        if let Some(v) = env_string("NUVOM_RESULT_BACKEND") {
            cfg.result_backend = v;
        }
        if let Some(v) = env_string("NUVOM_SERIALIZATION_BACKEND") {
            cfg.serialization_backend = v;
        }
        if let Some(v) = env_parse::<usize>("NUVOM_MAX_WORKERS") {
            cfg.max_workers = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("NUVOM_BATCH_SIZE") {
            cfg.batch_size = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("NUVOM_QUEUE_MAXSIZE") {
            cfg.queue_maxsize = v;
        }
        if let Some(v) = env_parse::<u64>("NUVOM_JOB_TIMEOUT_SECS") {
            cfg.job_timeout_secs = v;
        }
        if let Some(v) = env_string("NUVOM_TIMEOUT_POLICY") {
            match TimeoutPolicy::parse(&v) {
                Some(p) => cfg.timeout_policy = p,
                None => log::warn!("NUVOM_TIMEOUT_POLICY={v} is not a policy; keeping default"),
            }
        }
        if let Some(v) = env_parse::<u64>("NUVOM_SHUTDOWN_GRACE_SECS") {
            cfg.shutdown_grace_secs = v;
        }
        if let Some(v) = env_parse::<u64>("NUVOM_VISIBILITY_TIMEOUT_SECS") {
            cfg.visibility_timeout_secs = v.max(1);
        }
        if let Some(v) = env_string("NUVOM_MANIFEST_PATH") {
            cfg.manifest_path = PathBuf::from(v);
        }
        if let Some(v) = env_string("NUVOM_FILE_QUEUE_DIR") {
            cfg.file_queue_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("NUVOM_FILE_RESULTS_DIR") {
            cfg.file_results_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("NUVOM_SQLITE_QUEUE_PATH") {
            cfg.sqlite_queue_path = PathBuf::from(v);
        }
        if let Some(v) = env_string("NUVOM_SQLITE_RESULT_PATH") {
            cfg.sqlite_result_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<u16>("NUVOM_PROMETHEUS_PORT") {
            cfg.prometheus_port = v;
        }

        cfg
    }

    /// Default job timeout as a [`Duration`].
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Shutdown grace as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Visibility timeout as a [`Duration`].
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// One-line summary for startup logs.
    pub fn summary(&self) -> String {
        format!(
            "env={} queue={} results={} codec={} workers={} batch={} timeout={}s grace={}s",
            self.environment.as_str(),
            self.queue_backend,
            self.result_backend,
            self.serialization_backend,
            self.max_workers,
            self.batch_size,
            self.job_timeout_secs,
            self.shutdown_grace_secs,
        )
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("{key}={raw} could not be parsed; keeping default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Settings::default();
        assert_eq!(cfg.queue_backend, "file");
        assert_eq!(cfg.result_backend, "memory");
        assert_eq!(cfg.serialization_backend, "bincode");
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.job_timeout_secs, 60);
        assert_eq!(cfg.timeout_policy, TimeoutPolicy::Fail);
        assert_eq!(cfg.shutdown_grace_secs, 30);
    }

    #[test]
    fn env_overrides_and_bad_values_fall_back() {
        std::env::set_var("NUVOM_MAX_WORKERS", "7");
        std::env::set_var("NUVOM_BATCH_SIZE", "not-a-number");
        std::env::set_var("NUVOM_TIMEOUT_POLICY", "retry");
        let cfg = Settings::from_env();
        assert_eq!(cfg.max_workers, 7);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.timeout_policy, TimeoutPolicy::Retry);
        std::env::remove_var("NUVOM_MAX_WORKERS");
        std::env::remove_var("NUVOM_BATCH_SIZE");
        std::env::remove_var("NUVOM_TIMEOUT_POLICY");
    }
}
