//! # Pull-based metrics hook.
//!
//! The worker pool implements [`MetricsProvider`] and installs itself as
//! the process-wide current provider; monitoring plugins poll
//! [`current_provider`] at their own cadence. There is no push channel;
//! the pull model keeps the monitoring side from ever owning the
//! dispatcher.

use std::sync::{Arc, RwLock};

/// Point-in-time view of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Approximate number of jobs visible in the queue backend.
    pub queue_size: usize,
    /// Jobs currently held by workers (assigned or running).
    pub inflight_jobs: usize,
    /// Number of workers in the pool.
    pub worker_count: usize,
}

/// Source of metrics snapshots.
pub trait MetricsProvider: Send + Sync + 'static {
    /// Returns the current snapshot. Must be cheap: called from arbitrary
    /// polling cadences.
    fn snapshot(&self) -> MetricsSnapshot;
}

static PROVIDER: RwLock<Option<Arc<dyn MetricsProvider>>> = RwLock::new(None);

/// Installs `provider` as the process-wide metrics source, replacing any
/// previous one.
pub fn install_provider(provider: Arc<dyn MetricsProvider>) {
    *PROVIDER.write().expect("metrics provider lock poisoned") = Some(provider);
}

/// Removes the current provider (pool shutdown).
pub fn clear_provider() {
    *PROVIDER.write().expect("metrics provider lock poisoned") = None;
}

/// Returns the currently installed provider, if any.
pub fn current_provider() -> Option<Arc<dyn MetricsProvider>> {
    PROVIDER
        .read()
        .expect("metrics provider lock poisoned")
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(MetricsSnapshot);

    impl MetricsProvider for Fixed {
        fn snapshot(&self) -> MetricsSnapshot {
            self.0
        }
    }

    #[test]
    fn install_and_poll() {
        let snap = MetricsSnapshot {
            queue_size: 3,
            inflight_jobs: 1,
            worker_count: 2,
        };
        install_provider(Arc::new(Fixed(snap)));
        let got = current_provider().unwrap().snapshot();
        assert_eq!(got, snap);
        clear_provider();
        assert!(current_provider().is_none());
    }
}
