//! # Logging subscriber.
//!
//! [`LogWriter`] forwards runtime events to the `log` facade in a compact
//! key=value format. Whatever logger front-end the host installs decides
//! where the lines end up.
//!
//! ## Output format
//! ```text
//! [starting] job=9b2f… task=send_email attempt=1
//! [failed] job=9b2f… task=send_email err="connection refused" attempt=1
//! [retry] job=9b2f… task=send_email delay=2s after_attempt=1
//! [timeout] job=9b2f… task=send_email
//! [succeeded] job=9b2f… task=send_email
//! ```

use async_trait::async_trait;

use super::event::{Event, EventKind};
use super::subscribe::Subscribe;

/// Subscriber that writes human-readable event lines via `log`.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::JobStarting => {
                log::debug!(
                    "[starting] job={:?} task={:?} attempt={:?}",
                    e.job,
                    e.task,
                    e.attempt
                );
            }
            EventKind::JobSucceeded => {
                log::info!("[succeeded] job={:?} task={:?}", e.job, e.task);
            }
            EventKind::JobFailed => {
                log::warn!(
                    "[failed] job={:?} task={:?} err={:?} attempt={:?}",
                    e.job,
                    e.task,
                    e.error,
                    e.attempt
                );
            }
            EventKind::JobTimedOut => {
                log::warn!("[timeout] job={:?} task={:?}", e.job, e.task);
            }
            EventKind::RetryScheduled => {
                log::info!(
                    "[retry] job={:?} task={:?} delay={:?} after_attempt={:?}",
                    e.job,
                    e.task,
                    e.delay,
                    e.attempt
                );
            }
            EventKind::ShutdownRequested => {
                log::info!("[shutdown-requested]");
            }
            EventKind::DrainedWithinGrace => {
                log::info!("[drained-within-grace]");
            }
            EventKind::GraceExceeded => {
                log::warn!("[grace-exceeded]");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                log::warn!("[subscriber] err={:?}", e.error);
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
