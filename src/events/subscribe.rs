//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for plugging custom event sinks into
//! the runtime (structured logging, audit trails, monitoring exporters).
//!
//! Each subscriber gets a dedicated worker task with a bounded queue and
//! panic isolation; see [`SubscriberSet`](super::SubscriberSet).
//!
//! ## Rules
//! - Slow subscribers only affect themselves (queue overflow drops events
//!   for that subscriber alone)
//! - Panics are caught and reported; the runtime keeps going
//! - Subscribers never block publishers

use async_trait::async_trait;

use super::event::Event;

/// Event subscriber for runtime observability.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Called from the subscriber's dedicated worker task, sequentially and
    /// in FIFO order. Handle errors internally; a panic is caught and
    /// reported as `SubscriberPanicked`.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name for logging and overflow reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity for this subscriber.
    ///
    /// When the queue is full new events are dropped for this subscriber
    /// only and a `SubscriberOverflow` event is published.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
