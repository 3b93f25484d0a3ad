//! # Backoff policy for retrying transient backend I/O.
//!
//! [`BackoffPolicy`] controls how retry delays grow after repeated
//! failures. It is parameterized by:
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The runner uses this to pace its bounded retries against a backend that
//! reports a transient failure.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use nuvom::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//! };
//!
//! // First attempt uses `first` (clamped to max).
//! assert_eq!(backoff.next(None), Duration::from_millis(100));
//!
//! // Later attempts multiply the previous delay by `factor`.
//! assert_eq!(backoff.next(Some(Duration::from_millis(100))), Duration::from_millis(200));
//!
//! // The result is always capped at `max`.
//! assert_eq!(backoff.next(Some(Duration::from_secs(20))), Duration::from_secs(10));
//! ```

use std::time::Duration;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// Returns a policy with `first = 50ms`, `factor = 2.0`, `max = 2s`,
    /// tuned for short in-process I/O retries, not user-visible waits.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(50),
            max: Duration::from_secs(2),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Computes the next delay based on the previous one.
    ///
    /// - If `prev` is `None`, returns `first` clamped to `max`.
    /// - Otherwise multiplies the previous delay by [`BackoffPolicy::factor`]
    ///   and caps it at [`BackoffPolicy::max`].
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        let unclamped = match prev {
            None => self.first,
            Some(d) => {
                let mul = d.as_secs_f64() * self.factor;
                if !mul.is_finite() {
                    self.max
                } else {
                    d.mul_f64(self.factor)
                }
            }
        };
        unclamped.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        let p = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_millis(350),
            factor: 2.0,
        };
        let d1 = p.next(None);
        let d2 = p.next(Some(d1));
        let d3 = p.next(Some(d2));
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(350));
    }

    #[test]
    fn constant_factor_keeps_delay() {
        let p = BackoffPolicy {
            first: Duration::from_millis(80),
            max: Duration::from_secs(1),
            factor: 1.0,
        };
        assert_eq!(p.next(Some(Duration::from_millis(80))), Duration::from_millis(80));
    }
}
