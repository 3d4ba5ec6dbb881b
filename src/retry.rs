//! Backoff schedule for log delivery retries.
use std::time::Duration;

use rand::{thread_rng, Rng};

/// Decides whether a failed delivery attempt is retried and after what delay.
///
/// Delays grow exponentially from [`RetryPolicy::base_delay`] up to [`RetryPolicy::max_delay`],
/// with a randomized jitter applied to avoid retry storms when many clients fail at once.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    ///
    /// Defaults to [`RetryPolicy::DEFAULT_BASE_DELAY`].
    pub base_delay: Duration,
    /// Upper bound for the backoff delay.
    ///
    /// Defaults to [`RetryPolicy::DEFAULT_MAX_DELAY`].
    pub max_delay: Duration,
    /// Total number of delivery attempts before the entry is dropped.
    ///
    /// Defaults to [`RetryPolicy::DEFAULT_MAX_ATTEMPTS`].
    pub max_attempts: u32,
    /// Fraction of the delay randomized in both directions (0.0–1.0).
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Default value for [`RetryPolicy::base_delay`].
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
    /// Default value for [`RetryPolicy::max_delay`].
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
    /// Default value for [`RetryPolicy::max_attempts`].
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    /// Default value for [`RetryPolicy::jitter_factor`].
    pub const DEFAULT_JITTER_FACTOR: f64 = 0.25;

    /// Create a new `RetryPolicy` using default configuration.
    pub fn new() -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Decide on the next retry after `attempts` delivery attempts have failed.
    ///
    /// Returns the jittered delay to wait before the next attempt, or `None` when the retry
    /// budget is exhausted and the entry should be dropped.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        Some(self.apply_jitter(self.backoff_delay(attempts)))
    }

    /// The un-jittered backoff delay after `attempts` failed attempts: `min(base * 2^(attempts -
    /// 1), max)`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        // Cap the exponent so the shift cannot overflow; max_delay bounds the result anyway.
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let spread = delay.mul_f64(self.jitter_factor.clamp(0.0, 1.0));
        let low = delay.saturating_sub(spread);
        let high = delay + spread;
        thread_rng().gen_range(low..=high)
    }
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            base_delay: RetryPolicy::DEFAULT_BASE_DELAY,
            max_delay: RetryPolicy::DEFAULT_MAX_DELAY,
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            jitter_factor: RetryPolicy::DEFAULT_JITTER_FACTOR,
        }
    }
}
