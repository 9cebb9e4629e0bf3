//! Backoff configuration for the two transient error classes.

use std::time::Duration;

use rand::Rng;

use crate::ModelError;

/// Retry configuration for [`crate::ModelClient`].
///
/// Two independent policies coexist: connectivity failures back off
/// linearly (a slow, steady retry avoids thundering-herd amplification
/// on load-independent outages), rate-limit failures back off with full
/// jitter so concurrently throttled sessions desynchronize.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per error class before the last error is surfaced.
    pub max_attempts: u32,
    /// Wait before connectivity attempt k+1 is `k * cooldown`.
    pub connectivity_cooldown: Duration,
    /// Lower bound of the jittered rate-limit wait.
    pub rate_limit_min: Duration,
    /// Upper bound of the jittered rate-limit wait.
    pub rate_limit_max: Duration,
    /// Hardened variant: 5xx responses join the jittered retry path.
    pub retry_service_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            connectivity_cooldown: Duration::from_secs(2),
            rate_limit_min: Duration::from_secs(2),
            rate_limit_max: Duration::from_secs(20),
            retry_service_errors: false,
        }
    }
}

impl RetryPolicy {
    /// Wait before connectivity attempt `attempt + 1` (1-based attempts).
    #[must_use]
    pub fn connectivity_wait(&self, attempt: u32) -> Duration {
        self.connectivity_cooldown.saturating_mul(attempt)
    }

    /// Inclusive bounds of the jittered wait after rate-limited attempt
    /// `attempt` (1-based). The cap doubles per attempt from the lower
    /// bound and is clamped to `rate_limit_max`.
    #[must_use]
    pub fn rate_limit_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let exp = attempt.saturating_sub(1).min(32);
        let cap = self
            .rate_limit_min
            .saturating_mul(1u32 << exp.min(31))
            .min(self.rate_limit_max)
            .max(self.rate_limit_min);
        (self.rate_limit_min, cap)
    }

    /// Sample a full-jitter wait for the given rate-limited attempt.
    #[must_use]
    pub fn rate_limit_wait(&self, attempt: u32) -> Duration {
        let (min, max) = self.rate_limit_bounds(attempt);
        if min >= max {
            return max;
        }
        let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// Whether this error class takes the jittered retry path.
    #[must_use]
    pub fn retries_with_jitter(&self, error: &ModelError) -> bool {
        match error {
            ModelError::RateLimit(_) => true,
            ModelError::Service { .. } => self.retry_service_errors,
            _ => false,
        }
    }
}
