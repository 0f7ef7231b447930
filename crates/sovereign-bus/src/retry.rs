//! # Retry Policy
//!
//! Exponential backoff as a plain value. The schedule is a pure function of
//! `(attempt, policy)`; the delivery pipeline only executes it.
//!
//! ```text
//! attempt 1 ──fail──→ sleep(base) ──→ attempt 2 ──fail──→ sleep(base * m) ──→ attempt 3 ...
//! ```

use std::time::Duration;

/// Backoff schedule for handler retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made when the subscription retries on failure.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Growth factor applied per further attempt.
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Doubling backoff starting at `base_delay`.
    #[must_use]
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier: 2,
        }
    }

    /// Number of attempts a delivery gets.
    #[must_use]
    pub fn attempts_for(&self, retry_on_failure: bool) -> u32 {
        if retry_on_failure {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based) before the next one.
    ///
    /// `base_delay * multiplier^(attempt - 1)`, saturating on overflow.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor)
    }

    /// Full schedule of delays between attempts.
    #[must_use]
    pub fn schedule(&self, retry_on_failure: bool) -> Vec<Duration> {
        let attempts = self.attempts_for(retry_on_failure);
        (1..attempts).map(|attempt| self.delay_after(attempt)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1))
    }
}
