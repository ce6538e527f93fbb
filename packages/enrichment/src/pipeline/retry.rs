//! Retry policy for transient failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt limit and exponential backoff schedule.
///
/// The delay after the n-th attempt is `base * 2^(n-1)`, capped at
/// `max_delay`. A server-provided Retry-After raises the delay but
/// never lowers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after which a transiently failing item ends Failed.
    ///
    /// Default: 5.
    pub max_attempts: u32,

    /// Default: 2 seconds.
    pub base_delay_ms: u64,

    /// Default: 1 hour.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 3_600_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Set the attempt limit (at least 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether an item that has started `attempt_count` attempts may not retry.
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }

    /// Backoff after the given attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Backoff honouring a server-provided minimum wait.
    pub fn delay_with(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.delay(attempt);
        retry_after.map_or(backoff, |floor| backoff.max(floor))
    }
}
