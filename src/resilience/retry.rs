use crate::config::{BackoffConfig, RetryConfig};
use crate::error::RailError;
use std::time::Duration;

/// Bounded retry with exponential backoff. Only transient failures are
/// retried; business declines and configuration faults fail fast.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next attempt, or `None` if `err` after `attempt`
    /// should not be retried.
    pub fn next_delay(&self, err: &RailError, attempt: u32) -> Option<Duration> {
        (err.is_transient() && attempt < self.max_attempts)
            .then(|| self.backoff.delay_for_attempt(attempt))
    }
}
