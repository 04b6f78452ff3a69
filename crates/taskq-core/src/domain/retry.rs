//! Retry policy: decides requeue delays.

use std::time::Duration;

use crate::config::RetryConfig;

/// Backoff used when a task asks to be requeued without choosing its own delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// A task requeued more often than this is marked Failed.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Calculate the delay before retry number `attempt` (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(attempt - 1), max_delay)
    ///
    /// Example with base_delay=30s, multiplier=2.0:
    /// - attempt 1: 30s
    /// - attempt 2: 60s
    /// - attempt 3: 120s
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }

    /// Would requeueing after `retries` previous requeues exceed the limit?
    pub fn exhausted(&self, retries: u32) -> bool {
        retries.saturating_add(1) > self.max_retries
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(cfg.base_delay_secs),
            multiplier: cfg.multiplier,
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            max_retries: cfg.max_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
