//! Attempt-level retry policy

use crate::config::PipelineSettings;
use std::time::Duration;

/// How many times a failed run is retried and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
    pub max_delay: Option<Duration>,
    pub exponential: bool,
}

impl RetryPolicy {
    /// A policy that waits `delay` between each of `retries` retries
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            max_delay: None,
            exponential: false,
        }
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based)
    ///
    /// Exponential policies double the base delay for every retry after the
    /// first. Either way the result never exceeds `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = if self.exponential {
            let exponent = retry.saturating_sub(1).min(31);
            self.delay.saturating_mul(1u32 << exponent)
        } else {
            self.delay
        };

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl From<&PipelineSettings> for RetryPolicy {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            retries: settings.retries,
            delay: settings.retry_delay,
            max_delay: settings.max_retry_delay,
            exponential: settings.exponential_backoff,
        }
    }
}
