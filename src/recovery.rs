use crate::component::ComponentSpec;
use std::time::Duration;

/// Retry strategy for a single component attempt loop
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, never less than one
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        Self {
            max_retries: spec.max_retries,
            base_delay: spec.retry_backoff_base,
            max_delay: spec.retry_backoff_max,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after a failed attempt: `min(base * 2^attempt, max)`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt + 1 < self.attempts()
    }
}
