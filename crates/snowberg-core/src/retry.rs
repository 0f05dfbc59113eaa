//! Bounded exponential backoff

use snowberg_config::ExtractionConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// A single attempt
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    /// Doubles each time, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ExtractionConfig::default())
    }
}

impl From<&ExtractionConfig> for RetryPolicy {
    fn from(config: &ExtractionConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_delay(),
            config.max_delay(),
        )
    }
}
