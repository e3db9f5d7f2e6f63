use chrono::Duration;

use crate::config::EngineConfig;

const DELAY_CEILING_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Exponential retry policy applied after transient provider failures.
///
/// Failure 1 waits `base`, failure 2 waits `2 * base`, and so on up to `max`.
/// Initiation gives up after `max_initiate_attempts` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_seconds: u64,
    max_seconds: u64,
    max_initiate_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_seconds: u64, max_seconds: u64, max_initiate_attempts: u32) -> Self {
        Self {
            base_seconds,
            max_seconds: max_seconds.max(base_seconds),
            max_initiate_attempts: max_initiate_attempts.max(1),
        }
    }

    /// Retries on the very next pass.
    pub fn immediate(max_initiate_attempts: u32) -> Self {
        Self::new(0, 0, max_initiate_attempts)
    }

    pub fn max_initiate_attempts(&self) -> u32 {
        self.max_initiate_attempts
    }

    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 || self.base_seconds == 0 {
            return Duration::zero();
        }

        let exponent = (consecutive_failures - 1).min(32);
        let seconds = self
            .base_seconds
            .saturating_mul(1u64 << exponent)
            .min(self.max_seconds)
            .min(DELAY_CEILING_SECONDS);
        Duration::seconds(seconds as i64)
    }

    pub fn initiation_exhausted(&self, initiate_failures: u32) -> bool {
        initiate_failures >= self.max_initiate_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 300, 5)
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self::new(
            config.backoff_base_seconds,
            config.backoff_max_seconds,
            config.max_initiate_attempts,
        )
    }
}
