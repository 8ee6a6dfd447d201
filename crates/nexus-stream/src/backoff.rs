//! Reconnect backoff.

use std::time::Duration;

use rand::Rng;

use crate::config::StreamConfig;

/// Exponential reconnect delay with a cap and subtractive jitter.
///
/// The delay for attempt `n` falls in `[base_delay(n - 1), base_delay(n)]`,
/// so consecutive delays never decrease. Once the previous step already sits
/// at the cap, every delay is the cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// 0.0 (none) to 0.5
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: if jitter.is_finite() { jitter.clamp(0.0, 0.5) } else { 0.0 },
        }
    }

    /// Delay before retry `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max)
    }

    /// Delay before retry `attempt`, with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let shave = rand::rng().random_range(0.0..=self.jitter);
        let floor = if attempt > 1 {
            self.base_delay(attempt - 1)
        } else {
            Duration::ZERO
        };
        delay.mul_f64(1.0 - shave).max(floor)
    }
}

impl From<&StreamConfig> for BackoffPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_max, config.backoff_jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}
