//! Reconnect backoff.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff with a cap and a bounded number of retries.
///
/// `delay(n)` for retry `n` (1-based) is `initial * multiplier^(n-1)`,
/// clamped to `max_delay`.  With the defaults this gives 2 s, 4 s, 5 s.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            multiplier: config.multiplier.max(1),
            max_delay: config.max_delay(),
            max_retries: config.max_retries,
        }
    }

    /// Delay before retry `attempt` (1-based).  Non-decreasing in `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.saturating_pow(exp);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// `true` while retry `attempt` (1-based) is still allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}
