//! Retry delay calculation shared by the pull API and the push channel.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const RETRY_BASE_DELAY_MS: u64 = 100;
pub const RETRY_MAX_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Spread each delay by up to a quarter of its length.
    #[serde(default)]
    pub jitter: bool,
}

fn default_base_delay_ms() -> u64 {
    RETRY_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RETRY_MAX_DELAY_MS
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: RETRY_BASE_DELAY_MS,
            max_delay_ms: RETRY_MAX_DELAY_MS,
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = exponential_backoff(attempt, self.base_delay_ms, self.max_delay_ms);
        if !self.jitter {
            return base;
        }
        let spread = (base.as_millis() as u64) / 4;
        if spread == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=spread);
        base + Duration::from_millis(extra)
    }
}

/// `base_ms * 2^attempt`, capped at `max_ms`.
pub fn exponential_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2_u64.pow(attempt.min(16)));
    Duration::from_millis(delay_ms.min(max_ms))
}
