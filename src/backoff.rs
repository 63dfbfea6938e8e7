//! Jittered exponential backoff shared by the retry loops.

use rand::Rng;
use std::time::Duration;

pub struct ExponentialBackoff {
    base_ms: u64,
    max_ms: u64,
    /// Fraction of the capped delay added as random jitter, in [0, 1].
    jitter: f64,
}

impl ExponentialBackoff {
    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter: 0.1,
        }
    }

    /// `0.0` disables jitter (deterministic delays for tests).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay for the given 0-based attempt: `base * 2^attempt`, capped, plus
    /// jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(20)));
        let capped = doubled.min(self.max_ms);
        let spread = (capped as f64 * self.jitter) as u64;
        let extra = if spread > 0 {
            rand::thread_rng().gen_range(0..=spread)
        } else {
            0
        };
        Duration::from_millis(capped + extra)
    }

    /// Sleep out the delay for this attempt.
    pub async fn wait(&self, attempt: u32) {
        tokio::time::sleep(self.delay(attempt)).await;
    }
}
