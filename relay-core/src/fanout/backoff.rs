use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with symmetric jitter, used between change
/// feed reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the anchor delay added or removed at random.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay for a 1-based attempt: `base * 2^(attempt - 1)`,
    /// capped at `max`.
    pub fn anchor_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = 1u64 << exponent;
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay to sleep before `attempt`, jittered and clamped to `[0, max]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let unit = rand::rng().random::<f64>();
        self.jittered(attempt, unit)
    }

    fn jittered(&self, attempt: u32, unit: f64) -> Duration {
        let anchor_ms = self.anchor_delay(attempt).as_millis() as f64;
        if anchor_ms == 0.0 {
            return Duration::ZERO;
        }

        let max_ms = self.max.as_millis() as f64;
        let span = anchor_ms * self.jitter_ratio.clamp(0.0, 1.0);
        let lower = (anchor_ms - span).max(0.0);
        let upper = (anchor_ms + span).min(max_ms);
        if upper <= lower {
            return Duration::from_millis(lower.round() as u64);
        }

        let jittered = lower + (upper - lower) * unit.clamp(0.0, 1.0);
        Duration::from_millis(jittered.round() as u64)
    }
}
