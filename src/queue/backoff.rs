use std::time::Duration;

use rand::Rng;

pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_CAP: Duration = Duration::from_secs(300);

/// Exponential retry delay with ±25% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            cap: DEFAULT_CAP,
        }
    }
}

impl Backoff {
    /// Fraction of the nominal delay the jitter may add or remove.
    pub const JITTER: f64 = 0.25;

    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// `min(base * 2^attempt, cap)` before jitter.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.cap.as_millis()).unwrap_or(u64::MAX);
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
    }

    /// Delay before the next attempt once `attempt` attempts have been made.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(-Self::JITTER..=Self::JITTER);
        self.delay_with_jitter(attempt, jitter)
    }

    /// `delay` with an explicit jitter factor, clamped to ±`JITTER`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(-Self::JITTER, Self::JITTER);
        let nominal = self.nominal(attempt).as_millis() as f64;
        let ms = (nominal * (1.0 + jitter)).floor().max(0.0);
        Duration::from_millis(ms as u64)
    }
}
