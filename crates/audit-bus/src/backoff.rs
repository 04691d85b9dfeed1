//! # Retry backoff
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`.
//! The default keeps doubling with no practical cap.
//! The base is derived purely from the attempt number.

use std::time::Duration;

/// Exponential retry backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Delay after the first failed attempt.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for Backoff {
    /// 2s doubling each attempt, uncapped.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(2),
            max: Duration::MAX,
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// A backoff that always waits `delay`.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
        }
    }

    /// Delay to wait after the failed attempt `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if secs > max_secs {
            return self.max;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max)
    }
}
