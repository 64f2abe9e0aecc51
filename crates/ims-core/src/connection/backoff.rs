use std::time::Duration;

use rand::Rng;

/// Lower bound of the jitter coefficient, in percent
const JITTER_MIN_PERCENT: u32 = 50;

/// Jittered exponential backoff between registration attempts.
///
/// The ceiling after `n` failures is `min(max, base * 2^n)`; the actual
/// wait is the ceiling scaled by a coefficient drawn from
/// `{0.50, 0.51, ..., 1.00}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationBackoff {
    base: Duration,
    max: Duration,
}

impl RegistrationBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Wait before jitter
    pub fn ceiling(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Wait for a given coefficient, clamped to `[0.5, 1.0]`
    pub fn delay_with(&self, failures: u32, coefficient: f64) -> Duration {
        self.ceiling(failures)
            .mul_f64(coefficient.clamp(JITTER_MIN_PERCENT as f64 / 100.0, 1.0))
    }

    pub fn next_delay(&self, failures: u32) -> Duration {
        self.delay_with(failures, jitter_coefficient(&mut rand::thread_rng()))
    }
}

/// A coefficient in whole percent between 50 % and 100 %
pub fn jitter_coefficient<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(JITTER_MIN_PERCENT..=100) as f64 / 100.0
}
