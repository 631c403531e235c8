//! Renewal timing and retry backoff

use std::time::Duration;

/// When to renew a granted lease and how to back off after failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeasePolicy {
    /// Fraction of the granted lifetime after which renewal starts (0 < f < 1)
    pub renew_fraction: f64,
    /// Delay before the first retry
    pub retry_base: Duration,
    /// Upper bound for any retry delay
    pub retry_max: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            renew_fraction: 0.5,
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(60),
        }
    }
}

impl LeasePolicy {
    /// Delay from grant to renewal for a lease of `lifetime`
    ///
    /// Always strictly shorter than `lifetime` when `lifetime` is non-zero.
    pub fn renew_after(&self, lifetime: Duration) -> Duration {
        let delay = lifetime.mul_f64(self.renew_fraction.clamp(0.0, 1.0));
        if lifetime.is_zero() || delay < lifetime {
            delay
        } else {
            lifetime - Duration::from_nanos(1)
        }
    }

    /// Delay before retry number `attempt` (1-based)
    ///
    /// Doubles from `retry_base` and saturates at `retry_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.retry_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.retry_max)
            .min(self.retry_max)
    }
}
