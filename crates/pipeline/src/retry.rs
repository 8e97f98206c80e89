//! Shared back-off schedule.
//!
//! One [`BackoffPolicy`] drives every retry loop in the workspace: transient
//! transport retries in the executor, provider retries in the LLM adapter, and
//! the cap on credential-pool waits. The policy is pure; callers supply the
//! jitter sample (usually [`jitter_sample`]) so schedules are reproducible in
//! tests.

use std::time::Duration;

use uuid::Uuid;

/// Exponential back-off with a ceiling and proportional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts allowed, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound for any single delay, including hinted waits.
    pub max_delay: Duration,
    /// Fraction in `[0.0, 1.0]` of each delay that may be shaved off at random.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Returns `true` if another attempt is allowed after `failures` failed ones.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-based). `sample` is a uniform value in `[0.0, 1.0)`.
    ///
    /// Doubles from `base_delay`, capped at `max_delay`, then reduced by up to
    /// `jitter * delay`.
    pub fn delay_for(&self, failures: u32, sample: f64) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let raw = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        let capped = raw.min(self.max_delay);

        let jitter = self.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0);
        capped.mul_f64(1.0 - jitter)
    }

    /// Clamps an externally hinted wait (rate-limit reset, `Retry-After`) to
    /// the policy ceiling so a run cannot hang indefinitely.
    pub fn cap(&self, hinted: Duration) -> Duration {
        hinted.min(self.max_delay)
    }
}

/// Uniform sample in `[0, 1)` from the random bits of a v4 UUID.
pub fn jitter_sample() -> f64 {
    const BITS: u32 = 52;
    let bits = Uuid::new_v4().as_u128() & ((1u128 << BITS) - 1);
    bits as f64 / (1u64 << BITS) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.5,
        }
    }

    #[test]
    fn delays_double_until_capped() {
        let p = policy();
        assert_eq!(p.delay_for(1, 0.0), Duration::from_secs(1));
        assert_eq!(p.delay_for(2, 0.0), Duration::from_secs(2));
        assert_eq!(p.delay_for(3, 0.0), Duration::from_secs(4));
        assert_eq!(p.delay_for(5, 0.0), Duration::from_secs(10));
        assert_eq!(p.delay_for(40, 0.0), Duration::from_secs(10));
    }

    #[test]
    fn jitter_only_shortens() {
        let p = policy();
        assert_eq!(p.delay_for(2, 1.0), Duration::from_secs(1));
        assert!(p.delay_for(2, 0.3) <= Duration::from_secs(2));
    }

    #[test]
    fn attempts_are_bounded() {
        let p = policy();
        assert!(p.allows_retry(1));
        assert!(p.allows_retry(2));
        assert!(!p.allows_retry(3));
    }

    #[test]
    fn jitter_sample_is_in_unit_interval() {
        for _ in 0..100 {
            let s = jitter_sample();
            assert!((0.0..1.0).contains(&s));
        }
    }

    #[test]
    fn hinted_waits_are_capped() {
        let p = policy();
        assert_eq!(p.cap(Duration::from_secs(3600)), Duration::from_secs(10));
        assert_eq!(p.cap(Duration::from_secs(3)), Duration::from_secs(3));
    }
}
