//! Retry delay computation.

use std::time::Duration;

use rand::Rng;

use swarm_core::defaults::{
    BACKOFF_BASE_MS, BACKOFF_CAP_MS, BACKOFF_JITTER_MAX, BACKOFF_JITTER_MIN, BACKOFF_MIN_MS,
    RETRY_AFTER_MAX_SECS,
};

/// Capped exponential backoff with multiplicative jitter.
///
/// An upstream `retry_after` hint wins when present and positive, clamped to
/// [`RETRY_AFTER_MAX_SECS`]. Otherwise
/// the delay is `min(cap, base * 2^(attempts - 1)) * U[0.5, 1.0]`. The result
/// is never shorter than one millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(BACKOFF_BASE_MS),
            cap: Duration::from_millis(BACKOFF_CAP_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Un-jittered delay after the given number of attempts (1-based).
    pub fn exponential(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before the next attempt.
    pub fn delay(&self, attempts: u32, retry_after: Option<Duration>) -> Duration {
        let jitter = rand::thread_rng().gen_range(BACKOFF_JITTER_MIN..=BACKOFF_JITTER_MAX);
        self.delay_with_jitter(attempts, retry_after, jitter)
    }

    /// [`delay`](Self::delay) with a fixed jitter factor.
    pub fn delay_with_jitter(
        &self,
        attempts: u32,
        retry_after: Option<Duration>,
        jitter: f64,
    ) -> Duration {
        let floor = Duration::from_millis(BACKOFF_MIN_MS);
        if let Some(hint) = retry_after.filter(|d| !d.is_zero()) {
            return hint.clamp(floor, Duration::from_secs(RETRY_AFTER_MAX_SECS));
        }
        let jitter = jitter.clamp(BACKOFF_JITTER_MIN, BACKOFF_JITTER_MAX);
        self.exponential(attempts).mul_f64(jitter).max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn test_exponential_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.exponential(1), Duration::from_secs(1));
        assert_eq!(p.exponential(2), Duration::from_secs(2));
        assert_eq!(p.exponential(3), Duration::from_secs(4));
        assert_eq!(p.exponential(7), Duration::from_secs(60));
        assert_eq!(p.exponential(1_000), Duration::from_secs(60));
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        assert_eq!(policy().exponential(0), Duration::from_secs(1));
    }

    #[test]
    fn test_hint_wins_over_exponential() {
        let p = policy();
        let hint = Some(Duration::from_secs(30));
        assert_eq!(p.delay(1, hint), Duration::from_secs(30));
        assert_eq!(p.delay(10, hint), Duration::from_secs(30));
    }

    #[test]
    fn test_huge_hint_is_clamped() {
        let hint = Duration::try_from_secs_f64(1e15).ok();
        assert_eq!(
            policy().delay(1, hint),
            Duration::from_secs(RETRY_AFTER_MAX_SECS)
        );
    }

    #[test]
    fn test_zero_hint_is_ignored() {
        let p = policy();
        let delay = p.delay_with_jitter(2, Some(Duration::ZERO), 1.0);
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(3, None, 0.5), Duration::from_secs(2));
        assert_eq!(p.delay_with_jitter(3, None, 1.0), Duration::from_secs(4));
        // Out-of-range factors are clamped.
        assert_eq!(p.delay_with_jitter(3, None, 0.0), Duration::from_secs(2));
    }

    #[test]
    fn test_random_delay_stays_in_range() {
        let p = policy();
        for attempts in 1..=10 {
            let upper = p.exponential(attempts);
            for _ in 0..50 {
                let delay = p.delay(attempts, None);
                assert!(delay <= upper, "{:?} > {:?}", delay, upper);
                assert!(delay >= upper.mul_f64(0.5), "{:?} below half of {:?}", delay, upper);
            }
        }
    }

    #[test]
    fn test_never_zero() {
        let p = BackoffPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(p.delay(1, None), Duration::from_millis(1));
    }
}
