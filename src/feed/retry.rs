use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule for transient fetch failures.
///
/// The wait before retry `n` (0-based) is `base * 2^n + jitter`, where
/// jitter is drawn uniformly from `[0, base)`, and the total is capped at
/// `cap`. Because the jitter is always smaller than the gap between two
/// consecutive exponential steps, successive waits strictly increase until
/// they reach the cap and stay there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per fetch, including the first one
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` given a jitter fraction in `[0, 1)`.
    ///
    /// Deterministic so the schedule's shape can be tested without a RNG.
    pub fn delay_for(&self, retry: u32, jitter: f64) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        let exponential = self.base.saturating_mul(factor);
        // Jitter must stay strictly below `base` for the schedule to be monotonic
        let base_nanos = u64::try_from(self.base.as_nanos()).unwrap_or(u64::MAX);
        let jitter_nanos = ((base_nanos as f64) * jitter.clamp(0.0, 1.0)) as u64;
        let jitter = Duration::from_nanos(jitter_nanos.min(base_nanos.saturating_sub(1)));
        exponential.saturating_add(jitter).min(self.cap)
    }

    /// Wait before retry number `retry` with random jitter.
    pub fn next_delay(&self, retry: u32) -> Duration {
        let jitter: f64 = rand::rng().random();
        self.delay_for(retry, jitter)
    }
}
