// Retry backoff policy
//
// Computes the near-term fire time after a failed dispatch attempt. The
// scheduler core owns the retry limit; the policy only shapes the delay.

use rand::Rng;
use std::time::Duration;

/// RetryPolicy computes the delay before retry attempt `retry_count`
/// (1-based: the first retry after the first failure passes 1).
pub trait RetryPolicy: Send + Sync {
    fn delay(&self, retry_count: u32) -> Duration;
}

/// Exponential backoff with jitter
/// Sequence: 5s, 15s, 45s, ... (base * 3^n, capped at max_delay)
/// Jitter: random fraction added to spread simultaneous retries
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 1_800_000, // 30 minutes
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    fn base_delay_for(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1).min(20);
        let delay = self
            .base_delay_ms
            .saturating_mul(3_u64.saturating_pow(exponent));
        delay.min(self.max_delay_ms)
    }

    fn add_jitter_ms(&self, base_delay_ms: u64) -> u64 {
        if self.jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let mut rng = rand::thread_rng();
        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rng.gen_range(0..=jitter_range_ms)
        } else {
            0
        };

        base_delay_ms + jitter_ms
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, retry_count: u32) -> Duration {
        let base = self.base_delay_for(retry_count);
        Duration::from_millis(self.add_jitter_ms(base))
    }
}

/// Fixed delay policy, used by tests and small deployments
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryPolicy for FixedDelay {
    fn delay(&self, _retry_count: u32) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence_without_jitter() {
        let policy = ExponentialBackoff::with_config(5_000, 1_800_000, 0.0);

        assert_eq!(policy.delay(1), Duration::from_millis(5_000));
        assert_eq!(policy.delay(2), Duration::from_millis(15_000));
        assert_eq!(policy.delay(3), Duration::from_millis(45_000));
        assert_eq!(policy.delay(4), Duration::from_millis(135_000));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = ExponentialBackoff::with_config(5_000, 60_000, 0.0);
        assert_eq!(policy.delay(10), Duration::from_millis(60_000));
        // Large counts must not overflow
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = ExponentialBackoff::with_config(1_000, 60_000, 0.1);

        for _ in 0..50 {
            let delay = policy.delay(1).as_millis() as u64;
            assert!((1_000..=1_100).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_jitter_adds_variation() {
        let policy = ExponentialBackoff::with_config(10_000, 60_000, 0.5);

        let first = policy.delay(1);
        let varied = (0..20).any(|_| policy.delay(1) != first);
        assert!(varied, "expected jitter to vary delays");
    }

    #[test]
    fn test_jitter_factor_clamping() {
        let policy = ExponentialBackoff::with_config(5_000, 60_000, 7.0);
        assert_eq!(policy.jitter_factor, 1.0);

        let policy = ExponentialBackoff::with_config(5_000, 60_000, -1.0);
        assert_eq!(policy.jitter_factor, 0.0);
    }

    #[test]
    fn test_fixed_delay() {
        let policy = FixedDelay::new(Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(9), Duration::from_millis(250));
    }
}
