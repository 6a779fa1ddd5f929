//! Backoff schedule for transient per-target failures

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a target gets at most `max_retries + 1` passes
    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Exponential base applied per retry
    pub base: f64,

    pub jitter: bool,

    /// Jitter spread as a fraction of the delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            base: 2.0,
            jitter: false,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn allows_retry(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = self.base.powi(retry.saturating_sub(1) as i32);
        let secs = self.initial_delay.as_secs_f64() * multiplier;
        let delay = if secs.is_finite() {
            Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
        } else {
            self.max_delay
        };
        self.apply_jitter(delay.min(self.max_delay))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let range = delay.as_secs_f64() * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = rand::rng().random_range(-range / 2.0..=range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(5).with_initial_delay(Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::new(50)
        };
        assert_eq!(policy.delay_for(40), Duration::from_secs(1));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter: true,
            jitter_factor: 0.5,
            ..RetryPolicy::new(3).with_initial_delay(Duration::from_secs(1))
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(750), "{delay:?}");
            assert!(delay <= Duration::from_millis(1250), "{delay:?}");
        }
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::new(2);
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
        assert!(!RetryPolicy::new(0).allows_retry(0));
    }

    #[test]
    fn test_deserializes_humantime() {
        let policy: RetryPolicy =
            toml::from_str("max_retries = 4\ninitial_delay = \"250ms\"").unwrap();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
