use rand::Rng;
use std::time::Duration;

use crate::config::{ClassifierConfig, ExecutionConfig};

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed per unit of work, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized in both directions
    pub jitter: f64,
    /// Cap on total time spent waiting between attempts
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
            budget: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn for_execution(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
            budget: Duration::from_secs(config.retry_budget_secs),
        }
    }

    pub fn for_classifier(config: &ClassifierConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            jitter: 0.25,
            budget: Duration::from_secs(config.retry_budget_secs),
        }
    }

    /// Un-jittered delay after `attempt` failed attempts: `base * 2^(attempt-1)`, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as u64;
        let delay = base_ms.saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(delay).min(self.max_delay)
    }

    /// `delay_for` with +/- `jitter` randomization, never above `max_delay`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = {
            let mut rng = rand::thread_rng();
            rng.gen_range((1.0 - jitter)..=(1.0 + jitter))
        };
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Whether another attempt fits after `attempts_made`, given time already
    /// spent waiting and the next delay
    pub fn allows_retry(&self, attempts_made: u32, waited: Duration, next_delay: Duration) -> bool {
        attempts_made < self.max_attempts && waited + next_delay <= self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: 0.25,
            budget: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_exponential_and_capped() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let p = policy();
        for _ in 0..100 {
            let d = p.jittered_delay(2);
            assert!(d >= Duration::from_millis(150) && d <= Duration::from_millis(250), "{d:?}");
        }
    }

    #[test]
    fn test_retry_bounded_by_attempts_and_budget() {
        let p = policy();
        assert!(p.allows_retry(1, Duration::ZERO, Duration::from_millis(100)));
        assert!(!p.allows_retry(4, Duration::ZERO, Duration::from_millis(100)));
        assert!(!p.allows_retry(2, Duration::from_millis(950), Duration::from_millis(100)));
    }
}
