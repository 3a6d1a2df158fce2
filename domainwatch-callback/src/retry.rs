//! Retry policy for callback POSTs.
//!
//! Adapted from `empath-delivery::policy::retry::RetryPolicy`
//! (`should_retry`/`calculate_next_retry`/`is_final_attempt`), narrowed from
//! SMTP delivery's 25-attempt/24h-cap defaults to the 5-attempt/5-minute-cap
//! defaults this spec calls for.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    #[must_use]
    pub const fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }

    /// Delay before attempt `attempt` (0-indexed), with jitter applied after capping.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter = capped.as_secs_f64() * self.jitter_factor;
        let offset = rand::rng().random_range(-jitter..=jitter);
        Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_five_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert!(policy.is_final_attempt(4));
        assert!(!policy.is_final_attempt(3));
    }

    #[test]
    fn delay_grows_and_stays_capped() {
        let policy = RetryPolicy::default();
        let d0 = policy.delay_for(0).as_secs_f64();
        let d4 = policy.delay_for(10).as_secs_f64();
        assert!(d0 < 4.0);
        assert!(d4 <= 300.0 * 1.2 + 0.1);
    }
}
