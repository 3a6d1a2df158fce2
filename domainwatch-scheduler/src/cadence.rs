//! Next-check scheduling policy.
//!
//! `delay = min(base * 2^(failures - 1), cap) * (1 ± jitter)` — the exact
//! shape of `empath-delivery::queue::retry::calculate_next_retry_time`,
//! adapted from a retry-attempt counter to a consecutive-inconclusive-check
//! counter and given a fixed ±10% jitter per the cadence policy.

use std::time::Duration;

use domainwatch_common::VerdictStatus;
use rand::Rng;

const JITTER_FACTOR: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub t_low: Duration,
    pub t_high: Duration,
    pub t_confirmed: Duration,
    pub t_cap: Duration,
}

/// Outcome of applying the cadence policy after one completed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextCheck {
    pub next_check_at_secs: u64,
    pub consecutive_failures: u32,
}

impl Cadence {
    fn base_interval(&self, priority: bool) -> Duration {
        if priority { self.t_high } else { self.t_low }
    }

    /// Computes the next check time and updated failure counter for a
    /// domain that was just checked, given `now` as seconds since the
    /// epoch (caller-supplied so tests are deterministic).
    #[must_use]
    pub fn next_check(
        &self,
        priority: bool,
        status: VerdictStatus,
        consecutive_failures: u32,
        now_secs: u64,
    ) -> NextCheck {
        match status {
            VerdictStatus::ConfirmedAvailable => NextCheck {
                next_check_at_secs: now_secs + self.t_confirmed.as_secs(),
                consecutive_failures: 0,
            },
            VerdictStatus::LikelyTaken | VerdictStatus::LikelyAvailable => NextCheck {
                next_check_at_secs: now_secs + self.base_interval(priority).as_secs(),
                consecutive_failures: 0,
            },
            VerdictStatus::Unknown => {
                let failures = consecutive_failures.saturating_add(1);
                let delay = backoff_secs(self.base_interval(priority).as_secs(), failures, self.t_cap.as_secs());
                NextCheck {
                    next_check_at_secs: now_secs + delay,
                    consecutive_failures: failures,
                }
            }
        }
    }
}

fn backoff_secs(base_secs: u64, failures: u32, cap_secs: u64) -> u64 {
    let exponent = failures.saturating_sub(1).min(62);
    let multiplier = 1u64 << exponent;
    let delay = base_secs.saturating_mul(multiplier).min(cap_secs);
    jitter_secs(delay, JITTER_FACTOR)
}

fn jitter_secs(delay_secs: u64, factor: f64) -> u64 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        let range = delay_secs as f64 * factor;
        let mut rng = rand::rng();
        let noise: f64 = rng.random_range(-range..=range);
        ((delay_secs as f64) + noise).max(0.0) as u64
    }
}

/// Same jitter shape, used for new-domain insertion and `/refresh` (a small
/// random spread so a bulk insert or refresh doesn't dispatch every domain
/// in the same instant).
#[must_use]
pub fn small_jitter_secs(max_secs: u64) -> u64 {
    if max_secs == 0 {
        return 0;
    }
    rand::rng().random_range(0..=max_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence() -> Cadence {
        Cadence {
            t_low: Duration::from_secs(3600),
            t_high: Duration::from_secs(300),
            t_confirmed: Duration::from_secs(14400),
            t_cap: Duration::from_secs(86400),
        }
    }

    #[test]
    fn confirmed_available_uses_t_confirmed_and_resets_failures() {
        let next = cadence().next_check(false, VerdictStatus::ConfirmedAvailable, 3, 1_000);
        assert_eq!(next.next_check_at_secs, 1_000 + 14_400);
        assert_eq!(next.consecutive_failures, 0);
    }

    #[test]
    fn likely_taken_uses_priority_tier_interval() {
        let next = cadence().next_check(true, VerdictStatus::LikelyTaken, 2, 1_000);
        assert_eq!(next.next_check_at_secs, 1_000 + 300);
        assert_eq!(next.consecutive_failures, 0);

        let next = cadence().next_check(false, VerdictStatus::LikelyTaken, 2, 1_000);
        assert_eq!(next.next_check_at_secs, 1_000 + 3600);
    }

    #[test]
    fn unknown_backs_off_exponentially_and_caps() {
        let backoff = backoff_secs(300, 1, 86400);
        assert!((270..=330).contains(&backoff), "got {backoff}");
        let backoff = backoff_secs(300, 2, 86400);
        assert!((540..=660).contains(&backoff), "got {backoff}");
        // high attempt count saturates the pre-jitter delay at the cap
        let backoff = backoff_secs(300, 20, 86400);
        assert!((77_760..=95_040).contains(&backoff), "got {backoff}");
    }

    #[test]
    fn unknown_increments_failures() {
        let next = cadence().next_check(false, VerdictStatus::Unknown, 0, 1_000);
        assert_eq!(next.consecutive_failures, 1);
        let next = cadence().next_check(false, VerdictStatus::Unknown, 1, 1_000);
        assert_eq!(next.consecutive_failures, 2);
    }
}
