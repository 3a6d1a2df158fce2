//! Token-bucket rate limiting, one bucket per named service class.
//!
//! Grounded on `empath-delivery::rate_limiter`'s per-domain `TokenBucket` +
//! `DashMap` manager, generalised from "per-domain" keys to "per-service-class"
//! keys (`dns`, `http`, `rdap`, `whois`, `list_api`, `callback_api`) and
//! extended with an async, deadline-bounded `acquire` — the teacher's
//! `check_rate_limit` only reports a wait duration; callers that need to
//! actually wait build that on top themselves the same way `acquire` does
//! here.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("rate limit timeout waiting for class {class}")]
pub struct RateTimeout {
    pub class: String,
}

/// Capacity and refill rate for a single service class.
#[derive(Debug, Clone, Copy)]
pub struct ClassLimit {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl ClassLimit {
    #[must_use]
    pub const fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self { capacity, refill_per_sec }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: ClassLimit) -> Self {
        Self {
            tokens: limit.capacity,
            capacity: limit.capacity,
            refill_rate: limit.refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, n: f64) -> bool {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self, n: f64) -> Duration {
        self.refill();
        if self.tokens >= n {
            return Duration::ZERO;
        }
        let needed = n - self.tokens;
        Duration::from_secs_f64(needed / self.refill_rate)
    }
}

/// Shared rate limiter, one bucket per service class, created lazily on
/// first use with the class's configured limit (or a fallback default).
#[derive(Debug)]
pub struct RateLimiter {
    default_limit: ClassLimit,
    overrides: DashMap<String, ClassLimit>,
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(default_limit: ClassLimit) -> Self {
        Self {
            default_limit,
            overrides: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Configure a specific limit for a named class, overriding the default.
    pub fn set_class_limit(&self, class: impl Into<String>, limit: ClassLimit) {
        self.overrides.insert(class.into(), limit);
    }

    fn limit_for(&self, class: &str) -> ClassLimit {
        self.overrides
            .get(class)
            .map_or(self.default_limit, |l| *l)
    }

    /// Acquire `n` tokens from `class`'s bucket, waiting (FIFO per-bucket,
    /// since the bucket mutex serialises access) until tokens are available
    /// or `deadline` passes.
    ///
    /// # Errors
    /// Returns `RateTimeout` if `deadline` elapses before enough tokens
    /// become available.
    pub async fn acquire(&self, class: &str, n: u32, deadline: Instant) -> Result<(), RateTimeout> {
        let n = f64::from(n);
        loop {
            let wait = {
                let entry = self
                    .buckets
                    .entry(class.to_string())
                    .or_insert_with(|| Mutex::new(TokenBucket::new(self.limit_for(class))));
                let mut bucket = entry.lock();
                if bucket.try_consume(n) {
                    None
                } else {
                    Some(bucket.time_until_available(n))
                }
            };

            let Some(wait) = wait else { return Ok(()) };

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(class, "rate limit deadline exceeded");
                return Err(RateTimeout { class: class.to_string() });
            }
            let remaining = deadline.saturating_duration_since(now);
            let sleep_for = wait.min(remaining);
            tokio::time::sleep(sleep_for).await;

            if Instant::now() >= deadline && sleep_for == remaining {
                return Err(RateTimeout { class: class.to_string() });
            }
        }
    }

    /// Non-blocking check: consume a token now or report the wait needed.
    #[must_use]
    pub fn try_acquire(&self, class: &str, n: u32) -> Result<(), Duration> {
        let n = f64::from(n);
        let entry = self
            .buckets
            .entry(class.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.limit_for(class))));
        let mut bucket = entry.lock();
        if bucket.try_consume(n) {
            Ok(())
        } else {
            Err(bucket.time_until_available(n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_allows_burst_then_limits() {
        let limiter = RateLimiter::new(ClassLimit::new(3.0, 1.0));
        assert!(limiter.try_acquire("dns", 1).is_ok());
        assert!(limiter.try_acquire("dns", 1).is_ok());
        assert!(limiter.try_acquire("dns", 1).is_ok());
        assert!(limiter.try_acquire("dns", 1).is_err());
    }

    #[test]
    fn classes_are_independent() {
        let limiter = RateLimiter::new(ClassLimit::new(1.0, 1.0));
        assert!(limiter.try_acquire("dns", 1).is_ok());
        assert!(limiter.try_acquire("dns", 1).is_err());
        // a different class has its own bucket, unaffected by "dns" exhaustion
        assert!(limiter.try_acquire("whois", 1).is_ok());
    }

    #[test]
    fn per_class_override_takes_effect() {
        let limiter = RateLimiter::new(ClassLimit::new(1.0, 1.0));
        limiter.set_class_limit("rdap", ClassLimit::new(10.0, 10.0));
        for _ in 0..10 {
            assert!(limiter.try_acquire("rdap", 1).is_ok());
        }
        assert!(limiter.try_acquire("rdap", 1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill_then_succeeds() {
        let limiter = RateLimiter::new(ClassLimit::new(1.0, 10.0));
        limiter.try_acquire("dns", 1).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let result = limiter.acquire("dns", 1, deadline).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out_if_deadline_too_soon() {
        let limiter = RateLimiter::new(ClassLimit::new(1.0, 0.01));
        limiter.try_acquire("dns", 1).unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = limiter.acquire("dns", 1, deadline).await;
        assert_eq!(result, Err(RateTimeout { class: "dns".to_string() }));
    }
}
