//! Layer 1 DNS checker.
//!
//! `NS` records present ⇒ registered. `NXDOMAIN`/no-records on both `NS`
//! and `A`/`AAAA` ⇒ unregistered. Timeout ⇒ inconclusive. Anything else ⇒
//! error. Grounded on `empath-delivery::dns`'s `TokioAsyncResolver`
//! construction and `ResolveErrorKind::NoRecordsFound` matching, narrowed
//! from MX lookups down to plain `NS`/`A`/`AAAA` existence checks.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use domainwatch_common::{CheckOutcome, CheckResult, CheckerKind};
use domainwatch_ratelimit::RateLimiter;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::ResolveErrorKind;
use hickory_resolver::TokioResolver;
use tracing::debug;

use crate::{remaining, Checker};

pub struct DnsChecker {
    resolver: TokioResolver,
    limiter: Arc<RateLimiter>,
}

/// Whether a name exists at all, distinguishing a confirmed absence from a
/// failed lookup and, within failures, a transient one (SERVFAIL, timeout)
/// from anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Existence {
    Found,
    NotFound,
    /// SERVFAIL or timeout: the resolver couldn't get an answer right now.
    Transient,
    /// Any other resolve failure (connection refused, malformed response, ...).
    Failed,
}

impl DnsChecker {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self::with_resolver_config(ResolverConfig::default(), ResolverOpts::default(), limiter)
    }

    #[must_use]
    pub fn with_resolver_config(
        config: ResolverConfig,
        opts: ResolverOpts,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            resolver: TokioResolver::builder_with_config(config, Default::default())
                .with_options(opts)
                .build(),
            limiter,
        }
    }

    async fn has_ns(&self, domain: &str) -> Existence {
        match self.resolver.ns_lookup(domain).await {
            Ok(lookup) if lookup.iter().next().is_some() => Existence::Found,
            Ok(_) => Existence::NotFound,
            Err(err) if no_records(&err) => Existence::NotFound,
            Err(err) if transient(&err) => Existence::Transient,
            Err(_) => Existence::Failed,
        }
    }

    async fn has_address(&self, domain: &str) -> Existence {
        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) if lookup.iter().next().is_some() => Existence::Found,
            Ok(_) => Existence::NotFound,
            Err(err) if no_records(&err) => Existence::NotFound,
            Err(err) if transient(&err) => Existence::Transient,
            Err(_) => Existence::Failed,
        }
    }
}

fn no_records(err: &hickory_resolver::ResolveError) -> bool {
    err.is_no_records_found()
}

/// SERVFAIL and timeouts both surface from hickory as a protocol-level
/// response error, not a distinct variant.
fn transient(err: &hickory_resolver::ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::Proto(_))
}

#[async_trait]
impl Checker for DnsChecker {
    fn kind(&self) -> CheckerKind {
        CheckerKind::Dns
    }

    async fn check(&self, domain: &str, deadline: Instant) -> CheckResult {
        let started_at = std::time::SystemTime::now();

        if let Err(e) = self
            .limiter
            .acquire(CheckerKind::Dns.rate_class(), 1, deadline)
            .await
        {
            debug!(domain, error = %e, "dns checker: rate limit deadline exceeded");
            return CheckResult::new(CheckerKind::Dns, CheckOutcome::Inconclusive, started_at);
        }

        let budget = remaining(deadline);
        let lookup = tokio::time::timeout(budget, async {
            (self.has_ns(domain).await, self.has_address(domain).await)
        })
        .await;

        let outcome = match lookup {
            Err(_) => CheckOutcome::Inconclusive,
            Ok((ns, addr)) => classify(ns, addr),
        };

        debug!(domain, ?outcome, "dns checker result");
        CheckResult::new(CheckerKind::Dns, outcome, started_at)
    }
}

fn classify(ns: Existence, addr: Existence) -> CheckOutcome {
    if ns == Existence::Found || addr == Existence::Found {
        CheckOutcome::Registered
    } else if ns == Existence::NotFound && addr == Existence::NotFound {
        CheckOutcome::Unregistered
    } else if ns == Existence::Failed || addr == Existence::Failed {
        CheckOutcome::Error
    } else {
        CheckOutcome::Inconclusive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domainwatch_ratelimit::ClassLimit;

    #[test]
    fn rate_class_is_dns() {
        assert_eq!(CheckerKind::Dns.rate_class(), "dns");
    }

    #[test]
    fn found_on_either_lookup_is_registered() {
        assert_eq!(classify(Existence::Found, Existence::NotFound), CheckOutcome::Registered);
        assert_eq!(classify(Existence::NotFound, Existence::Found), CheckOutcome::Registered);
    }

    #[test]
    fn not_found_on_both_is_unregistered() {
        assert_eq!(classify(Existence::NotFound, Existence::NotFound), CheckOutcome::Unregistered);
    }

    #[test]
    fn a_non_transient_resolve_failure_is_error_not_inconclusive() {
        assert_eq!(classify(Existence::Failed, Existence::NotFound), CheckOutcome::Error);
        assert_eq!(classify(Existence::NotFound, Existence::Failed), CheckOutcome::Error);
    }

    #[test]
    fn transient_failure_is_inconclusive() {
        assert_eq!(classify(Existence::Transient, Existence::NotFound), CheckOutcome::Inconclusive);
        assert_eq!(classify(Existence::Transient, Existence::Transient), CheckOutcome::Inconclusive);
    }

    #[tokio::test]
    async fn exhausted_rate_limiter_yields_inconclusive_not_panic() {
        let limiter = Arc::new(RateLimiter::new(ClassLimit::new(1.0, 0.0)));
        limiter.try_acquire("dns", 1).unwrap();
        let checker = DnsChecker::new(limiter);
        let deadline = Instant::now();
        let result = checker.check("example.invalid", deadline).await;
        assert_eq!(result.outcome, CheckOutcome::Inconclusive);
    }
}
