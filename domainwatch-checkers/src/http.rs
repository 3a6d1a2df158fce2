//! Layer 1 HTTP checker.
//!
//! A `HEAD /` that gets any valid HTTP response (2xx through 5xx) proves the
//! name resolves and something is listening ⇒ registered. HTTP can never
//! prove a domain unregistered, so this checker's outcome is one of
//! registered/inconclusive/error only — per the open question on redirects,
//! this client never follows them, since a parking-page redirect would
//! otherwise look identical to a real site.
//!
//! Grounded on the `reqwest` client idiom (builder with an explicit
//! `redirect::Policy` and per-request timeout) used across the pack's other
//! domain-tooling repos; the teacher carries no HTTP client of its own.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use domainwatch_common::{CheckOutcome, CheckDetails, CheckResult, CheckerKind};
use domainwatch_ratelimit::RateLimiter;
use tracing::debug;

use crate::{remaining, Checker};

pub struct HttpChecker {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl HttpChecker {
    /// # Panics
    /// Panics if the underlying `reqwest::Client` cannot be built, which
    /// only happens on a malformed TLS backend configuration.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("reqwest client with rustls backend should always build");
        Self { client, limiter }
    }

    async fn probe(&self, url: &str, budget: std::time::Duration) -> Option<u16> {
        match tokio::time::timeout(budget, self.client.head(url).send()).await {
            Ok(Ok(resp)) => Some(resp.status().as_u16()),
            _ => None,
        }
    }
}

#[async_trait]
impl Checker for HttpChecker {
    fn kind(&self) -> CheckerKind {
        CheckerKind::Http
    }

    async fn check(&self, domain: &str, deadline: Instant) -> CheckResult {
        let started_at = std::time::SystemTime::now();

        if let Err(e) = self
            .limiter
            .acquire(CheckerKind::Http.rate_class(), 1, deadline)
            .await
        {
            debug!(domain, error = %e, "http checker: rate limit deadline exceeded");
            return CheckResult::new(CheckerKind::Http, CheckOutcome::Inconclusive, started_at);
        }

        let budget = remaining(deadline);
        let https_status = self.probe(&format!("https://{domain}/"), budget).await;
        let status = match https_status {
            Some(s) => Some(s),
            None => self.probe(&format!("http://{domain}/"), remaining(deadline)).await,
        };

        let outcome = if status.is_some() {
            CheckOutcome::Registered
        } else {
            CheckOutcome::Inconclusive
        };

        debug!(domain, ?outcome, ?status, "http checker result");
        let mut result = CheckResult::new(CheckerKind::Http, outcome, started_at);
        if let Some(http_status) = status {
            result = result.with_details(CheckDetails {
                http_status: Some(http_status),
                ..Default::default()
            });
        }
        result
    }
}
