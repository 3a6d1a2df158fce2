//! Layer 2 RDAP checker.
//!
//! Bootstraps the TLD's RDAP base from the IANA registry, then issues
//! `GET /domain/<name>`. 404 ⇒ unregistered, 200 ⇒ registered (with
//! registrar/dates/nameservers captured into `CheckDetails`), 429/5xx ⇒
//! inconclusive (the caller may retry on the next scheduling tick), and no
//! bootstrap entry for the TLD ⇒ inconclusive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domainwatch_common::{CheckDetails, CheckOutcome, CheckResult, CheckerKind};
use domainwatch_ratelimit::RateLimiter;
use serde_json::Value;
use tracing::debug;

use crate::bootstrap::{tld_of, RdapBootstrap};
use crate::{remaining, Checker};

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RdapChecker {
    client: reqwest::Client,
    bootstrap: RdapBootstrap,
    limiter: Arc<RateLimiter>,
}

impl RdapChecker {
    /// # Panics
    /// Panics if the underlying `reqwest::Client` cannot be built.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client with rustls backend should always build");
        Self {
            bootstrap: RdapBootstrap::new(client.clone()),
            client,
            limiter,
        }
    }

    async fn query(&self, domain: &str, budget: Duration) -> QueryOutcome {
        let Some(tld) = tld_of(domain) else {
            return QueryOutcome::NoBootstrap;
        };
        let Some(base) = self.bootstrap.base_for_tld(tld, BOOTSTRAP_TIMEOUT).await else {
            return QueryOutcome::NoBootstrap;
        };

        let url = format!("{base}/domain/{domain}");
        let response = tokio::time::timeout(budget, self.client.get(&url).send()).await;

        match response {
            Err(_) => QueryOutcome::Error,
            Ok(Err(_)) => QueryOutcome::Error,
            Ok(Ok(resp)) => {
                let status = resp.status();
                if status.as_u16() == 404 {
                    QueryOutcome::NotFound
                } else if status.is_success() {
                    match resp.json::<Value>().await {
                        Ok(body) => QueryOutcome::Found(Box::new(parse_details(&body))),
                        Err(_) => QueryOutcome::Error,
                    }
                } else if status.as_u16() == 429 || status.is_server_error() {
                    QueryOutcome::Retryable
                } else {
                    QueryOutcome::Error
                }
            }
        }
    }
}

enum QueryOutcome {
    Found(Box<CheckDetails>),
    NotFound,
    Retryable,
    NoBootstrap,
    Error,
}

fn parse_details(body: &Value) -> CheckDetails {
    let registrar = body["entities"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|e| {
            e["roles"]
                .as_array()
                .is_some_and(|roles| roles.iter().any(|r| r == "registrar"))
        })
        .and_then(registrar_name);

    let events = body["events"].as_array().cloned().unwrap_or_default();
    let created_at = event_date(&events, "registration");
    let expires_at = event_date(&events, "expiration");

    let nameservers = body["nameservers"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|ns| ns["ldhName"].as_str().map(str::to_string))
        .collect();

    let status_codes = body["status"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|s| s.as_str().map(str::to_string))
        .collect();

    CheckDetails {
        registrar,
        created_at,
        expires_at,
        nameservers,
        status_codes,
        http_status: Some(200),
    }
}

fn registrar_name(entity: &Value) -> Option<String> {
    entity["vcardArray"][1]
        .as_array()
        .into_iter()
        .flatten()
        .find(|field| field[0] == "fn")
        .and_then(|field| field[3].as_str())
        .map(str::to_string)
}

fn event_date(events: &[Value], action: &str) -> Option<String> {
    events
        .iter()
        .find(|e| e["eventAction"] == action)
        .and_then(|e| e["eventDate"].as_str())
        .map(str::to_string)
}

#[async_trait]
impl Checker for RdapChecker {
    fn kind(&self) -> CheckerKind {
        CheckerKind::Rdap
    }

    async fn check(&self, domain: &str, deadline: Instant) -> CheckResult {
        let started_at = std::time::SystemTime::now();

        if let Err(e) = self
            .limiter
            .acquire(CheckerKind::Rdap.rate_class(), 1, deadline)
            .await
        {
            debug!(domain, error = %e, "rdap checker: rate limit deadline exceeded");
            return CheckResult::new(CheckerKind::Rdap, CheckOutcome::Inconclusive, started_at);
        }

        let outcome = self.query(domain, remaining(deadline)).await;
        let (kind, details) = match outcome {
            QueryOutcome::Found(details) => (CheckOutcome::Registered, Some(*details)),
            QueryOutcome::NotFound => (CheckOutcome::Unregistered, None),
            QueryOutcome::Retryable | QueryOutcome::NoBootstrap => {
                (CheckOutcome::Inconclusive, None)
            }
            QueryOutcome::Error => (CheckOutcome::Error, None),
        };

        debug!(domain, ?kind, "rdap checker result");
        let result = CheckResult::new(CheckerKind::Rdap, kind, started_at);
        match details {
            Some(details) => result.with_details(details),
            None => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domainwatch_ratelimit::ClassLimit;
    use serde_json::json;

    #[test]
    fn rate_class_is_rdap() {
        assert_eq!(CheckerKind::Rdap.rate_class(), "rdap");
    }

    #[test]
    fn parses_registrar_and_dates_from_rdap_body() {
        let body = json!({
            "objectClassName": "domain",
            "entities": [{
                "roles": ["registrar"],
                "vcardArray": ["vcard", [["version", {}, "text", "4.0"], ["fn", {}, "text", "Example Registrar"]]]
            }],
            "events": [
                {"eventAction": "registration", "eventDate": "2001-01-01T00:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2030-01-01T00:00:00Z"}
            ],
            "nameservers": [{"ldhName": "ns1.example.com"}, {"ldhName": "ns2.example.com"}],
            "status": ["active"]
        });
        let details = parse_details(&body);
        assert_eq!(details.registrar.as_deref(), Some("Example Registrar"));
        assert_eq!(details.created_at.as_deref(), Some("2001-01-01T00:00:00Z"));
        assert_eq!(details.expires_at.as_deref(), Some("2030-01-01T00:00:00Z"));
        assert_eq!(details.nameservers.len(), 2);
        assert_eq!(details.status_codes, vec!["active".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_rate_limiter_yields_inconclusive_not_panic() {
        let limiter = Arc::new(RateLimiter::new(ClassLimit::new(1.0, 0.0)));
        limiter.try_acquire("rdap", 1).unwrap();
        let checker = RdapChecker::new(limiter);
        let deadline = Instant::now();
        let result = checker.check("example.invalid", deadline).await;
        assert_eq!(result.outcome, CheckOutcome::Inconclusive);
    }
}
