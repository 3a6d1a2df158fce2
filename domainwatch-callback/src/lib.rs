//! Callback API client: posts per-check and availability events with
//! bearer auth, retry, and duplicate suppression.

pub mod retry;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use domainwatch_common::{CheckResult, DomainWatchError, Verdict, VerdictStatus};
use retry::RetryPolicy;
use serde::Serialize;
use tracing::{debug, error, warn};

#[derive(Debug, Serialize)]
struct PerCheckEvent<'a> {
    domain: &'a str,
    check_type: &'static str,
    result: &'static str,
    timestamp: f64,
    details: &'a domainwatch_common::CheckDetails,
    duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
struct AvailabilityEvent {
    domain: String,
    status: &'static str,
    confidence: f64,
    timestamp: f64,
    checks: HashMap<&'static str, &'static str>,
}

fn unix_timestamp(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

fn check_type_str(kind: domainwatch_common::CheckerKind) -> &'static str {
    match kind {
        domainwatch_common::CheckerKind::Dns => "dns",
        domainwatch_common::CheckerKind::Http => "http",
        domainwatch_common::CheckerKind::Rdap => "rdap",
        domainwatch_common::CheckerKind::Whois => "whois",
    }
}

fn outcome_str(outcome: domainwatch_common::CheckOutcome) -> &'static str {
    match outcome {
        domainwatch_common::CheckOutcome::Registered => "registered",
        domainwatch_common::CheckOutcome::Unregistered => "available",
        domainwatch_common::CheckOutcome::Inconclusive => "inconclusive",
        domainwatch_common::CheckOutcome::Error => "error",
    }
}

fn status_str(status: VerdictStatus) -> &'static str {
    match status {
        VerdictStatus::ConfirmedAvailable => "confirmed_available",
        VerdictStatus::LikelyAvailable => "likely_available",
        VerdictStatus::LikelyTaken => "likely_taken",
        VerdictStatus::Unknown => "unknown",
    }
}

/// Outcome of a single attempted POST.
#[derive(Debug, PartialEq, Eq)]
pub enum PostOutcome {
    Sent,
    /// A non-429 4xx response; not retried.
    Dropped,
    /// Exhausted retries on a transient failure.
    Failed,
}

/// Posts per-check and availability events to `API_CALLBACK_URL`.
///
/// Tracks pending (permanently-failed) availability events per domain so
/// they can be re-queued onto that domain's next successful per-check
/// emission, per the spec's re-queue rule.
pub struct CallbackClient {
    client: reqwest::Client,
    url: String,
    auth_token: String,
    retry: RetryPolicy,
    pending_availability: Mutex<HashMap<String, AvailabilityEvent>>,
}

impl CallbackClient {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            auth_token: auth_token.into(),
            retry: RetryPolicy::default(),
            pending_availability: Mutex::new(HashMap::new()),
        }
    }

    /// Posts the `per_check` event for one completed check. If a
    /// previously-failed availability event is pending for this domain, it
    /// is flushed first regardless of the per-check outcome.
    pub async fn post_per_check(&self, domain: &str, result: &CheckResult) -> PostOutcome {
        let event = PerCheckEvent {
            domain,
            check_type: check_type_str(result.checker_kind),
            result: outcome_str(result.outcome),
            timestamp: unix_timestamp(result.started_at),
            details: &result.details,
            duration_ms: result.duration_ms,
        };
        let outcome = self.post(&event).await;

        if outcome == PostOutcome::Sent {
            let pending = self.pending_availability.lock().unwrap().remove(domain);
            if let Some(pending) = pending {
                debug!(domain, "callback: flushing re-queued availability event");
                let _ = self.post(&pending).await;
            }
        }
        outcome
    }

    /// Posts the `availability` event if `new_status` differs from
    /// `last_reported_status` and is one of the available variants.
    /// Returns `None` if suppressed as a duplicate or a non-available
    /// status, `Some(outcome)` otherwise.
    pub async fn post_availability(
        &self,
        domain: &str,
        verdict: &Verdict,
        last_reported_status: VerdictStatus,
    ) -> Option<PostOutcome> {
        if !verdict.status.is_available_variant() || verdict.status == last_reported_status {
            return None;
        }

        let mut checks = HashMap::new();
        for result in &verdict.contributing {
            checks.insert(check_type_str(result.checker_kind), outcome_str(result.outcome));
        }

        let event = AvailabilityEvent {
            domain: domain.to_string(),
            status: status_str(verdict.status),
            confidence: verdict.confidence,
            timestamp: unix_timestamp(SystemTime::now()),
            checks,
        };

        let outcome = self.post(&event).await;
        if outcome == PostOutcome::Failed {
            warn!(domain, "callback: availability event permanently failed, re-queueing");
            self.pending_availability.lock().unwrap().insert(domain.to_string(), event);
        }
        Some(outcome)
    }

    async fn post(&self, body: &impl Serialize) -> PostOutcome {
        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&self.auth_token)
                .json(body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return PostOutcome::Sent,
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if !self.retry.should_retry(attempt) {
                        return PostOutcome::Failed;
                    }
                }
                Ok(resp)
                    if resp.status() == reqwest::StatusCode::UNAUTHORIZED
                        || resp.status() == reqwest::StatusCode::FORBIDDEN =>
                {
                    let err = DomainWatchError::Auth;
                    error!(status = %resp.status(), error = %err, "callback: credentials rejected, dropping event");
                    domainwatch_metrics::metrics().incr("callback_auth_failed_total");
                    return PostOutcome::Dropped;
                }
                Ok(resp) if resp.status().is_client_error() => {
                    warn!(status = %resp.status(), "callback: client error, dropping event");
                    return PostOutcome::Dropped;
                }
                Ok(resp) => {
                    debug!(status = %resp.status(), "callback: server error, will retry");
                    if !self.retry.should_retry(attempt) {
                        return PostOutcome::Failed;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "callback: network error, will retry");
                    if !self.retry.should_retry(attempt) {
                        error!(error = %err, "callback: exhausted retries");
                        return PostOutcome::Failed;
                    }
                }
            }

            let delay = self.retry.delay_for(attempt);
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }

    #[must_use]
    pub fn has_pending(&self, domain: &str) -> bool {
        self.pending_availability.lock().unwrap().contains_key(domain)
    }
}
