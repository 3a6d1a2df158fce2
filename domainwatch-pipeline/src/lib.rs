//! Layered oracle-fusion pipeline.
//!
//! Orchestrates the DNS/HTTP/RDAP/WHOIS checkers into a single `Verdict`,
//! short-circuiting when cheap layers already agree and escalating to
//! expensive layers only when confirmation is needed. Staged the way
//! `empath-delivery::policy::pipeline::DeliveryPipeline` stages DNS
//! resolution, rate limiting and delivery tracking — one orchestrator
//! holding its collaborators, one method per stage, re-entered with
//! progressively more evidence.

use std::sync::Arc;
use std::time::Instant;

use domainwatch_checkers::Checker;
use domainwatch_common::{CheckOutcome, CheckResult, CheckerKind, Domain, Verdict, VerdictStatus};
use tracing::debug;

pub struct Pipeline {
    dns: Arc<dyn Checker>,
    http: Arc<dyn Checker>,
    rdap: Arc<dyn Checker>,
    whois: Arc<dyn Checker>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        dns: Arc<dyn Checker>,
        http: Arc<dyn Checker>,
        rdap: Arc<dyn Checker>,
        whois: Arc<dyn Checker>,
    ) -> Self {
        Self { dns, http, rdap, whois }
    }

    /// Runs the pipeline for `domain`, never blocking past `deadline`.
    ///
    /// `domain.priority` forces a full Layer 1→2→3 run regardless of what
    /// the cheap layers find, per the scheduler's priority-deep-check rule.
    pub async fn run(&self, domain: &Domain, deadline: Instant) -> Verdict {
        let mut contributing = Vec::with_capacity(4);

        let (dns_result, http_result) = tokio::join!(
            self.dns.check(&domain.name, deadline),
            self.http.check(&domain.name, deadline),
        );
        let dns_outcome = dns_result.outcome;
        contributing.push(dns_result);
        contributing.push(http_result.clone());

        let layer1_registered =
            dns_outcome == CheckOutcome::Registered || http_result.outcome == CheckOutcome::Registered;
        let layer1_unregistered = dns_outcome == CheckOutcome::Unregistered;
        let previously_available = domain.last_verdict.is_available_variant();

        if layer1_registered && !previously_available && !domain.priority {
            debug!(domain = %domain.name, "pipeline: layer 1 registered, short-circuiting");
            return Verdict::new(VerdictStatus::LikelyTaken, 0.7, contributing);
        }

        let confirm_flip = layer1_registered && previously_available;
        let should_run_layer2 = layer1_unregistered || confirm_flip || domain.priority;
        if !should_run_layer2 {
            return Verdict::new(VerdictStatus::Unknown, 0.0, contributing);
        }

        let rdap_result = self.rdap.check(&domain.name, deadline).await;
        let rdap_outcome = rdap_result.outcome;
        contributing.push(rdap_result);

        if rdap_outcome == CheckOutcome::Registered {
            debug!(domain = %domain.name, "pipeline: layer 2 confirms registered");
            return Verdict::new(VerdictStatus::LikelyTaken, 0.9, contributing);
        }

        let layers_agree_unregistered = layer1_unregistered && rdap_outcome == CheckOutcome::Unregistered;
        let run_layer3 =
            rdap_outcome == CheckOutcome::Inconclusive || layers_agree_unregistered || domain.priority;

        if !run_layer3 {
            return if rdap_outcome == CheckOutcome::Unregistered {
                Verdict::new(VerdictStatus::LikelyAvailable, 0.85, contributing)
            } else {
                Verdict::new(VerdictStatus::Unknown, 0.0, contributing)
            };
        }

        let whois_result = self.whois.check(&domain.name, deadline).await;
        let whois_outcome = whois_result.outcome;
        contributing.push(whois_result);

        match whois_outcome {
            CheckOutcome::Registered => {
                debug!(domain = %domain.name, "pipeline: layer 3 confirms registered");
                Verdict::new(VerdictStatus::LikelyTaken, 0.95, contributing)
            }
            CheckOutcome::Unregistered => {
                let corroborators = corroborating_unregistered(&contributing);
                if corroborators > 0 {
                    let confidence = (0.85 + 0.05 * f64::from(corroborators)).min(0.99);
                    debug!(domain = %domain.name, corroborators, "pipeline: confirmed available");
                    Verdict::new(VerdictStatus::ConfirmedAvailable, confidence, contributing)
                } else {
                    Verdict::new(VerdictStatus::LikelyAvailable, 0.85, contributing)
                }
            }
            _ if rdap_outcome == CheckOutcome::Unregistered => {
                Verdict::new(VerdictStatus::LikelyAvailable, 0.85, contributing)
            }
            _ => Verdict::new(VerdictStatus::Unknown, 0.0, contributing),
        }
    }
}

/// Counts non-WHOIS contributing results that independently found the
/// domain unregistered — the corroboration `ConfirmedAvailable`'s
/// confidence bonus is based on.
fn corroborating_unregistered(contributing: &[CheckResult]) -> u32 {
    u32::try_from(
        contributing
            .iter()
            .filter(|r| r.checker_kind != CheckerKind::Whois && r.outcome == CheckOutcome::Unregistered)
            .count(),
    )
    .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domainwatch_common::CheckDetails;
    use std::time::SystemTime;

    struct Fixed {
        kind: CheckerKind,
        outcome: CheckOutcome,
    }

    #[async_trait]
    impl Checker for Fixed {
        fn kind(&self) -> CheckerKind {
            self.kind
        }

        async fn check(&self, _domain: &str, _deadline: Instant) -> CheckResult {
            CheckResult::new(self.kind, self.outcome, SystemTime::now()).with_details(CheckDetails::default())
        }
    }

    fn pipeline(dns: CheckOutcome, http: CheckOutcome, rdap: CheckOutcome, whois: CheckOutcome) -> Pipeline {
        Pipeline::new(
            Arc::new(Fixed { kind: CheckerKind::Dns, outcome: dns }),
            Arc::new(Fixed { kind: CheckerKind::Http, outcome: http }),
            Arc::new(Fixed { kind: CheckerKind::Rdap, outcome: rdap }),
            Arc::new(Fixed { kind: CheckerKind::Whois, outcome: whois }),
        )
    }

    fn fresh_domain() -> Domain {
        Domain::new("example.invalid", false, SystemTime::now())
    }

    #[tokio::test]
    async fn s1_nxdomain_available_confirms() {
        let p = pipeline(
            CheckOutcome::Unregistered,
            CheckOutcome::Inconclusive,
            CheckOutcome::Unregistered,
            CheckOutcome::Unregistered,
        );
        let verdict = p.run(&fresh_domain(), Instant::now() + std::time::Duration::from_secs(5)).await;
        assert_eq!(verdict.status, VerdictStatus::ConfirmedAvailable);
        assert!(verdict.confidence >= 0.90);
        assert!(verdict.has_whois_unregistered());
    }

    #[tokio::test]
    async fn s2_registered_site_short_circuits_no_whois_call() {
        let p = pipeline(
            CheckOutcome::Registered,
            CheckOutcome::Registered,
            CheckOutcome::Error,
            CheckOutcome::Error,
        );
        let verdict = p.run(&fresh_domain(), Instant::now() + std::time::Duration::from_secs(5)).await;
        assert_eq!(verdict.status, VerdictStatus::LikelyTaken);
        assert!((verdict.confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(verdict.contributing.len(), 2);
    }

    #[tokio::test]
    async fn s3_flip_detection_confirms_taken() {
        let mut domain = fresh_domain();
        domain.last_verdict = VerdictStatus::LikelyAvailable;
        let p = pipeline(
            CheckOutcome::Registered,
            CheckOutcome::Inconclusive,
            CheckOutcome::Registered,
            CheckOutcome::Error,
        );
        let verdict = p.run(&domain, Instant::now() + std::time::Duration::from_secs(5)).await;
        assert_eq!(verdict.status, VerdictStatus::LikelyTaken);
        assert!((verdict.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn s4_all_inconclusive_is_unknown() {
        let mut domain = fresh_domain();
        domain.priority = true;
        let p = pipeline(
            CheckOutcome::Inconclusive,
            CheckOutcome::Inconclusive,
            CheckOutcome::Inconclusive,
            CheckOutcome::Inconclusive,
        );
        let verdict = p.run(&domain, Instant::now() + std::time::Duration::from_secs(5)).await;
        assert_eq!(verdict.status, VerdictStatus::Unknown);
        assert!((verdict.confidence - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn whois_unregistered_without_corroboration_stays_likely_available() {
        let p = pipeline(
            CheckOutcome::Inconclusive,
            CheckOutcome::Inconclusive,
            CheckOutcome::Inconclusive,
            CheckOutcome::Unregistered,
        );
        let mut domain = fresh_domain();
        domain.priority = true;
        let verdict = p.run(&domain, Instant::now() + std::time::Duration::from_secs(5)).await;
        assert_eq!(verdict.status, VerdictStatus::LikelyAvailable);
    }
}
