//! Single-oracle availability probes: DNS, HTTP, RDAP and WHOIS.
//!
//! Each checker is a closed, independent implementation of [`Checker`] —
//! re-architected from a dynamic-dispatch base class into a tagged variant
//! with one trait, per the dispatch note in the design: the pipeline picks
//! a layer, not a runtime type.

pub mod bootstrap;
pub mod dns;
pub mod http;
pub mod rdap;
pub mod whois;

use std::time::Instant;

use async_trait::async_trait;
use domainwatch_common::{CheckResult, CheckerKind};

pub use dns::DnsChecker;
pub use http::HttpChecker;
pub use rdap::RdapChecker;
pub use whois::WhoisChecker;

/// A single-oracle probe for one domain.
///
/// Implementations never propagate errors to the caller: a failure to
/// resolve, connect, or parse becomes `CheckOutcome::Error` or
/// `CheckOutcome::Inconclusive` on the returned `CheckResult`, per the
/// per-checker rules each module documents. The pipeline reads outcomes,
/// not `Result`s.
#[async_trait]
pub trait Checker: Send + Sync {
    fn kind(&self) -> CheckerKind;

    /// Probe `domain`, never blocking past `deadline`.
    async fn check(&self, domain: &str, deadline: Instant) -> CheckResult;
}

pub(crate) fn remaining(deadline: Instant) -> std::time::Duration {
    deadline.saturating_duration_since(Instant::now())
}
