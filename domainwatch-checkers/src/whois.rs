//! Layer 3 WHOIS checker.
//!
//! Connects to the TLD's WHOIS server on TCP/43, sends the domain name, and
//! parses the free-form response with the per-field regex idiom the pack's
//! other WHOIS parsers use (`^field:\s*value$`, multiline). A `Domain Name:`
//! field or a recognised registrar-style line ⇒ registered; a known
//! "no match" marker ⇒ unregistered; anything else is inconclusive or
//! error.
//!
//! The TCP connection itself is modeled on `empath-smtp`'s plain/TLS
//! connection wrapper — WHOIS needs no TLS, so this keeps only the
//! plain-socket read/write-loop half of that shape.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use domainwatch_common::{CheckDetails, CheckOutcome, CheckResult, CheckerKind};
use domainwatch_ratelimit::RateLimiter;
use regex::Regex;
use std::sync::OnceLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::bootstrap::{parse_iana_referral, tld_of, WhoisBootstrap, IANA_WHOIS_SERVER};
use crate::{remaining, Checker};

const MAX_RESPONSE_BYTES: usize = 64 * 1024;
const WHOIS_PORT: u16 = 43;

static NOT_FOUND_MARKERS: &[&str] = &[
    "no match for",
    "not found",
    "no data found",
    "no entries found",
    "is available for registration",
    "status: free",
    "no object found",
];

fn field_re(name: &str) -> Regex {
    Regex::new(&format!(r"(?im)^{name}:\s*(.+)\s*$")).unwrap_or_else(|e| {
        unreachable!("static WHOIS field pattern for {name} must compile: {e}")
    })
}

struct WhoisFields {
    domain_name: Regex,
    registrar: Regex,
    created: Regex,
    registered_on: Regex,
    expiry: Regex,
    expiry_alt: Regex,
    nameserver: Regex,
}

fn fields() -> &'static WhoisFields {
    static FIELDS: OnceLock<WhoisFields> = OnceLock::new();
    FIELDS.get_or_init(|| WhoisFields {
        domain_name: field_re("domain name"),
        registrar: field_re("registrar"),
        created: field_re("creation date"),
        registered_on: field_re("registered on"),
        expiry: field_re("registry expiry date"),
        expiry_alt: field_re("expiry date"),
        nameserver: field_re("name server"),
    })
}

async fn raw_query(server: &str, query: &str, deadline: Instant) -> std::io::Result<String> {
    let budget = remaining(deadline);
    let connect = tokio::time::timeout(budget, TcpStream::connect((server, WHOIS_PORT))).await;
    let mut stream = connect.map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::TimedOut, "whois connect timed out")
    })??;

    let budget = remaining(deadline);
    tokio::time::timeout(budget, stream.write_all(format!("{query}\r\n").as_bytes()))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "whois write timed out"))??;

    let mut buf = Vec::new();
    let budget = remaining(deadline);
    let _ = tokio::time::timeout(
        budget,
        stream.take(MAX_RESPONSE_BYTES as u64).read_to_end(&mut buf),
    )
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "whois read timed out"))??;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn is_not_found(response: &str) -> bool {
    let lower = response.to_ascii_lowercase();
    NOT_FOUND_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn capture1(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn parse_response(response: &str) -> (CheckOutcome, CheckDetails) {
    if is_not_found(response) {
        return (CheckOutcome::Unregistered, CheckDetails::default());
    }

    let f = fields();
    let has_domain = f.domain_name.is_match(response);
    let registrar = capture1(&f.registrar, response);

    if !has_domain && registrar.is_none() {
        return (CheckOutcome::Inconclusive, CheckDetails::default());
    }

    let created_at = capture1(&f.created, response).or_else(|| capture1(&f.registered_on, response));
    let expires_at = capture1(&f.expiry, response).or_else(|| capture1(&f.expiry_alt, response));
    let nameservers = f
        .nameserver
        .captures_iter(response)
        .map(|c| c[1].trim().to_ascii_lowercase())
        .collect();

    let details = CheckDetails {
        registrar,
        created_at,
        expires_at,
        nameservers,
        status_codes: Vec::new(),
        http_status: None,
    };
    (CheckOutcome::Registered, details)
}

pub struct WhoisChecker {
    bootstrap: WhoisBootstrap,
    limiter: Arc<RateLimiter>,
}

impl WhoisChecker {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { bootstrap: WhoisBootstrap::new(), limiter }
    }

    async fn server_for(&self, domain: &str, deadline: Instant) -> Option<String> {
        let tld = tld_of(domain)?;
        if let Some(server) = self.bootstrap.lookup(tld) {
            return Some(server);
        }

        let referral = raw_query(IANA_WHOIS_SERVER, domain, deadline).await.ok()?;
        let server = parse_iana_referral(&referral)?;
        self.bootstrap.remember(tld, server.clone());
        Some(server)
    }
}

#[async_trait]
impl Checker for WhoisChecker {
    fn kind(&self) -> CheckerKind {
        CheckerKind::Whois
    }

    async fn check(&self, domain: &str, deadline: Instant) -> CheckResult {
        let started_at = std::time::SystemTime::now();

        if let Err(e) = self
            .limiter
            .acquire(CheckerKind::Whois.rate_class(), 1, deadline)
            .await
        {
            debug!(domain, error = %e, "whois checker: rate limit deadline exceeded");
            return CheckResult::new(CheckerKind::Whois, CheckOutcome::Inconclusive, started_at);
        }

        let Some(server) = self.server_for(domain, deadline).await else {
            debug!(domain, "whois checker: no server found for tld");
            return CheckResult::new(CheckerKind::Whois, CheckOutcome::Inconclusive, started_at);
        };

        let (outcome, details) = match raw_query(&server, domain, deadline).await {
            Ok(response) => parse_response(&response),
            Err(e) => {
                debug!(domain, server, error = %e, "whois checker: query failed");
                (CheckOutcome::Error, CheckDetails::default())
            }
        };

        debug!(domain, server, ?outcome, "whois checker result");
        CheckResult::new(CheckerKind::Whois, outcome, started_at).with_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domainwatch_ratelimit::ClassLimit;

    #[test]
    fn rate_class_is_whois() {
        assert_eq!(CheckerKind::Whois.rate_class(), "whois");
    }

    #[test]
    fn not_found_marker_yields_unregistered() {
        let resp = "No match for \"EXAMPLE.INVALID\"\n\n>>> Last update: 2026-01-01 <<<\n";
        let (outcome, _) = parse_response(resp);
        assert_eq!(outcome, CheckOutcome::Unregistered);
    }

    #[test]
    fn domain_field_yields_registered_with_details() {
        let resp = "Domain Name: EXAMPLE.COM\nRegistrar: Example Registrar, LLC\nCreation Date: 1995-08-14T04:00:00Z\nRegistry Expiry Date: 2030-08-13T04:00:00Z\nName Server: NS1.EXAMPLE.COM\nName Server: NS2.EXAMPLE.COM\n";
        let (outcome, details) = parse_response(resp);
        assert_eq!(outcome, CheckOutcome::Registered);
        assert_eq!(details.registrar.as_deref(), Some("Example Registrar, LLC"));
        assert_eq!(details.created_at.as_deref(), Some("1995-08-14T04:00:00Z"));
        assert_eq!(details.expires_at.as_deref(), Some("2030-08-13T04:00:00Z"));
        assert_eq!(details.nameservers, vec!["ns1.example.com", "ns2.example.com"]);
    }

    #[test]
    fn unrecognisable_response_is_inconclusive() {
        let resp = "% Rate limit exceeded, try again later\n";
        let (outcome, _) = parse_response(resp);
        assert_eq!(outcome, CheckOutcome::Inconclusive);
    }

    #[tokio::test]
    async fn exhausted_rate_limiter_yields_inconclusive_not_panic() {
        let limiter = Arc::new(RateLimiter::new(ClassLimit::new(1.0, 0.0)));
        limiter.try_acquire("whois", 1).unwrap();
        let checker = WhoisChecker::new(limiter);
        let deadline = Instant::now();
        let result = checker.check("example.invalid", deadline).await;
        assert_eq!(result.outcome, CheckOutcome::Inconclusive);
    }
}
