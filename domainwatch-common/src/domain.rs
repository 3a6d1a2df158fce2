//! Core data model: `Domain`, `CheckResult`, `Verdict`.
//!
//! Mirrors the shape described in the data model section of the design
//! document: a `Domain` is the long-lived, persisted record; `CheckResult`
//! is one oracle's opinion; `Verdict` is what the pipeline derives by
//! fusing a set of `CheckResult`s.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A normalised, ASCII domain name plus its monitoring state.
///
/// Construction always normalises (lowercase, trailing dot stripped) so
/// that the registry can use `name` as a set key without duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub priority: bool,
    pub last_checked_at: Option<SystemTime>,
    pub next_check_at: SystemTime,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_verdict: VerdictStatus,
    #[serde(default)]
    pub last_confidence: f64,
    #[serde(default)]
    pub last_reported_status: VerdictStatus,
}

impl Domain {
    /// Normalise a raw domain string: lowercase, strip a trailing dot.
    #[must_use]
    pub fn normalise(raw: &str) -> String {
        let trimmed = raw.trim().trim_end_matches('.');
        trimmed.to_ascii_lowercase()
    }

    /// Create a freshly-discovered domain, scheduled to be checked immediately.
    #[must_use]
    pub fn new(raw: &str, priority: bool, now: SystemTime) -> Self {
        Self {
            name: Self::normalise(raw),
            priority,
            last_checked_at: None,
            next_check_at: now,
            consecutive_failures: 0,
            last_verdict: VerdictStatus::Unknown,
            last_confidence: 0.0,
            last_reported_status: VerdictStatus::Unknown,
        }
    }

    /// `true` once a verdict at or past `LikelyAvailable` has been reached.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(
            self.last_verdict,
            VerdictStatus::LikelyAvailable | VerdictStatus::ConfirmedAvailable
        )
    }
}

/// The four oracles the pipeline can consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckerKind {
    Dns,
    Http,
    Rdap,
    Whois,
}

impl CheckerKind {
    /// Rate-limit service class this checker is gated by.
    #[must_use]
    pub const fn rate_class(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Http => "http",
            Self::Rdap => "rdap",
            Self::Whois => "whois",
        }
    }
}

/// What a single oracle concluded about a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Registered,
    Unregistered,
    Inconclusive,
    Error,
}

/// Opaque-to-the-pipeline attributes a checker may have observed.
///
/// Fixed shape rather than a free-form map so callback payloads and the
/// `/domain/{name}` endpoint are well-typed; unused fields are omitted on
/// serialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub status_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

/// One oracle's output for one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub checker_kind: CheckerKind,
    pub outcome: CheckOutcome,
    #[serde(default)]
    pub details: CheckDetails,
    pub started_at: SystemTime,
    pub duration_ms: u64,
}

impl CheckResult {
    #[must_use]
    pub fn new(checker_kind: CheckerKind, outcome: CheckOutcome, started_at: SystemTime) -> Self {
        Self {
            checker_kind,
            outcome,
            details: CheckDetails::default(),
            started_at,
            duration_ms: started_at.elapsed().map(|d| d.as_millis() as u64).unwrap_or(0),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: CheckDetails) -> Self {
        self.details = details;
        self
    }
}

/// The pipeline's classification for a domain at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    #[default]
    Unknown,
    LikelyTaken,
    LikelyAvailable,
    ConfirmedAvailable,
}

impl VerdictStatus {
    /// `true` for the two "available" variants the callback API cares about.
    #[must_use]
    pub const fn is_available_variant(self) -> bool {
        matches!(self, Self::LikelyAvailable | Self::ConfirmedAvailable)
    }
}

/// The pipeline's fusion result for a single check cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub confidence: f64,
    pub contributing: Vec<CheckResult>,
}

impl Verdict {
    #[must_use]
    pub fn new(status: VerdictStatus, confidence: f64, contributing: Vec<CheckResult>) -> Self {
        Self {
            status,
            confidence: confidence.clamp(0.0, 1.0),
            contributing,
        }
    }

    /// Law 2: a `ConfirmedAvailable` verdict must cite a Layer-3 (WHOIS)
    /// `Unregistered` result among its contributing checks.
    #[must_use]
    pub fn has_whois_unregistered(&self) -> bool {
        self.contributing.iter().any(|r| {
            r.checker_kind == CheckerKind::Whois && r.outcome == CheckOutcome::Unregistered
        })
    }
}
