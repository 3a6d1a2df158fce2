//! Periodic list-API fetch and registry delta reconciliation.
//!
//! Mirrors the fetch-once-cache/retry shape `domainwatch-checkers::bootstrap`
//! uses for the IANA RDAP registry, generalised into a repeating fetch loop:
//! parse the response into `(name, priority)` tuples, diff against the
//! caller's current registry view, and report the delta for the monitor to
//! apply. The reconciler never mutates a registry itself — it has no access
//! to one — it only computes `Delta` and leaves application to the caller,
//! the same boundary `domainwatch-scheduler::Dispatcher` keeps from the
//! scheduler towards the pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use domainwatch_common::DomainWatchError;
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_REFRESH_SECS: u64 = 300;
const EMPTY_FETCHES_BEFORE_DELETION: u32 = 2;
const RETRY_BASE: Duration = Duration::from_secs(5);
const RETRY_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct ListResponse {
    domains: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListEntry {
    Bare(String),
    Object { domain: String, #[serde(default)] priority: bool },
}

impl ListEntry {
    fn into_tuple(self) -> (String, bool) {
        match self {
            Self::Bare(domain) => (domain, false),
            Self::Object { domain, priority } => (domain, priority),
        }
    }
}

/// Computed change set between the previous registry and a freshly fetched list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delta {
    pub added: Vec<(String, bool)>,
    pub removed: Vec<String>,
    pub priority_changed: Vec<(String, bool)>,
}

impl Delta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.priority_changed.is_empty()
    }
}

/// Fetches `DOMAIN_API_URL` on a timer and computes deltas against the
/// caller's current view of the registry.
///
/// Tracks consecutive empty responses: an empty list is honoured as a real
/// delta (removing everything) only once it has been observed twice in a
/// row, per the "two consecutive empty fetches" resolution for a source
/// that otherwise appears to wipe the registry on a single empty response.
pub struct ListReconciler {
    client: reqwest::Client,
    url: String,
    refresh_interval: Duration,
    consecutive_empty_fetches: AtomicU32,
}

impl ListReconciler {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>, refresh_interval: Option<Duration>) -> Self {
        Self {
            client,
            url: url.into(),
            refresh_interval: refresh_interval.unwrap_or(Duration::from_secs(DEFAULT_REFRESH_SECS)),
            consecutive_empty_fetches: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Fetches the list API once, retrying transient failures with
    /// exponential backoff, and returns the raw `(name, priority)` set. The
    /// existing registry is left untouched by the caller on `Err` — only a
    /// fully successful fetch produces a new snapshot to diff against.
    pub async fn fetch(&self) -> Result<Vec<(String, bool)>, DomainWatchError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once().await {
                Ok(entries) => return Ok(entries),
                Err(err) if attempt < 4 => {
                    attempt += 1;
                    let delay = backoff(attempt).min(RETRY_CAP);
                    warn!(attempt, ?delay, error = %err, "reconciler: fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self) -> Result<Vec<(String, bool)>, DomainWatchError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DomainWatchError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DomainWatchError::RemoteFailure {
                status: resp.status().as_u16(),
                message: self.url.clone(),
            });
        }

        let body: ListResponse = resp.json().await.map_err(|e| DomainWatchError::Protocol(e.to_string()))?;
        Ok(body.domains.into_iter().map(ListEntry::into_tuple).collect())
    }

    /// Computes the delta between `current` (the monitor's live registry,
    /// as `name -> priority`) and a freshly fetched `Vec<(name, priority)>`.
    ///
    /// An empty fetch is folded into `current` unchanged unless it is the
    /// second consecutive empty fetch, at which point every current domain
    /// is reported as removed.
    pub fn diff(&self, current: &HashMap<String, bool>, fetched: Vec<(String, bool)>) -> Delta {
        if fetched.is_empty() {
            let count = self.consecutive_empty_fetches.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(count, "reconciler: empty list-API response");
            domainwatch_metrics::metrics().incr("reconcile_empty_response_total");
            if count < EMPTY_FETCHES_BEFORE_DELETION {
                return Delta::default();
            }
            info!(count, "reconciler: two consecutive empty fetches, clearing registry");
            return Delta {
                added: Vec::new(),
                removed: current.keys().cloned().collect(),
                priority_changed: Vec::new(),
            };
        }
        self.consecutive_empty_fetches.store(0, Ordering::SeqCst);

        let fetched_names: HashSet<&str> = fetched.iter().map(|(n, _)| n.as_str()).collect();

        let mut added = Vec::new();
        let mut priority_changed = Vec::new();
        for (name, priority) in &fetched {
            match current.get(name) {
                None => added.push((name.clone(), *priority)),
                Some(existing) if *existing != *priority => priority_changed.push((name.clone(), *priority)),
                Some(_) => {}
            }
        }

        let removed = current
            .keys()
            .filter(|name| !fetched_names.contains(name.as_str()))
            .cloned()
            .collect();

        Delta { added, removed, priority_changed }
    }
}

fn backoff(attempt: u32) -> Duration {
    RETRY_BASE.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
