//! The read-only view the ops server needs of `DomainMonitor`'s registry.
//!
//! Kept as a trait, the same boundary `domainwatch-scheduler::Dispatcher`
//! draws towards the pipeline, so this crate never depends on
//! `domainwatch-pipeline`/`domainwatch-reconciler` types.

use async_trait::async_trait;
use domainwatch_common::VerdictStatus;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DomainSummary {
    pub name: String,
    pub priority: bool,
    pub last_verdict: VerdictStatus,
    pub last_confidence: f64,
    pub next_check_at_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainDetail {
    pub name: String,
    pub priority: bool,
    pub last_verdict: VerdictStatus,
    pub last_confidence: f64,
    pub consecutive_failures: u32,
    pub last_checked_at_secs: Option<u64>,
    pub next_check_at_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerdictCounts {
    pub unknown: u64,
    pub likely_taken: u64,
    pub likely_available: u64,
    pub confirmed_available: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub domain_count: usize,
    pub by_verdict: VerdictCounts,
    pub worker_count: usize,
    pub in_flight_count: usize,
}

/// Implemented by `DomainMonitor` so the ops server can read registry
/// state and trigger a forced reconcile without owning the registry type.
#[async_trait]
pub trait RegistryView: Send + Sync {
    fn is_alive(&self) -> bool;
    fn state_store_writable(&self) -> bool;
    fn status(&self) -> StatusSnapshot;
    fn list_domains(&self) -> Vec<DomainSummary>;
    fn domain(&self, name: &str) -> Option<DomainDetail>;

    /// Forces an immediate list-API fetch and resets every domain's
    /// `next_check_at`, per `POST /refresh`.
    async fn refresh(&self);
}
