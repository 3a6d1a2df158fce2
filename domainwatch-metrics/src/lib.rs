//! In-process metrics for domainwatch.
//!
//! A pull-based counter and timer registry instead of the OTLP-push
//! pipeline this crate's teacher (`empath-metrics`) carries: `GET
//! /metrics`/`GET /metrics/reset` read and reset this registry directly,
//! there is no collector to push to. Keeps the teacher's `Metrics` struct
//! and module-level `OnceCell` global shape.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::Serialize;

static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

/// Root metrics container: one counter registry, one timer registry.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: DashMap<&'static str, AtomicU64>,
    timers: DashMap<&'static str, TimerBucket>,
}

#[derive(Debug, Default)]
struct TimerBucket {
    count: AtomicU64,
    total_micros: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub name: &'static str,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerSnapshot {
    pub name: &'static str,
    pub count: u64,
    pub total_micros: u64,
    pub mean_micros: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub counters: Vec<CounterSnapshot>,
    pub timers: Vec<TimerSnapshot>,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &'static str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &'static str, delta: u64) {
        self.counters.entry(name).or_default().fetch_add(delta, Ordering::Relaxed);
    }

    pub fn observe(&self, name: &'static str, duration: std::time::Duration) {
        let bucket = self.timers.entry(name).or_default();
        bucket.count.fetch_add(1, Ordering::Relaxed);
        bucket.total_micros.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Snapshots every counter/timer whose name starts with `prefix`
    /// (empty prefix matches everything).
    #[must_use]
    pub fn snapshot(&self, prefix: &str) -> Snapshot {
        let counters = self
            .counters
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| CounterSnapshot { name: e.key(), value: e.value().load(Ordering::Relaxed) })
            .collect();

        let timers = self
            .timers
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| {
                let count = e.value().count.load(Ordering::Relaxed);
                let total_micros = e.value().total_micros.load(Ordering::Relaxed);
                let mean_micros = if count == 0 { 0.0 } else { total_micros as f64 / count as f64 };
                TimerSnapshot { name: e.key(), count, total_micros, mean_micros }
            })
            .collect();

        Snapshot { counters, timers }
    }

    pub fn reset_all(&self) {
        self.counters.clear();
        self.timers.clear();
    }
}

/// Installs the process-wide metrics instance. Idempotent: a second call
/// is a no-op rather than an error, since the registry holds no
/// configuration that would make re-initialisation meaningful.
pub fn init_metrics() -> &'static Metrics {
    METRICS_INSTANCE.get_or_init(Metrics::new)
}

/// Returns the global metrics instance, initialising it on first use.
#[must_use]
pub fn metrics() -> &'static Metrics {
    METRICS_INSTANCE.get_or_init(Metrics::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn incr_accumulates() {
        let m = Metrics::new();
        m.incr("checks_total");
        m.incr("checks_total");
        m.incr_by("checks_total", 3);
        let snap = m.snapshot("");
        assert_eq!(snap.counters[0].value, 5);
    }

    #[test]
    fn observe_tracks_count_and_mean() {
        let m = Metrics::new();
        m.observe("dns_lookup", Duration::from_micros(100));
        m.observe("dns_lookup", Duration::from_micros(300));
        let snap = m.snapshot("");
        let timer = &snap.timers[0];
        assert_eq!(timer.count, 2);
        assert_eq!(timer.total_micros, 400);
        assert!((timer.mean_micros - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_filters_by_prefix() {
        let m = Metrics::new();
        m.incr("dns_total");
        m.incr("http_total");
        let snap = m.snapshot("dns_");
        assert_eq!(snap.counters.len(), 1);
        assert_eq!(snap.counters[0].name, "dns_total");
    }

    #[test]
    fn reset_all_clears_both_registries() {
        let m = Metrics::new();
        m.incr("a");
        m.observe("b", Duration::from_micros(10));
        m.reset_all();
        let snap = m.snapshot("");
        assert!(snap.counters.is_empty());
        assert!(snap.timers.is_empty());
    }
}
