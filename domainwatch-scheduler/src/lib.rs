//! Priority-aware check scheduler.
//!
//! Owns the due-time queue (see [`queue`]) and a fixed worker pool that
//! drains it, handing each due domain to a caller-supplied [`Dispatcher`]
//! and applying the [`cadence`] policy to the result. Kept deliberately
//! ignorant of the pipeline and registry types it's driving — the
//! `DomainMonitor` binary wires a `Dispatcher` that owns those concerns,
//! the same separation `empath-delivery`'s queue module keeps from its
//! `DeliveryProcessor`.

pub mod cadence;
pub mod queue;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use domainwatch_common::VerdictStatus;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub use cadence::Cadence;
pub use queue::{DueQueue, QueueEntry};

const IDLE_POLL: Duration = Duration::from_secs(5);

/// Runs one check for a due domain and reports the resulting verdict
/// status plus its (possibly updated) `consecutive_failures` count, so the
/// scheduler can feed both into the cadence policy.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, name: &str, deadline: Instant) -> (VerdictStatus, u32);
}

pub struct Scheduler {
    queue: DueQueue,
    cadence: Cadence,
}

impl Scheduler {
    #[must_use]
    pub fn new(cadence: Cadence) -> Self {
        Self { queue: DueQueue::new(), cadence }
    }

    #[must_use]
    pub fn queue(&self) -> &DueQueue {
        &self.queue
    }

    /// Inserts a freshly-discovered domain, due immediately plus a small
    /// random jitter so a bulk import doesn't dispatch everything at once.
    pub fn insert_new(&self, name: &str, priority: bool) {
        let jitter = cadence::small_jitter_secs(30);
        let due = SystemTime::now() + Duration::from_secs(jitter);
        self.queue.upsert(name, priority, due);
    }

    pub fn update_priority(&self, name: &str, priority: bool, next_check_at: SystemTime) {
        self.queue.upsert(name, priority, next_check_at);
    }

    pub fn remove(&self, name: &str) {
        self.queue.remove(name);
    }

    /// Resets every currently-known domain's `next_check_at` to
    /// `now + small jitter`, per the manual `/refresh` operation. Requires
    /// the caller to pass the full set since the queue only tracks
    /// name/priority/time, not the registry.
    pub fn refresh_all(&self, domains: &[(String, bool)]) {
        for (name, priority) in domains {
            let jitter = cadence::small_jitter_secs(60);
            let due = SystemTime::now() + Duration::from_secs(jitter);
            self.queue.upsert(name, *priority, due);
        }
        info!(count = domains.len(), "scheduler: refresh reset all next_check_at");
    }

    /// Runs `workers` worker loops until `shutdown` fires. Each worker pulls
    /// one due domain at a time, dispatches it, and reschedules per the
    /// cadence policy; a domain removed while in-flight is dropped instead.
    pub async fn run(
        self: Arc<Self>,
        dispatcher: Arc<dyn Dispatcher>,
        workers: usize,
        check_timeout: Duration,
        shutdown: broadcast::Sender<domainwatch_common::Signal>,
    ) {
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let scheduler = Arc::clone(&self);
            let dispatcher = Arc::clone(&dispatcher);
            let mut shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    let entry = tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        entry = scheduler.next_due() => entry,
                    };

                    debug!(worker_id, domain = %entry.name, "scheduler: dispatching");
                    let deadline = Instant::now() + check_timeout;
                    let (status, consecutive_failures) = dispatcher.dispatch(&entry.name, deadline).await;

                    let now_secs = SystemTime::now()
                        .duration_since(SystemTime::UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or_default();
                    let next = scheduler
                        .cadence
                        .next_check(entry.priority, status, consecutive_failures, now_secs);
                    let reschedule_at =
                        SystemTime::UNIX_EPOCH + Duration::from_secs(next.next_check_at_secs);

                    if scheduler.queue.complete(&entry.name, reschedule_at).is_none() {
                        debug!(domain = %entry.name, "scheduler: dropped, removed while in-flight");
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn next_due(&self) -> QueueEntry {
        loop {
            if let Some(entry) = self.queue.pop_due(SystemTime::now()) {
                return entry;
            }
            let wait = self
                .queue
                .earliest()
                .and_then(|t| t.duration_since(SystemTime::now()).ok())
                .unwrap_or(IDLE_POLL)
                .min(IDLE_POLL);
            tokio::time::sleep(wait).await;
        }
    }
}
