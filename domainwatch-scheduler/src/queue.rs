//! Time-ordered due-queue with lazy invalidation, plus in-flight and
//! deferred-removal bookkeeping.
//!
//! Grounded on `empath-delivery::queue::mod::DeliveryQueue`'s shape — a
//! lock-guarded map keyed by identity, with explicit per-entry status
//! transitions (`enqueue`, `remove`, status updates) — generalised from a
//! `HashMap` alone into a `HashMap` authoritative index plus a `BinaryHeap`
//! for due-time ordering, since the delivery queue never needed time
//! ordering and this scheduler does.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::SystemTime;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub name: String,
    pub priority: bool,
    pub next_check_at: SystemTime,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.next_check_at.cmp(&other.next_check_at)
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    /// Authoritative current position for each domain; stale heap entries
    /// (superseded by a later `upsert`) are discarded when popped.
    current: HashMap<String, QueueEntry>,
    in_flight: HashSet<String>,
    pending_removal: HashSet<String>,
}

/// The scheduler's due-queue: mutex-guarded, matching the "mutex-guarded
/// priority queue with condition signalling" shared-resource policy.
#[derive(Default)]
pub struct DueQueue {
    inner: Mutex<Inner>,
}

impl DueQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or reschedule a domain. Superseded heap entries are left in
    /// place and discarded lazily at pop time.
    pub fn upsert(&self, name: &str, priority: bool, next_check_at: SystemTime) {
        let entry = QueueEntry { name: name.to_string(), priority, next_check_at };
        let mut inner = self.inner.lock();
        inner.current.insert(name.to_string(), entry.clone());
        inner.heap.push(Reverse(entry));
    }

    /// Remove a domain. If it is currently in-flight, deletion is deferred
    /// until the in-flight check completes.
    pub fn remove(&self, name: &str) {
        let mut inner = self.inner.lock();
        if inner.in_flight.contains(name) {
            inner.pending_removal.insert(name.to_string());
        } else {
            inner.current.remove(name);
        }
    }

    /// Pops the highest-priority due entry at or before `now`. Among
    /// multiple due entries, priority-tier domains are served first, then
    /// the oldest-scheduled (earliest `next_check_at`) within a tier.
    /// Marks the returned domain in-flight.
    pub fn pop_due(&self, now: SystemTime) -> Option<QueueEntry> {
        let mut inner = self.inner.lock();

        let mut due = Vec::new();
        while let Some(Reverse(top)) = inner.heap.peek() {
            if top.next_check_at > now {
                break;
            }
            let Reverse(entry) = inner.heap.pop().expect("peeked entry must pop");
            let is_current = inner.current.get(&entry.name) == Some(&entry);
            let is_actionable = is_current && !inner.in_flight.contains(&entry.name);
            if is_actionable {
                due.push(entry);
            }
        }

        due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.next_check_at.cmp(&b.next_check_at)));

        let mut iter = due.into_iter();
        let chosen = iter.next();
        for leftover in iter {
            inner.heap.push(Reverse(leftover));
        }

        if let Some(entry) = &chosen {
            inner.in_flight.insert(entry.name.clone());
        }
        chosen
    }

    /// Earliest `next_check_at` across all live entries, ignoring
    /// in-flight/staleness — used only to size the worker's idle sleep.
    #[must_use]
    pub fn earliest(&self) -> Option<SystemTime> {
        self.inner.lock().heap.peek().map(|Reverse(e)| e.next_check_at)
    }

    /// Marks a domain's in-flight check complete. If the domain was queued
    /// for removal while in-flight, it is dropped permanently and `None`
    /// is returned (the caller must not reschedule or post a result).
    /// Otherwise returns the domain's current priority flag so the caller
    /// can compute its next cadence.
    pub fn complete(&self, name: &str, reschedule_at: SystemTime) -> Option<bool> {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(name);

        if inner.pending_removal.remove(name) {
            inner.current.remove(name);
            return None;
        }

        let priority = inner.current.get(name).map(|e| e.priority)?;
        let entry = QueueEntry { name: name.to_string(), priority, next_check_at: reschedule_at };
        inner.current.insert(name.to_string(), entry.clone());
        inner.heap.push(Reverse(entry));
        Some(priority)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().current.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn pop_due_respects_time_order() {
        let q = DueQueue::new();
        q.upsert("late.com", false, t(200));
        q.upsert("early.com", false, t(100));
        let first = q.pop_due(t(300)).unwrap();
        assert_eq!(first.name, "early.com");
    }

    #[test]
    fn pop_due_prefers_priority_tier_among_due_entries() {
        let q = DueQueue::new();
        q.upsert("regular.com", false, t(100));
        q.upsert("vip.com", true, t(150));
        let first = q.pop_due(t(300)).unwrap();
        assert_eq!(first.name, "vip.com");
    }

    #[test]
    fn not_yet_due_entries_are_not_popped() {
        let q = DueQueue::new();
        q.upsert("future.com", false, t(1_000));
        assert!(q.pop_due(t(100)).is_none());
    }

    #[test]
    fn in_flight_domain_cannot_be_double_dispatched() {
        let q = DueQueue::new();
        q.upsert("solo.com", false, t(100));
        let first = q.pop_due(t(200));
        assert!(first.is_some());
        q.upsert("solo.com", false, t(50));
        assert!(q.pop_due(t(200)).is_none());
    }

    #[test]
    fn removal_while_in_flight_is_deferred() {
        let q = DueQueue::new();
        q.upsert("gone.com", false, t(100));
        q.pop_due(t(200)).unwrap();
        q.remove("gone.com");
        let result = q.complete("gone.com", t(500));
        assert_eq!(result, None);
        assert!(q.pop_due(t(1_000)).is_none());
    }

    #[test]
    fn complete_reschedules_with_current_priority() {
        let q = DueQueue::new();
        q.upsert("domain.com", true, t(100));
        q.pop_due(t(200)).unwrap();
        let priority = q.complete("domain.com", t(500));
        assert_eq!(priority, Some(true));
        let rescheduled = q.pop_due(t(600)).unwrap();
        assert_eq!(rescheduled.next_check_at, t(500));
    }

    #[test]
    fn stale_entry_from_superseded_upsert_is_discarded() {
        let q = DueQueue::new();
        q.upsert("flip.com", false, t(100));
        q.upsert("flip.com", false, t(50));
        let popped = q.pop_due(t(200)).unwrap();
        assert_eq!(popped.next_check_at, t(50));
        // the original t(100) heap entry is still buried in the heap but
        // is stale and must not be returned again
        assert!(q.pop_due(t(200)).is_none());
    }
}
