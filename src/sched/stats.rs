/*!
 * Scheduler Counters
 * Relaxed atomic accumulators written by callbacks, drained by the reporter
 *
 * Callbacks on different CPUs bump these concurrently. Readers get values
 * that are approximately, not exactly, consistent with each other; that is
 * fine for diagnostics and nothing schedules off them.
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Accumulators shared between a policy and its reporter
///
/// # Performance
/// - Cache-line aligned to prevent false sharing with policy state
/// - All operations use relaxed ordering
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct SchedCounters {
    enqueues: AtomicU64,
    wait_ns: AtomicU64,
    prio_enqueues: AtomicU64,
    prio_wait_ns: AtomicU64,
    normal_enqueues: AtomicU64,
    normal_wait_ns: AtomicU64,
    slices: AtomicU64,
    slice_used_ns: AtomicU64,
    slice_granted_ns: AtomicU64,
    direct_dispatches: AtomicU64,
}

impl SchedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Performance
    /// Hot path - called from `running`
    #[inline(always)]
    pub fn record_wait(&self, wait_ns: u64) {
        self.enqueues.fetch_add(1, Ordering::Relaxed);
        self.wait_ns.fetch_add(wait_ns, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_prio_wait(&self, wait_ns: u64) {
        self.prio_enqueues.fetch_add(1, Ordering::Relaxed);
        self.prio_wait_ns.fetch_add(wait_ns, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_normal_wait(&self, wait_ns: u64) {
        self.normal_enqueues.fetch_add(1, Ordering::Relaxed);
        self.normal_wait_ns.fetch_add(wait_ns, Ordering::Relaxed);
    }

    /// # Performance
    /// Hot path - called from `stopping`
    #[inline(always)]
    pub fn record_slice(&self, used_ns: u64, granted_ns: u64) {
        self.slices.fetch_add(1, Ordering::Relaxed);
        self.slice_used_ns.fetch_add(used_ns, Ordering::Relaxed);
        self.slice_granted_ns.fetch_add(granted_ns, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_direct_dispatch(&self) {
        self.direct_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Read without resetting
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            enqueues: load(&self.enqueues),
            wait_ns: load(&self.wait_ns),
            prio_enqueues: load(&self.prio_enqueues),
            prio_wait_ns: load(&self.prio_wait_ns),
            normal_enqueues: load(&self.normal_enqueues),
            normal_wait_ns: load(&self.normal_wait_ns),
            slices: load(&self.slices),
            slice_used_ns: load(&self.slice_used_ns),
            slice_granted_ns: load(&self.slice_granted_ns),
            direct_dispatches: load(&self.direct_dispatches),
        }
    }

    /// Read and zero every counter
    ///
    /// Each counter is swapped individually, so an update racing with the
    /// reset lands in either this snapshot or the next one, never neither.
    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let take = |c: &AtomicU64| c.swap(0, Ordering::Relaxed);
        StatsSnapshot {
            enqueues: take(&self.enqueues),
            wait_ns: take(&self.wait_ns),
            prio_enqueues: take(&self.prio_enqueues),
            prio_wait_ns: take(&self.prio_wait_ns),
            normal_enqueues: take(&self.normal_enqueues),
            normal_wait_ns: take(&self.normal_wait_ns),
            slices: take(&self.slices),
            slice_used_ns: take(&self.slice_used_ns),
            slice_granted_ns: take(&self.slice_granted_ns),
            direct_dispatches: take(&self.direct_dispatches),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub enqueues: u64,
    pub wait_ns: u64,
    pub prio_enqueues: u64,
    pub prio_wait_ns: u64,
    pub normal_enqueues: u64,
    pub normal_wait_ns: u64,
    pub slices: u64,
    pub slice_used_ns: u64,
    pub slice_granted_ns: u64,
    pub direct_dispatches: u64,
}

fn average(total: u64, count: u64) -> Option<u64> {
    total.checked_div(count)
}

impl StatsSnapshot {
    pub fn avg_wait_ns(&self) -> Option<u64> {
        average(self.wait_ns, self.enqueues)
    }

    pub fn avg_prio_wait_ns(&self) -> Option<u64> {
        average(self.prio_wait_ns, self.prio_enqueues)
    }

    pub fn avg_normal_wait_ns(&self) -> Option<u64> {
        average(self.normal_wait_ns, self.normal_enqueues)
    }

    /// Fraction of granted slice time actually used
    pub fn slice_usage(&self) -> Option<f64> {
        if self.slice_granted_ns == 0 {
            return None;
        }
        Some(self.slice_used_ns as f64 / self.slice_granted_ns as f64)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let counters = SchedCounters::new();
        counters.record_wait(300);
        counters.record_wait(100);
        counters.record_slice(5, 20);

        let snap = counters.snapshot_and_reset();
        assert_eq!(snap.enqueues, 2);
        assert_eq!(snap.avg_wait_ns(), Some(200));
        assert_eq!(snap.slice_usage(), Some(0.25));
        assert!(counters.snapshot().is_empty());
    }

    #[test]
    fn test_empty_averages() {
        let snap = StatsSnapshot::default();
        assert_eq!(snap.avg_wait_ns(), None);
        assert_eq!(snap.slice_usage(), None);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let counters = Arc::new(SchedCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        counters.record_prio_wait(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.snapshot().prio_enqueues, 4_000);
    }
}
