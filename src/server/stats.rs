//! Per-worker statistics.
//!
//! Every field is its own atomic. The worker thread is the only writer of
//! the message counters; the balancer and [`WorkerPool::stats`] read them
//! from other threads without locking.
//!
//! [`WorkerPool::stats`]: super::WorkerPool::stats

use crate::net::websocket::StatsSink;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Counts at or above this wrap back to 1, restarting the running average.
const COUNT_WRAP: u64 = u64::MAX - 1;

/// Message count, largest size, and running average for one direction.
#[derive(Debug, Default)]
struct SizeTracker {
    count: AtomicU64,
    max: AtomicU64,
    avg_bits: AtomicU64,
}

impl SizeTracker {
    fn record(&self, size: usize) {
        let size = size as u64;
        let prev = self.count.load(Ordering::Relaxed);
        let count = if prev >= COUNT_WRAP { 1 } else { prev + 1 };
        let avg = if count == 1 {
            size as f64
        } else {
            let avg = f64::from_bits(self.avg_bits.load(Ordering::Relaxed));
            avg + (size as f64 - avg) / count as f64
        };
        self.avg_bits.store(avg.to_bits(), Ordering::Relaxed);
        self.count.store(count, Ordering::Relaxed);
        self.max.fetch_max(size, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    fn average(&self) -> f64 {
        f64::from_bits(self.avg_bits.load(Ordering::Relaxed))
    }
}

/// Live statistics of one worker.
#[derive(Debug)]
pub struct WorkerStats {
    connections: AtomicUsize,
    event_queue_depth: AtomicUsize,
    inbound_queue_depth: AtomicUsize,
    inbound: SizeTracker,
    outbound: SizeTracker,
    alive: AtomicBool,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStats {
    /// Zeroed statistics for a live worker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: AtomicUsize::new(0),
            event_queue_depth: AtomicUsize::new(0),
            inbound_queue_depth: AtomicUsize::new(0),
            inbound: SizeTracker::default(),
            outbound: SizeTracker::default(),
            alive: AtomicBool::new(true),
        }
    }

    /// Open connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub(crate) fn set_connections(&self, n: usize) {
        self.connections.store(n, Ordering::Relaxed);
    }

    /// Events returned by the last poll.
    #[must_use]
    pub fn event_queue_depth(&self) -> usize {
        self.event_queue_depth.load(Ordering::Relaxed)
    }

    pub(crate) fn set_event_queue_depth(&self, n: usize) {
        self.event_queue_depth.store(n, Ordering::Relaxed);
    }

    /// Sockets handed to the worker but not yet taken off its queue.
    #[must_use]
    pub fn inbound_queue_depth(&self) -> usize {
        self.inbound_queue_depth.load(Ordering::Relaxed)
    }

    pub(crate) fn inbound_queued(&self) {
        self.inbound_queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inbound_dequeued(&self) {
        // Saturate: a failed send may race with the worker's decrement.
        let _ = self
            .inbound_queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    /// False once the worker thread has exited.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Point-in-time copy of every field.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections(),
            event_queue_depth: self.event_queue_depth(),
            inbound_queue_depth: self.inbound_queue_depth(),
            in_messages: self.inbound.count(),
            out_messages: self.outbound.count(),
            max_in_size: self.inbound.max(),
            max_out_size: self.outbound.max(),
            avg_in_size: self.inbound.average(),
            avg_out_size: self.outbound.average(),
            alive: self.is_alive(),
        }
    }
}

impl StatsSink for WorkerStats {
    fn record_in(&self, size: usize) {
        self.inbound.record(size);
    }

    fn record_out(&self, size: usize) {
        self.outbound.record(size);
    }
}

/// Copy of a worker's statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    /// Open connections.
    pub connections: usize,
    /// Events returned by the last poll.
    pub event_queue_depth: usize,
    /// Sockets waiting on the worker's inbound queue.
    pub inbound_queue_depth: usize,
    /// Data messages delivered to applications.
    pub in_messages: u64,
    /// Data messages sent.
    pub out_messages: u64,
    /// Largest inbound message.
    pub max_in_size: u64,
    /// Largest outbound message.
    pub max_out_size: u64,
    /// Running average inbound message size.
    pub avg_in_size: f64,
    /// Running average outbound message size.
    pub avg_out_size: f64,
    /// Whether the worker is still running.
    pub alive: bool,
}

impl StatsSnapshot {
    /// Sums counts, keeps the largest maxima, and weights averages by count.
    ///
    /// `alive` is true if either side is alive.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let weighted = |a: f64, na: u64, b: f64, nb: u64| {
            let total = na.saturating_add(nb);
            if total == 0 {
                0.0
            } else {
                (a * na as f64 + b * nb as f64) / total as f64
            }
        };
        Self {
            connections: self.connections + other.connections,
            event_queue_depth: self.event_queue_depth + other.event_queue_depth,
            inbound_queue_depth: self.inbound_queue_depth + other.inbound_queue_depth,
            in_messages: self.in_messages.saturating_add(other.in_messages),
            out_messages: self.out_messages.saturating_add(other.out_messages),
            max_in_size: self.max_in_size.max(other.max_in_size),
            max_out_size: self.max_out_size.max(other.max_out_size),
            avg_in_size: weighted(
                self.avg_in_size,
                self.in_messages,
                other.avg_in_size,
                other.in_messages,
            ),
            avg_out_size: weighted(
                self.avg_out_size,
                self.out_messages,
                other.avg_out_size,
                other.out_messages,
            ),
            alive: self.alive || other.alive,
        }
    }
}

/// Statistics of a whole pool.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoolStats {
    /// One snapshot per worker, by worker index.
    pub workers: Vec<StatsSnapshot>,
    /// All workers merged.
    pub total: StatsSnapshot,
}

impl PoolStats {
    /// Builds the aggregate from per-worker snapshots.
    #[must_use]
    pub fn from_workers(workers: Vec<StatsSnapshot>) -> Self {
        let total = workers
            .iter()
            .fold(StatsSnapshot::default(), |acc, s| acc.merge(s));
        Self { workers, total }
    }

    /// Workers still running.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|s| s.alive).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn running_average_and_max() {
        init_test("running_average_and_max");
        let stats = WorkerStats::new();
        for size in [10, 20, 30, 40] {
            stats.record_in(size);
        }
        stats.record_out(7);
        let snap = stats.snapshot();
        crate::assert_with_log!(snap.in_messages == 4, "in count", 4, snap.in_messages);
        crate::assert_with_log!(snap.max_in_size == 40, "in max", 40, snap.max_in_size);
        let avg_ok = (snap.avg_in_size - 25.0).abs() < 1e-9;
        crate::assert_with_log!(avg_ok, "in avg", 25.0, snap.avg_in_size);
        crate::assert_with_log!(snap.out_messages == 1, "out count", 1, snap.out_messages);
        crate::test_complete!("running_average_and_max");
    }

    #[test]
    fn count_wraps_to_one() {
        init_test("count_wraps_to_one");
        let tracker = SizeTracker::default();
        tracker.count.store(COUNT_WRAP, Ordering::Relaxed);
        tracker.avg_bits.store(1000.0f64.to_bits(), Ordering::Relaxed);
        tracker.record(8);
        crate::assert_with_log!(tracker.count() == 1, "wrapped", 1, tracker.count());
        let avg_reset = (tracker.average() - 8.0).abs() < 1e-9;
        crate::assert_with_log!(avg_reset, "average restarted", 8.0, tracker.average());
        crate::test_complete!("count_wraps_to_one");
    }

    #[test]
    fn inbound_depth_saturates() {
        init_test("inbound_depth_saturates");
        let stats = WorkerStats::new();
        stats.inbound_dequeued();
        crate::assert_with_log!(
            stats.inbound_queue_depth() == 0,
            "no underflow",
            0,
            stats.inbound_queue_depth()
        );
        stats.inbound_queued();
        stats.inbound_queued();
        stats.inbound_dequeued();
        crate::assert_with_log!(
            stats.inbound_queue_depth() == 1,
            "depth",
            1,
            stats.inbound_queue_depth()
        );
        crate::test_complete!("inbound_depth_saturates");
    }

    #[test]
    fn pool_total_merges_workers() {
        init_test("pool_total_merges_workers");
        let a = WorkerStats::new();
        a.set_connections(2);
        a.record_in(10);
        let b = WorkerStats::new();
        b.set_connections(3);
        b.record_in(30);
        b.record_in(30);
        b.mark_dead();
        let pool = PoolStats::from_workers(vec![a.snapshot(), b.snapshot()]);
        crate::assert_with_log!(
            pool.total.connections == 5,
            "connections",
            5,
            pool.total.connections
        );
        crate::assert_with_log!(
            pool.total.in_messages == 3,
            "messages",
            3,
            pool.total.in_messages
        );
        let avg_ok = (pool.total.avg_in_size - 70.0 / 3.0).abs() < 1e-9;
        crate::assert_with_log!(avg_ok, "weighted avg", 70.0 / 3.0, pool.total.avg_in_size);
        crate::assert_with_log!(pool.live_workers() == 1, "live", 1, pool.live_workers());
        crate::test_complete!("pool_total_merges_workers");
    }
}
