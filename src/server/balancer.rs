//! Worker selection for accepted sockets.
//!
//! The balancer works from a cached snapshot of each live worker's load
//! instead of reading the atomics on every admission. The snapshot is
//! refreshed when the number of live workers changes and every
//! `refresh_interval` admissions; in between, the chosen worker's cached
//! connection count is bumped locally so consecutive picks spread out.

use crate::tracing_compat::trace;
use std::fmt;
use std::str::FromStr;

/// How the balancer picks a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "config-file",
    derive(serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum BalancePolicy {
    /// Weighted scan over connections and event queue depth.
    #[default]
    Greedy,
    /// Rotate through live workers.
    RoundRobin,
}

impl fmt::Display for BalancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Greedy => f.write_str("greedy"),
            Self::RoundRobin => f.write_str("round-robin"),
        }
    }
}

impl FromStr for BalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greedy" => Ok(Self::Greedy),
            "round-robin" | "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown balance policy '{other}'")),
        }
    }
}

/// Load of one live worker at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSample {
    /// Index of the worker in the pool.
    pub worker: usize,
    /// Open connections.
    pub connections: usize,
    /// Events returned by the worker's last poll.
    pub event_queue_depth: usize,
}

impl LoadSample {
    /// A sample for worker `worker`.
    #[must_use]
    pub const fn new(worker: usize, connections: usize, event_queue_depth: usize) -> Self {
        Self {
            worker,
            connections,
            event_queue_depth,
        }
    }
}

/// Greedy pick over `snapshot`; returns a position in the slice.
///
/// The baseline only moves when a candidate has both fewer connections and a
/// shorter event queue, so a later candidate can be chosen against a
/// baseline that is no longer the current choice.
#[must_use]
pub fn pick_greedy(snapshot: &[LoadSample], weight: f64) -> Option<usize> {
    let mut baseline = *snapshot.first()?;
    let mut chosen = 0;
    for (i, cand) in snapshot.iter().enumerate().skip(1) {
        if baseline.connections > cand.connections {
            chosen = i;
            if baseline.event_queue_depth > cand.event_queue_depth {
                baseline = *cand;
            }
        } else if baseline.event_queue_depth as f64 > cand.connections as f64 * weight {
            chosen = i;
        }
    }
    Some(chosen)
}

/// Snapshot-caching worker selector.
///
/// The snapshot is re-sampled when the live worker count changes or after
/// `refresh_interval` admissions. In between, the cached entry of each chosen
/// worker gains one connection, so a burst inside one window spreads out
/// instead of landing entirely on the worker the last sample favoured. This
/// is a deliberate departure from reusing the sample untouched;
/// [`pick_greedy`] itself is unchanged and only ever sees the cached values.
#[derive(Debug, Clone)]
pub struct Balancer {
    policy: BalancePolicy,
    weight: f64,
    refresh_interval: usize,
    snapshot: Vec<LoadSample>,
    since_refresh: usize,
    cursor: usize,
}

impl Balancer {
    /// A balancer with an empty snapshot.
    ///
    /// A `refresh_interval` of zero refreshes on every admission.
    #[must_use]
    pub fn new(policy: BalancePolicy, weight: f64, refresh_interval: usize) -> Self {
        Self {
            policy,
            weight,
            refresh_interval,
            snapshot: Vec::new(),
            since_refresh: 0,
            cursor: 0,
        }
    }

    /// Selection policy.
    #[must_use]
    pub const fn policy(&self) -> BalancePolicy {
        self.policy
    }

    /// Cached snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &[LoadSample] {
        &self.snapshot
    }

    /// Forces a refresh on the next admission.
    pub fn invalidate(&mut self) {
        self.snapshot.clear();
    }

    /// Picks a worker index for the next admission.
    ///
    /// `sample` is called only when the cached snapshot is stale and must
    /// return one entry per live worker. Returns `None` with no live workers.
    pub fn choose<F>(&mut self, live_workers: usize, sample: F) -> Option<usize>
    where
        F: FnOnce() -> Vec<LoadSample>,
    {
        if live_workers == 0 {
            return None;
        }
        if self.snapshot.len() != live_workers || self.since_refresh >= self.refresh_interval {
            self.snapshot = sample();
            self.since_refresh = 0;
            trace!(workers = self.snapshot.len(), "balancer snapshot refreshed");
        }
        let position = match self.policy {
            BalancePolicy::Greedy => pick_greedy(&self.snapshot, self.weight)?,
            BalancePolicy::RoundRobin => {
                if self.snapshot.is_empty() {
                    return None;
                }
                let position = self.cursor % self.snapshot.len();
                self.cursor = self.cursor.wrapping_add(1);
                position
            }
        };
        self.since_refresh += 1;
        let entry = &mut self.snapshot[position];
        entry.connections += 1;
        Some(entry.worker)
    }
}
