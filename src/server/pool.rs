//! Fixed pool of worker threads behind a balancer.

use super::balancer::{BalancePolicy, Balancer, LoadSample};
use super::stats::PoolStats;
use super::worker::{Worker, WorkerContext, WorkerHandle};
use crate::error::ServerError;
use crate::tracing_compat::{debug, info, warn};

use std::net::{SocketAddr, TcpStream};
use std::thread::JoinHandle;

/// Balancer settings for a pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceSettings {
    /// Selection policy.
    pub policy: BalancePolicy,
    /// Weight applied to candidate connection counts in the greedy scan.
    pub connection_weight: f64,
    /// Admissions between snapshot refreshes.
    pub refresh_interval: usize,
}

impl Default for BalanceSettings {
    fn default() -> Self {
        Self {
            policy: BalancePolicy::Greedy,
            connection_weight: 0.7,
            refresh_interval: 16,
        }
    }
}

/// Worker threads and the balancer that feeds them.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    threads: Vec<JoinHandle<()>>,
    balancer: Balancer,
}

impl WorkerPool {
    /// Starts `count` worker threads.
    ///
    /// # Errors
    ///
    /// `ServerError::Io` if a reactor or thread cannot be created; workers
    /// already started are stopped first.
    pub fn spawn(
        count: usize,
        ctx: &WorkerContext,
        balance: BalanceSettings,
    ) -> Result<Self, ServerError> {
        let mut pool = Self {
            workers: Vec::with_capacity(count),
            threads: Vec::with_capacity(count),
            balancer: Balancer::new(
                balance.policy,
                balance.connection_weight,
                balance.refresh_interval,
            ),
        };
        for id in 0..count {
            if let Err(err) = pool.spawn_one(id, ctx.clone()) {
                ctx.shutdown.begin_shutdown();
                pool.join();
                return Err(err.into());
            }
        }
        info!(workers = count, policy = %balance.policy, "worker pool started");
        Ok(pool)
    }

    fn spawn_one(&mut self, id: usize, ctx: WorkerContext) -> std::io::Result<()> {
        let (worker, handle) = Worker::new(id, ctx)?;
        let thread = std::thread::Builder::new()
            .name(format!("wsengine-worker-{id}"))
            .spawn(move || worker.run())?;
        self.workers.push(handle);
        self.threads.push(thread);
        Ok(())
    }

    /// Number of workers, live or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True for a pool without workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Workers still running.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_alive()).count()
    }

    /// Handles to every worker, by index.
    #[must_use]
    pub fn handles(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Hands an accepted socket to the worker the balancer picks.
    ///
    /// A worker found dead during admission is skipped and the pick repeated.
    ///
    /// # Errors
    ///
    /// `ServerError::NoWorkers` when no worker is alive.
    pub fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<usize, ServerError> {
        let mut stream = stream;
        loop {
            let workers = &self.workers;
            let live = workers.iter().filter(|w| w.is_alive()).count();
            let Some(id) = self.balancer.choose(live, || live_samples(workers)) else {
                return Err(ServerError::NoWorkers);
            };
            match self.workers[id].admit(stream, peer) {
                Ok(()) => {
                    debug!(worker = id, peer = %peer, "connection dispatched");
                    return Ok(id);
                }
                Err(returned) => {
                    warn!(worker = id, "worker gone, re-balancing");
                    self.balancer.invalidate();
                    stream = returned.stream;
                }
            }
        }
    }

    /// Per-worker statistics and their sum.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats::from_workers(self.workers.iter().map(WorkerHandle::snapshot).collect())
    }

    /// Wakes every worker and waits for its thread to exit.
    ///
    /// Workers exit once the shared shutdown signal is set.
    pub fn join(&mut self) {
        for worker in &self.workers {
            worker.wake();
        }
        for (id, thread) in self.threads.drain(..).enumerate() {
            if thread.join().is_err() {
                warn!(worker = id, "worker thread panicked");
            }
        }
    }
}

fn live_samples(workers: &[WorkerHandle]) -> Vec<LoadSample> {
    workers
        .iter()
        .filter(|w| w.is_alive())
        .map(WorkerHandle::load)
        .collect()
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("policy", &self.balancer.policy())
            .finish_non_exhaustive()
    }
}
