//! Server lifecycle: listener, balancer, and I/O workers.
//!
//! - [`Server`] validates a [`ServerConfig`], binds, and starts the threads
//! - [`WorkerPool`] owns the worker threads and a [`Balancer`]
//! - [`Worker`] multiplexes its connections over one reactor
//! - [`ShutdownSignal`] stops every thread cooperatively
//!
//! # Architecture
//!
//! ```text
//! listener thread ──accept──► Balancer ──admit──► inbound queue ─┐
//!                                 ▲                              ▼
//!                                 └──── WorkerStats ◄──── worker thread × N
//!                                                         (reactor + connections)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wsengine::app::{EchoApp, Registry};
//! use wsengine::config::ServerConfig;
//! use wsengine::server::Server;
//!
//! let mut registry = Registry::new();
//! registry.register("/echo", Arc::new(EchoApp));
//! let handle = Server::new(ServerConfig::default(), Arc::new(registry)).start()?;
//! println!("listening on {}", handle.local_addr());
//! handle.wait()?;
//! # Ok::<(), wsengine::error::ServerError>(())
//! ```

pub mod balancer;
mod listener;
pub mod pool;
pub mod shutdown;
pub mod stats;
pub mod worker;

pub use balancer::{pick_greedy, BalancePolicy, Balancer, LoadSample};
pub use pool::{BalanceSettings, WorkerPool};
pub use shutdown::{ShutdownPhase, ShutdownSignal};
pub use stats::{PoolStats, StatsSnapshot, WorkerStats};
pub use worker::{Accepted, Worker, WorkerContext, WorkerHandle};

use crate::app::AppRegistry;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::runtime::reactor::{PollReactor, Reactor};
use crate::tracing_compat::{info, warn};
use listener::Listener;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A configured, not yet started server.
pub struct Server {
    config: ServerConfig,
    registry: Arc<dyn AppRegistry>,
}

impl Server {
    /// A server for `config` routing upgrades through `registry`.
    #[must_use]
    pub fn new(config: ServerConfig, registry: Arc<dyn AppRegistry>) -> Self {
        Self { config, registry }
    }

    /// The configuration the server will start with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Validates the configuration, binds, and starts the listener and workers.
    ///
    /// # Errors
    ///
    /// An invalid configuration, unusable TLS files, a bind failure, or a
    /// reactor or thread that cannot be created.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let config = self.config;
        config.validate()?;

        let shutdown = ShutdownSignal::new();
        let ctx = WorkerContext {
            registry: self.registry,
            settings: config.connection_settings(),
            max_connections: config.max_connections,
            poll_timeout: config.poll_timeout,
            inbound_capacity: config.inbound_queue_capacity,
            shutdown: shutdown.clone(),
            #[cfg(feature = "tls")]
            tls: tls_acceptor(&config)?,
        };
        #[cfg(not(feature = "tls"))]
        if config.tls.is_some() {
            return Err(crate::error::ConfigError::invalid(
                "tls",
                "built without the tls feature",
            )
            .into());
        }

        let listener = TcpListener::bind(config.bind).map_err(|source| ServerError::Bind {
            addr: config.bind,
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let reactor = Arc::new(PollReactor::new()?);

        let pool = WorkerPool::spawn(config.workers, &ctx, config.balance_settings())?;
        let workers = pool.handles().to_vec();
        let task = Listener {
            listener,
            reactor: Arc::clone(&reactor),
            pool,
            shutdown: shutdown.clone(),
            poll_timeout: config.poll_timeout,
        };
        let thread = std::thread::Builder::new()
            .name("wsengine-listener".into())
            .spawn(move || task.run())?;

        info!(
            addr = %local_addr,
            workers = config.workers,
            tls = config.tls.is_some(),
            policy = %config.balance_policy,
            "server listening"
        );
        Ok(ServerHandle {
            local_addr,
            shutdown,
            workers,
            reactor,
            thread: Some(thread),
        })
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
fn tls_acceptor(config: &ServerConfig) -> Result<Option<crate::tls::TlsAcceptor>, ServerError> {
    let Some(tls) = &config.tls else {
        return Ok(None);
    };
    let acceptor = crate::tls::TlsAcceptor::from_pem_files(&tls.cert_path, &tls.key_path)?;
    Ok(Some(acceptor))
}

/// A running server.
///
/// Dropping the handle shuts the server down and waits for its threads.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    workers: Vec<WorkerHandle>,
    reactor: Arc<PollReactor>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    /// The bound address, with the real port when binding to port 0.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared shutdown signal.
    #[must_use]
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Handles to every worker, by index.
    #[must_use]
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Per-worker statistics and their sum.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats::from_workers(self.workers.iter().map(WorkerHandle::snapshot).collect())
    }

    /// Stops accepting, closes every connection, and waits for all threads.
    ///
    /// # Errors
    ///
    /// The listener's failure, if it stopped on its own before this call.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.stop();
        self.join()
    }

    /// Blocks until the server stops.
    ///
    /// # Errors
    ///
    /// The error that stopped the listener.
    pub fn wait(mut self) -> Result<(), ServerError> {
        self.join()
    }

    fn stop(&self) {
        if self.shutdown.begin_shutdown() {
            info!(addr = %self.local_addr, "shutdown requested");
        }
        if let Err(err) = self.reactor.wake() {
            warn!(error = %err, "failed to wake listener");
        }
    }

    fn join(&mut self) -> Result<(), ServerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServerError::ListenerPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
            let _ = self.join();
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("phase", &self.shutdown.phase())
            .field("workers", &self.workers.len())
            .finish()
    }
}
