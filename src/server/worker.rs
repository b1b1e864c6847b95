//! I/O worker: one thread multiplexing a disjoint set of connections.
//!
//! Each iteration of the loop:
//!
//! 1. runs disconnects requested through a [`WorkerHandle`];
//! 2. takes accepted sockets off the inbound queue, refusing any beyond
//!    `max_connections` with 403;
//! 3. drops connections whose upgrade, or whose final flush after closing,
//!    outlived the handshake timeout;
//! 4. polls the reactor for at most `poll_timeout`;
//! 5. dispatches each readiness event to its connection and re-arms it.
//!
//! A failing connection is disconnected alone. A failing poll ends the
//! worker, which then reports itself dead through its statistics.

use super::balancer::LoadSample;
use super::shutdown::ShutdownSignal;
use super::stats::{StatsSnapshot, WorkerStats};
use crate::app::AppRegistry;
use crate::channel::mpsc::{self, RecvError, SendError};
use crate::net::websocket::{
    CloseCode, Connection, ConnectionHandle, ConnectionSettings, PlaintextSocket, ServerHandshake,
    StatsSink, Transport,
};
use crate::runtime::reactor::{Event, Events, Interest, PollReactor, Reactor, Token};
use crate::tracing_compat::{debug, error, info, trace, warn};

use crossbeam_queue::SegQueue;
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Events fetched per poll.
const EVENTS_CAPACITY: usize = 1024;

/// An accepted socket on its way to a worker.
#[derive(Debug)]
pub struct Accepted {
    /// The socket.
    pub stream: TcpStream,
    /// Remote address reported by `accept`.
    pub peer: SocketAddr,
}

/// Settings shared by every worker of a pool.
#[derive(Clone)]
pub struct WorkerContext {
    /// Resolves request paths to applications.
    pub registry: Arc<dyn AppRegistry>,
    /// Per-connection limits.
    pub settings: ConnectionSettings,
    /// Connections one worker serves before refusing with 403.
    pub max_connections: usize,
    /// Upper bound on one reactor wait.
    pub poll_timeout: Duration,
    /// Capacity of each worker's inbound queue.
    pub inbound_capacity: usize,
    /// Shared shutdown flag.
    pub shutdown: ShutdownSignal,
    /// Wraps accepted sockets in TLS when set.
    #[cfg(feature = "tls")]
    pub tls: Option<crate::tls::TlsAcceptor>,
}

impl WorkerContext {
    /// A context with default limits.
    #[must_use]
    pub fn new(registry: Arc<dyn AppRegistry>, shutdown: ShutdownSignal) -> Self {
        Self {
            registry,
            settings: ConnectionSettings::default(),
            max_connections: 100,
            poll_timeout: Duration::from_millis(100),
            inbound_capacity: 1024,
            shutdown,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

/// Cross-thread handle to a running worker.
///
/// Cloning is cheap; every clone talks to the same worker.
#[derive(Clone)]
pub struct WorkerHandle {
    id: usize,
    inbound: mpsc::Sender<Accepted>,
    reactor: Arc<PollReactor>,
    stats: Arc<WorkerStats>,
    disconnects: Arc<SegQueue<Token>>,
}

impl WorkerHandle {
    /// Index of the worker in its pool.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Live statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Copy of the current statistics.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Load figures the balancer compares.
    #[must_use]
    pub fn load(&self) -> LoadSample {
        LoadSample::new(
            self.id,
            self.stats.connections(),
            self.stats.event_queue_depth(),
        )
    }

    /// False once the worker thread has exited.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.stats.is_alive() && !self.inbound.is_closed()
    }

    /// Queues an accepted socket and wakes the worker.
    ///
    /// Blocks while the inbound queue is full.
    ///
    /// # Errors
    ///
    /// Gives the socket back if the worker has exited.
    pub fn admit(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), Accepted> {
        self.stats.inbound_queued();
        if let Err(err) = self.inbound.send(Accepted { stream, peer }) {
            self.stats.inbound_dequeued();
            return Err(match err {
                SendError::Disconnected(accepted) | SendError::Full(accepted) => accepted,
            });
        }
        self.wake();
        Ok(())
    }

    /// Asks the worker to disconnect `token` at the start of its next iteration.
    pub fn request_disconnect(&self, token: Token) {
        self.disconnects.push(token);
        self.wake();
    }

    /// Interrupts the worker's current poll.
    pub fn wake(&self) {
        if let Err(err) = self.reactor.wake() {
            warn!(worker = self.id, error = %err, "failed to wake worker");
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("connections", &self.stats.connections())
            .finish()
    }
}

/// The worker loop and the connections it owns.
pub struct Worker {
    id: usize,
    reactor: Arc<PollReactor>,
    inbound: mpsc::Receiver<Accepted>,
    disconnects: Arc<SegQueue<Token>>,
    stats: Arc<WorkerStats>,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    events: Events,
    ctx: WorkerContext,
}

impl Worker {
    /// Creates worker `id` and the handle used to feed it.
    ///
    /// # Errors
    ///
    /// The OS error if the reactor cannot be created.
    pub fn new(id: usize, ctx: WorkerContext) -> io::Result<(Self, WorkerHandle)> {
        let reactor = Arc::new(PollReactor::new()?);
        let (tx, rx) = mpsc::channel(ctx.inbound_capacity);
        let stats = Arc::new(WorkerStats::new());
        let disconnects = Arc::new(SegQueue::new());
        let handle = WorkerHandle {
            id,
            inbound: tx,
            reactor: Arc::clone(&reactor),
            stats: Arc::clone(&stats),
            disconnects: Arc::clone(&disconnects),
        };
        let worker = Self {
            id,
            reactor,
            inbound: rx,
            disconnects,
            stats,
            connections: HashMap::new(),
            next_token: 0,
            events: Events::with_capacity(EVENTS_CAPACITY),
            ctx,
        };
        Ok((worker, handle))
    }

    /// Runs until shutdown, the inbound queue closes, or the reactor fails.
    pub fn run(mut self) {
        info!(worker = self.id, "worker started");
        while !self.ctx.shutdown.is_shutting_down() {
            match self.turn() {
                Ok(true) => {}
                Ok(false) => {
                    debug!(worker = self.id, "inbound queue closed");
                    break;
                }
                Err(err) => {
                    error!(worker = self.id, error = %err, "reactor failed, worker exiting");
                    break;
                }
            }
        }
        self.stats.mark_dead();
        self.close_all();
        info!(worker = self.id, "worker stopped");
    }

    /// One loop iteration. Returns `Ok(false)` when no more sockets can arrive.
    fn turn(&mut self) -> io::Result<bool> {
        self.drain_disconnects();

        if self.connections.is_empty() {
            match self.inbound.recv_timeout(self.ctx.poll_timeout) {
                Ok(accepted) => self.accept(accepted),
                Err(RecvError::Disconnected) => return Ok(false),
                Err(RecvError::Empty | RecvError::Timeout) => return Ok(true),
            }
        }
        self.drain_inbound();
        self.sweep_expired(Instant::now());

        let mut events = std::mem::replace(&mut self.events, Events::with_capacity(0));
        let polled = self.reactor.poll(&mut events, Some(self.ctx.poll_timeout));
        let result = polled.map(|n| {
            self.stats.set_event_queue_depth(n);
            for event in &events {
                self.dispatch(*event);
            }
            true
        });
        self.events = events;
        result
    }

    fn drain_disconnects(&mut self) {
        while let Some(token) = self.disconnects.pop() {
            if self.connections.contains_key(&token) {
                debug!(worker = self.id, token = token.0, "disconnect requested");
                self.disconnect(token);
            }
        }
    }

    fn drain_inbound(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(accepted) => self.accept(accepted),
                Err(_) => break,
            }
        }
    }

    fn accept(&mut self, accepted: Accepted) {
        self.stats.inbound_dequeued();
        let Accepted { stream, peer } = accepted;

        if self.connections.len() >= self.ctx.max_connections {
            debug!(
                worker = self.id,
                peer = %peer,
                connections = self.connections.len(),
                "at capacity, refusing connection"
            );
            self.refuse(stream);
            return;
        }

        let transport = match self.wrap(stream) {
            Ok(transport) => transport,
            Err(err) => {
                debug!(worker = self.id, peer = %peer, error = %err, "failed to set up socket");
                return;
            }
        };
        let Some(source) = transport.raw_source() else {
            warn!(worker = self.id, peer = %peer, "transport has no OS handle");
            return;
        };

        let token = self.next_token();
        if let Err(err) = self.reactor.register(source, token, Interest::READABLE) {
            warn!(worker = self.id, peer = %peer, error = %err, "failed to register socket");
            return;
        }
        let conn = Connection::new(
            transport,
            ConnectionHandle::new(self.id, token, Some(peer)),
            Arc::clone(&self.ctx.registry),
            Arc::clone(&self.stats) as Arc<dyn StatsSink>,
            self.ctx.settings,
        );
        self.connections.insert(token, conn);
        self.stats.set_connections(self.connections.len());
        debug!(worker = self.id, peer = %peer, token = token.0, "connection accepted");
    }

    #[cfg(feature = "tls")]
    fn wrap(&self, stream: TcpStream) -> io::Result<Box<dyn Transport>> {
        match &self.ctx.tls {
            Some(acceptor) => acceptor
                .accept(stream)
                .map(|socket| Box::new(socket) as Box<dyn Transport>)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err)),
            None => Ok(Box::new(PlaintextSocket::new(stream)?)),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn wrap(&self, stream: TcpStream) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(PlaintextSocket::new(stream)?))
    }

    /// Answers an over-capacity socket with 403 and closes it.
    fn refuse(&self, mut stream: TcpStream) {
        // Over TLS there is no session to speak HTTP on; closing is the refusal.
        if !self.uses_tls() {
            if let Err(err) = stream.write_all(&ServerHandshake::forbidden()) {
                trace!(worker = self.id, error = %err, "403 not delivered");
            }
        }
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }

    #[cfg(feature = "tls")]
    fn uses_tls(&self) -> bool {
        self.ctx.tls.is_some()
    }

    #[cfg(not(feature = "tls"))]
    fn uses_tls(&self) -> bool {
        false
    }

    fn next_token(&mut self) -> Token {
        loop {
            let token = Token::new(self.next_token);
            // usize::MAX is reserved by the reactor.
            self.next_token = (self.next_token + 1) % usize::MAX;
            if !self.connections.contains_key(&token) {
                return token;
            }
        }
    }

    /// Drops connections stuck in the upgrade, or closed with output the
    /// peer never read.
    fn sweep_expired(&mut self, now: Instant) {
        let expired: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.handshake_expired(now) || conn.drain_expired(now))
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            debug!(worker = self.id, token = token.0, "connection timed out");
            self.disconnect(token);
        }
    }

    fn dispatch(&mut self, event: Event) {
        let token = event.token;
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        // Hangups and socket errors surface here as end of stream or a
        // failed write.
        let mut result = Ok(());
        if event.is_writable() {
            result = conn.on_writable();
        }
        if result.is_ok() && event.is_readable() {
            result = conn.on_readable();
        }

        match result {
            Err(err) => {
                debug!(conn = %conn.handle(), error = %err, "connection failed");
                self.disconnect(token);
            }
            Ok(()) if conn.is_closed() && !conn.wants_write() => self.disconnect(token),
            Ok(()) => {
                let interest = if !conn.wants_read() {
                    Interest::WRITABLE
                } else if conn.wants_write() {
                    Interest::both()
                } else {
                    Interest::READABLE
                };
                if let Err(err) = self.reactor.modify(token, interest) {
                    warn!(worker = self.id, token = token.0, error = %err, "re-arm failed");
                    self.disconnect(token);
                }
            }
        }
    }

    fn disconnect(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        if let Err(err) = self.reactor.deregister(token) {
            trace!(worker = self.id, token = token.0, error = %err, "deregister failed");
        }
        conn.release();
        self.stats.set_connections(self.connections.len());
        debug!(conn = %conn.handle(), "disconnected");
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.close(CloseCode::GoingAway);
            }
            self.disconnect(token);
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}
