//! One client connection: transport, codec, and lifecycle.
//!
//! ```text
//! TlsHandshake ──► Handshake ──► Messaging ──► Closed
//!  (TLS only)        │                          ▲
//!                    └──── 403 / timeout ───────┘
//! ```
//!
//! States only move forward. The owning worker calls
//! [`on_readable`](Connection::on_readable) and
//! [`on_writable`](Connection::on_writable) on readiness events and
//! disconnects the connection once it is `Closed` with nothing left to send.
//!
//! Reads pause while more than `max_pending_output` bytes wait to be sent
//! and resume once writable readiness drains the backlog. A `Closed`
//! connection gets `handshake_timeout` to flush its last frames before the
//! worker drops it.

use super::close::{reply_code, CloseState};
use super::frame::{CloseCode, Frame, FrameEncoder, Opcode, WsError, DEFAULT_FRAGMENT_SIZE};
use super::handshake::{
    find_header_end, HandshakeError, HttpRequest, ServerHandshake, MAX_REQUEST_HEADER_SIZE,
};
use super::parser::{FeedOutcome, Message, MessageParser};
use super::transport::{HandshakeProgress, IoStatus, Transport};
use crate::app::{AppRegistry, Application};
use crate::runtime::reactor::Token;
use crate::tracing_compat::{debug, trace, warn};

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bytes read from the transport per call.
const READ_CHUNK: usize = 16 * 1024;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// TLS session being negotiated.
    TlsHandshake,
    /// Waiting for the HTTP upgrade request.
    Handshake,
    /// Exchanging WebSocket messages.
    Messaging,
    /// Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TlsHandshake => "tls-handshake",
            Self::Handshake => "handshake",
            Self::Messaging => "messaging",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The peer closed the stream.
    #[error("peer closed the connection")]
    PeerClosed,
    /// A state change that would move backwards.
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },
    /// Sending outside the messaging state.
    #[error("connection is not open for messages ({0})")]
    NotOpen(ConnectionState),
    /// A frame the encoder refused.
    #[error("frame rejected: {0}")]
    Frame(#[from] WsError),
}

/// Identity of a connection as seen by applications and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    worker: usize,
    token: Token,
    peer: Option<SocketAddr>,
}

impl ConnectionHandle {
    /// A handle for connection `token` on worker `worker`.
    #[must_use]
    pub const fn new(worker: usize, token: Token, peer: Option<SocketAddr>) -> Self {
        Self {
            worker,
            token,
            peer,
        }
    }

    /// Index of the owning worker.
    #[must_use]
    pub const fn worker(&self) -> usize {
        self.worker
    }

    /// Reactor token, unique within the worker.
    #[must_use]
    pub const fn token(&self) -> Token {
        self.token
    }

    /// Remote address, when known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}#{}", self.worker, self.token.0)?;
        if let Some(peer) = self.peer {
            write!(f, "@{peer}")?;
        }
        Ok(())
    }
}

/// Receives per-message size samples.
pub trait StatsSink: Send + Sync {
    /// A data message of `size` bytes was delivered to the application.
    fn record_in(&self, size: usize);
    /// A data message of `size` bytes was queued for sending.
    fn record_out(&self, size: usize);
}

/// A sink that discards samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStats;

impl StatsSink for NoStats {
    fn record_in(&self, _size: usize) {}
    fn record_out(&self, _size: usize) {}
}

/// Per-connection limits, taken from the server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Largest accepted message, in bytes.
    pub max_message_size: usize,
    /// Payload bytes per fragment when auto-fragmenting.
    pub fragment_size: usize,
    /// Split outgoing data messages into `fragment_size` fragments.
    pub auto_fragment: bool,
    /// Time allowed from accept to a completed upgrade, and for a closed
    /// connection to flush its remaining output.
    pub handshake_timeout: Duration,
    /// Unsent bytes above which reading stops until the peer catches up.
    pub max_pending_output: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_message_size: MessageParser::DEFAULT_MAX_MESSAGE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            auto_fragment: false,
            handshake_timeout: Duration::from_secs(2),
            max_pending_output: MessageParser::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// One client connection.
pub struct Connection {
    transport: Box<dyn Transport>,
    state: ConnectionState,
    close_state: CloseState,
    parser: MessageParser,
    encoder: FrameEncoder,
    outbound: Vec<u8>,
    out_offset: usize,
    handshake_buf: Vec<u8>,
    registry: Arc<dyn AppRegistry>,
    app: Option<Arc<dyn Application>>,
    stats: Arc<dyn StatsSink>,
    handle: ConnectionHandle,
    settings: ConnectionSettings,
    accepted_at: Instant,
    closed_at: Option<Instant>,
    read_paused: bool,
    opened: bool,
    released: bool,
}

impl Connection {
    /// Wraps an accepted transport.
    ///
    /// TLS transports start in `TlsHandshake`, plaintext ones in `Handshake`.
    pub fn new(
        transport: Box<dyn Transport>,
        handle: ConnectionHandle,
        registry: Arc<dyn AppRegistry>,
        stats: Arc<dyn StatsSink>,
        settings: ConnectionSettings,
    ) -> Self {
        let state = if transport.is_handshaking() {
            ConnectionState::TlsHandshake
        } else {
            ConnectionState::Handshake
        };
        Self {
            transport,
            state,
            close_state: CloseState::Open,
            parser: MessageParser::server(settings.max_message_size),
            encoder: FrameEncoder::server(),
            outbound: Vec::new(),
            out_offset: 0,
            handshake_buf: Vec::new(),
            registry,
            app: None,
            stats,
            handle,
            settings,
            accepted_at: Instant::now(),
            closed_at: None,
            read_paused: false,
            opened: false,
            released: false,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Progress of the close handshake.
    #[must_use]
    pub const fn close_state(&self) -> CloseState {
        self.close_state
    }

    /// Identity of this connection.
    #[must_use]
    pub const fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// True once the connection reached `Closed`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// True while output is waiting for writable readiness.
    #[must_use]
    pub fn wants_write(&self) -> bool {
        self.out_offset < self.outbound.len() || self.transport.has_pending_output()
    }

    /// Bytes queued but not yet accepted by the transport.
    #[must_use]
    pub fn pending_output(&self) -> usize {
        self.outbound.len() - self.out_offset
    }

    /// False while reads are paused on an output backlog, and once closed.
    #[must_use]
    pub fn wants_read(&self) -> bool {
        self.state != ConnectionState::Closed && !self.read_paused
    }

    /// True if the upgrade has not completed within the handshake timeout.
    #[must_use]
    pub fn handshake_expired(&self, now: Instant) -> bool {
        self.state < ConnectionState::Messaging
            && now.saturating_duration_since(self.accepted_at) > self.settings.handshake_timeout
    }

    /// True if the connection closed more than `handshake_timeout` ago and
    /// its output still has not drained.
    #[must_use]
    pub fn drain_expired(&self, now: Instant) -> bool {
        self.closed_at.is_some_and(|closed_at| {
            now.saturating_duration_since(closed_at) > self.settings.handshake_timeout
        })
    }

    /// Moves to `next`, refusing to move backwards.
    ///
    /// # Errors
    ///
    /// `ConnectionError::InvalidTransition` when `next` precedes the current state.
    pub fn set_state(&mut self, next: ConnectionState) -> Result<(), ConnectionError> {
        if next < self.state {
            warn!(
                conn = %self.handle,
                from = %self.state,
                to = %next,
                "rejected connection state regression"
            );
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if next != self.state {
            trace!(conn = %self.handle, from = %self.state, to = %next, "connection state");
            self.state = next;
            if next == ConnectionState::Closed {
                self.closed_at = Some(Instant::now());
            }
        }
        Ok(())
    }

    /// Handles readable readiness.
    ///
    /// # Errors
    ///
    /// Transport failures and end of stream; the caller disconnects.
    pub fn on_readable(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.state {
                ConnectionState::TlsHandshake => match self.transport.drive_handshake()? {
                    HandshakeProgress::Pending => return Ok(()),
                    HandshakeProgress::Complete => self.set_state(ConnectionState::Handshake)?,
                },
                ConnectionState::Handshake => return self.read_handshake(),
                ConnectionState::Messaging => return self.read_messages(),
                ConnectionState::Closed => return Ok(()),
            }
        }
    }

    /// Handles writable readiness by flushing buffered output, resuming
    /// paused reads once the backlog is back under `max_pending_output`.
    ///
    /// # Errors
    ///
    /// Transport failures; the caller disconnects.
    pub fn on_writable(&mut self) -> Result<(), ConnectionError> {
        self.flush()?;
        if self.read_paused && !self.backlogged() {
            self.read_paused = false;
            trace!(conn = %self.handle, "output drained, resuming reads");
            return self.read_messages();
        }
        Ok(())
    }

    /// Sends one message, fragmenting data messages when auto-fragmentation is on.
    ///
    /// Output the socket cannot take right away stays buffered until the
    /// next writable event.
    ///
    /// # Errors
    ///
    /// `NotOpen` outside `Messaging`, `Frame` for an invalid control frame,
    /// or a transport failure.
    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Messaging {
            return Err(ConnectionError::NotOpen(self.state));
        }
        if self.settings.auto_fragment && opcode.is_data() {
            for frame in
                self.encoder
                    .encode_fragmented(opcode, payload, self.settings.fragment_size)?
            {
                self.outbound.extend_from_slice(&frame);
            }
        } else {
            self.encoder
                .encode_frame(&Frame::new(opcode, payload), &mut self.outbound)?;
        }
        if opcode.is_data() {
            self.stats.record_out(payload.len());
        }
        self.flush()
    }

    /// Starts a server-side close with `code`.
    ///
    /// Outside `Messaging` the connection simply moves to `Closed`.
    pub fn close(&mut self, code: CloseCode) {
        if self.state == ConnectionState::Messaging {
            self.queue_close(code.as_u16());
            self.close_state = CloseState::CloseSent;
        }
        // Closed is the last state; the transition cannot fail.
        let _ = self.set_state(ConnectionState::Closed);
        if let Err(err) = self.flush() {
            debug!(conn = %self.handle, error = %err, "flush during close failed");
        }
    }

    /// Releases the transport and notifies the application. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.state = ConnectionState::Closed;
        if let Some(app) = self.app.take() {
            if self.opened {
                app.on_close(&self.handle);
            }
        }
        self.transport.close();
    }

    fn read_handshake(&mut self) -> Result<(), ConnectionError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = match self.transport.read(&mut buf)? {
                IoStatus::WouldBlock => return self.flush(),
                IoStatus::Ready(0) => return Err(ConnectionError::PeerClosed),
                IoStatus::Ready(n) => n,
            };
            self.handshake_buf.extend_from_slice(&buf[..n]);

            let Some(end) = find_header_end(&self.handshake_buf) else {
                if self.handshake_buf.len() > MAX_REQUEST_HEADER_SIZE {
                    let err = HandshakeError::HeaderTooLarge(MAX_REQUEST_HEADER_SIZE);
                    return self.reject(&err);
                }
                continue;
            };

            let leftover = self.handshake_buf.split_off(end);
            let request = std::mem::take(&mut self.handshake_buf);
            match self.accept_upgrade(&request) {
                Ok(response) => {
                    self.outbound.extend_from_slice(&response);
                    self.set_state(ConnectionState::Messaging)?;
                    self.opened = true;
                    debug!(conn = %self.handle, "websocket upgrade accepted");
                    if let Some(app) = self.app.clone() {
                        app.on_open(&self.handle);
                    }
                    if !leftover.is_empty() {
                        self.process_bytes(&leftover)?;
                    }
                    return self.read_messages();
                }
                Err(err) => return self.reject(&err),
            }
        }
    }

    fn accept_upgrade(&mut self, raw: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let request = HttpRequest::parse(raw)?;
        let app = self
            .registry
            .find(&request.path)
            .ok_or_else(|| HandshakeError::UnknownPath(request.path.clone()))?;
        let mut handshake = ServerHandshake::new();
        if let Some(protocol) = app.protocol() {
            handshake = handshake.protocol(protocol);
        }
        let response = handshake.accept(&request)?;
        trace!(conn = %self.handle, app = app.name(), path = %request.path, "route resolved");
        self.app = Some(app);
        Ok(response.response_bytes())
    }

    fn reject(&mut self, err: &HandshakeError) -> Result<(), ConnectionError> {
        debug!(conn = %self.handle, error = %err, "websocket upgrade refused");
        self.handshake_buf.clear();
        self.outbound.extend_from_slice(&ServerHandshake::forbidden());
        self.set_state(ConnectionState::Closed)?;
        self.flush()
    }

    fn read_messages(&mut self) -> Result<(), ConnectionError> {
        let mut buf = [0u8; READ_CHUNK];
        while self.state == ConnectionState::Messaging {
            if self.backlogged() {
                self.flush()?;
                if self.backlogged() {
                    if !self.read_paused {
                        debug!(
                            conn = %self.handle,
                            pending = self.pending_output(),
                            "output backlog, pausing reads"
                        );
                    }
                    self.read_paused = true;
                    return Ok(());
                }
            }
            self.read_paused = false;
            match self.transport.read(&mut buf)? {
                IoStatus::WouldBlock => break,
                IoStatus::Ready(0) => return Err(ConnectionError::PeerClosed),
                IoStatus::Ready(n) => self.process_bytes(&buf[..n])?,
            }
        }
        self.flush()
    }

    /// Feeds `bytes` through the parser, dispatching each whole message.
    fn process_bytes(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let mut cursor = 0;
        while self.state == ConnectionState::Messaging {
            let feed = self.parser.feed(bytes, cursor);
            cursor = feed.cursor;
            match feed.outcome {
                FeedOutcome::NeedMoreData => break,
                FeedOutcome::MessageReady => {
                    if let Some(message) = self.parser.take_message() {
                        self.dispatch(message)?;
                    }
                }
                FeedOutcome::ProtocolError(code) => {
                    warn!(
                        conn = %self.handle,
                        code = code.as_u16(),
                        violation = ?self.parser.violation(),
                        "protocol violation, failing connection"
                    );
                    self.queue_close(code.as_u16());
                    self.close_state = CloseState::CloseSent;
                    self.set_state(ConnectionState::Closed)?;
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, message: Message) -> Result<(), ConnectionError> {
        match message.opcode {
            Opcode::Text | Opcode::Binary => {
                self.stats.record_in(message.len());
                let Some(app) = self.app.clone() else {
                    return Ok(());
                };
                if let Some(reply) = app.on_message(&self.handle, message) {
                    self.send(reply.opcode, &reply.payload)?;
                }
            }
            Opcode::Ping => {
                trace!(conn = %self.handle, len = message.len(), "ping");
                self.encoder
                    .encode_frame(&Frame::pong(message.payload), &mut self.outbound)?;
            }
            Opcode::Pong => trace!(conn = %self.handle, "pong ignored"),
            Opcode::Close => {
                let code = reply_code(&message.payload);
                debug!(conn = %self.handle, code, "peer closed, echoing close");
                self.queue_close(code);
                self.close_state = CloseState::Closed;
                self.set_state(ConnectionState::Closed)?;
            }
            Opcode::Continuation => {}
        }
        Ok(())
    }

    fn backlogged(&self) -> bool {
        self.pending_output() > self.settings.max_pending_output
    }

    fn queue_close(&mut self, code: u16) {
        // A two-byte payload is always a valid control frame.
        let _ = self
            .encoder
            .encode_frame(&Frame::close(Some(code), None), &mut self.outbound);
    }

    fn flush(&mut self) -> Result<(), ConnectionError> {
        while self.out_offset < self.outbound.len() {
            match self.transport.write(&self.outbound[self.out_offset..])? {
                IoStatus::Ready(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "socket accepted no bytes")
                        .into())
                }
                IoStatus::Ready(n) => self.out_offset += n,
                IoStatus::WouldBlock => {
                    if self.out_offset > self.outbound.len() / 2 {
                        self.outbound.drain(..self.out_offset);
                        self.out_offset = 0;
                    }
                    return Ok(());
                }
            }
        }
        self.outbound.clear();
        self.out_offset = 0;
        if self.transport.has_pending_output() {
            self.transport.flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("close_state", &self.close_state)
            .field("pending_out", &self.pending_output())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}
