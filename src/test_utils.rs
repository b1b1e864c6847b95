//! Test utilities for wsengine.
//!
//! This module provides shared helpers for unit tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - An in-memory [`Transport`] for driving a connection without sockets
//!
//! # Example
//! ```ignore
//! use crate::test_utils::{init_test_logging, MockTransport};
//!
//! init_test_logging();
//! let (transport, peer) = MockTransport::new();
//! peer.push(b"GET / HTTP/1.1\r\n".to_vec());
//! ```

use crate::net::websocket::{IoStatus, Transport};
use crate::runtime::reactor::RawSource;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

#[derive(Debug, Default)]
struct Wire {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    eof: bool,
    closed: bool,
    // Bytes the transport still accepts before reporting WouldBlock.
    write_budget: Option<usize>,
}

/// In-memory transport. Reads drain what the [`MockPeer`] pushed; writes
/// land in a buffer the peer can take.
#[derive(Debug)]
pub struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

/// The test's side of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockPeer {
    wire: Arc<Mutex<Wire>>,
}

impl MockTransport {
    /// A connected transport and its peer.
    #[must_use]
    pub fn new() -> (Self, MockPeer) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        (
            Self {
                wire: Arc::clone(&wire),
            },
            MockPeer { wire },
        )
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        let mut wire = self.wire.lock();
        let Some(mut chunk) = wire.inbound.pop_front() else {
            return Ok(if wire.eof {
                IoStatus::Ready(0)
            } else {
                IoStatus::WouldBlock
            });
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            wire.inbound.push_front(chunk.split_off(n));
        }
        Ok(IoStatus::Ready(n))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        let mut wire = self.wire.lock();
        if wire.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = match wire.write_budget {
            Some(0) => return Ok(IoStatus::WouldBlock),
            Some(budget) => {
                let n = budget.min(buf.len());
                wire.write_budget = Some(budget - n);
                n
            }
            None => buf.len(),
        };
        wire.written.extend_from_slice(&buf[..n]);
        Ok(IoStatus::Ready(n))
    }

    fn close(&mut self) {
        self.wire.lock().closed = true;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn raw_source(&self) -> Option<RawSource> {
        None
    }
}

impl MockPeer {
    /// Queues bytes for the transport to read, as one chunk.
    pub fn push(&self, bytes: Vec<u8>) {
        self.wire.lock().inbound.push_back(bytes);
    }

    /// Everything written so far, leaving the buffer empty.
    #[must_use]
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.wire.lock().written)
    }

    /// A copy of everything written so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.wire.lock().written.clone()
    }

    /// Caps the bytes the transport accepts before writes would block.
    /// `None` removes the cap.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.wire.lock().write_budget = limit;
    }

    /// Ends the input stream once queued chunks are read.
    pub fn close_input(&self) {
        self.wire.lock().eof = true;
    }

    /// Whether the transport was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.wire.lock().closed
    }
}
