#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::format::FmtSpan;
use wsengine::net::websocket::{
    find_header_end, FeedOutcome, FrameEncoder, Message, MessageParser, Opcode,
};
use wsengine::{EchoApp, Registry, Server, ServerConfig, ServerHandle};

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "WSENGINE_PROPTEST_SEED";
const PROPTEST_MAX_SHRINK_ITERS_ENV: &str = "WSENGINE_PROPTEST_MAX_SHRINK_ITERS";

/// Fixed by every test client; the server must answer with its SHA-1 digest.
pub const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
/// Accept key RFC 6455 gives for [`CLIENT_KEY`].
pub const EXPECTED_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// How long a test client waits for the server before failing.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);

    // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    if let Some(iters) = read_max_shrink_iters() {
        config.max_shrink_iters = iters;
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }

    // If CI is set and no explicit seed is provided, use a fixed seed.
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }

    None
}

fn read_max_shrink_iters() -> Option<u32> {
    std::env::var(PROPTEST_MAX_SHRINK_ITERS_ENV)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
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

/// A loopback config: ephemeral port, small pool, fast polling.
#[must_use]
pub fn loopback_config(workers: usize) -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1:0".parse().expect("loopback address"),
        workers,
        poll_timeout: Duration::from_millis(10),
        ..ServerConfig::default()
    }
}

/// Starts `config` with [`EchoApp`] on `/echo`.
pub fn start_echo_server(config: ServerConfig) -> ServerHandle {
    let mut registry = Registry::new();
    registry.register("/echo", Arc::new(EchoApp));
    Server::new(config, Arc::new(registry))
        .start()
        .expect("server starts")
}

/// The bytes of an upgrade request for `path`.
#[must_use]
pub fn upgrade_request(path: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {CLIENT_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
    .into_bytes()
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Blocking WebSocket client for exercising a server over loopback.
pub struct TestClient {
    stream: TcpStream,
    encoder: FrameEncoder,
    parser: MessageParser,
    buf: Vec<u8>,
    cursor: usize,
}

impl TestClient {
    /// Connects without sending anything.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            encoder: FrameEncoder::client(),
            parser: MessageParser::client(MessageParser::DEFAULT_MAX_MESSAGE_SIZE),
            buf: Vec::new(),
            cursor: 0,
        })
    }

    /// Sends an upgrade for `path` and returns the response head.
    pub fn handshake(&mut self, path: &str) -> io::Result<String> {
        self.stream.write_all(&upgrade_request(path))?;
        self.read_head()
    }

    /// Connects and upgrades; panics unless the server answers 101.
    pub fn open(addr: SocketAddr, path: &str) -> Self {
        let mut client = Self::connect(addr).expect("connect");
        let head = client.handshake(path).expect("handshake response");
        assert!(
            head.starts_with("HTTP/1.1 101"),
            "expected 101 Switching Protocols, got {head:?}"
        );
        client
    }

    /// Reads until the end of an HTTP response head; keeps any bytes after it.
    pub fn read_head(&mut self) -> io::Result<String> {
        loop {
            if let Some(end) = find_header_end(&self.buf) {
                let head = String::from_utf8_lossy(&self.buf[..end]).into_owned();
                self.buf.drain(..end);
                return Ok(head);
            }
            if self.fill()? == 0 {
                return Ok(String::from_utf8_lossy(&self.buf).into_owned());
            }
        }
    }

    /// Writes raw bytes.
    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    /// Sends one masked message.
    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> io::Result<()> {
        let bytes = self
            .encoder
            .encode(opcode, payload)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        self.stream.write_all(&bytes)
    }

    /// Reads the next whole message.
    pub fn recv(&mut self) -> io::Result<Message> {
        loop {
            let feed = self.parser.feed(&self.buf, self.cursor);
            self.cursor = feed.cursor;
            match feed.outcome {
                FeedOutcome::MessageReady => {
                    let message = self.parser.take_message();
                    self.compact();
                    return message.ok_or_else(|| io::ErrorKind::InvalidData.into());
                }
                FeedOutcome::ProtocolError(code) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("server broke the protocol: {code}"),
                    ));
                }
                FeedOutcome::NeedMoreData => {
                    self.compact();
                    if self.fill()? == 0 {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                }
            }
        }
    }

    /// Reads until the server closes the socket. Returns whether it did.
    pub fn wait_eof(&mut self) -> bool {
        let mut scratch = [0u8; 1024];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    }

    fn compact(&mut self) {
        self.buf.drain(..self.cursor);
        self.cursor = 0;
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}
