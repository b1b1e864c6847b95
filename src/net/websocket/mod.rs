//! WebSocket protocol engine (RFC 6455), server side.
//!
//! # Architecture
//!
//! - `frame`: wire format, opcodes, close codes, and the frame encoder
//! - `parser`: resumable message parser fed from arbitrary buffer splits
//! - `handshake`: HTTP upgrade request parsing and the 101/403 responses
//! - `close`: close payloads and the close-echo rule
//! - `transport`: the non-blocking byte stream a connection runs over
//! - `connection`: the per-connection state machine
//!
//! # Example
//!
//! ```
//! use wsengine::net::websocket::{FeedOutcome, Frame, FrameEncoder, MessageParser, Opcode};
//!
//! let mut wire = Vec::new();
//! FrameEncoder::client()
//!     .encode_frame(&Frame::text("hello").masked_with([1, 2, 3, 4]), &mut wire)
//!     .unwrap();
//!
//! let mut parser = MessageParser::server(1024);
//! let first = parser.feed(&wire[..3], 0);
//! assert_eq!(first.outcome, FeedOutcome::NeedMoreData);
//! let rest = &wire[3..];
//! let second = parser.feed(rest, 0);
//! assert_eq!(second.outcome, FeedOutcome::MessageReady);
//! let message = parser.take_message().unwrap();
//! assert_eq!(message.opcode, Opcode::Text);
//! assert_eq!(message.as_text(), Some("hello"));
//! ```

mod close;
mod connection;
mod frame;
mod handshake;
mod parser;
mod transport;

pub use close::{
    close_code_from_u16, encode_payload, is_valid_code, reply_code, CloseReason, CloseState,
};
pub use connection::{
    Connection, ConnectionError, ConnectionHandle, ConnectionSettings, ConnectionState, NoStats,
    StatsSink,
};
pub use frame::{
    apply_mask, header_len, CloseCode, Frame, FrameEncoder, Opcode, Role, WsError,
    DEFAULT_FRAGMENT_SIZE, MAX_CONTROL_PAYLOAD,
};
pub use handshake::{
    compute_accept_key, find_header_end, AcceptResponse, HandshakeError, HttpRequest,
    ServerHandshake, MAX_REQUEST_HEADER_SIZE,
};
pub use parser::{Feed, FeedOutcome, FrameSeq, Message, MessageParser};
pub use transport::{HandshakeProgress, IoStatus, PlaintextSocket, Transport};

pub(crate) use transport::nonblocking;
