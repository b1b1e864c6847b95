//! Networking protocols.
//!
//! - [`websocket`]: RFC 6455 framing, the upgrade handshake, and the
//!   per-socket connection state machine

pub mod websocket;
