//! wsengine: a sharded, reactor-driven WebSocket server engine.
//!
//! # Overview
//!
//! One listener thread accepts TCP (optionally TLS) sockets and a load
//! balancer hands each to one of N I/O worker threads. Every worker owns a
//! readiness reactor and drives all of its connections from that single
//! thread: no connection state is ever shared between workers.
//!
//! Each connection walks `TlsHandshake → Handshake → Messaging → Closed`.
//! Upgraded connections decode client frames with a resumable RFC 6455
//! parser that accepts input split at any byte boundary, and deliver whole
//! messages to the [`Application`](app::Application) registered for the
//! request path.
//!
//! # Module Structure
//!
//! - [`app`]: application trait, path registry, and an echo handler
//! - [`config`]: server configuration, TOML and environment loading
//! - [`error`]: configuration and startup errors
//! - [`net`]: RFC 6455 codec, upgrade handshake, connection state machine
//! - [`runtime`]: readiness reactor
//! - [`server`]: listener, balancer, worker pool, shutdown
//! - [`channel`]: bounded inbound queue between listener and workers
//! - `tls`: rustls transport (feature `tls`)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wsengine::{EchoApp, Registry, Server, ServerConfig};
//!
//! let mut registry = Registry::new();
//! registry.register("/echo", Arc::new(EchoApp));
//!
//! let config = ServerConfig {
//!     bind: "127.0.0.1:9001".parse()?,
//!     ..ServerConfig::default()
//! };
//! let handle = Server::new(config, Arc::new(registry)).start()?;
//! handle.wait()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod app;
pub mod channel;
pub mod config;
pub mod error;
pub mod net;
pub mod runtime;
pub mod server;
#[cfg(feature = "tls")]
pub mod tls;
pub mod tracing_compat;

#[cfg(test)]
pub(crate) mod test_utils;

pub use app::{AppRegistry, Application, EchoApp, Registry};
pub use config::{ServerConfig, TlsConfig};
pub use error::{ConfigError, Result, ServerError};
pub use server::{PoolStats, Server, ServerHandle, ShutdownSignal};
