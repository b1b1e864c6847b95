//! TLS transport via rustls.
//!
//! Enabled by the `tls` feature (on by default). A [`TlsAcceptor`] is built
//! once from PEM files and turns each accepted TCP socket into a
//! [`TlsSocket`], which implements
//! [`Transport`](crate::net::websocket::Transport) so the connection state
//! machine is unaware of encryption.

mod acceptor;
mod error;
mod stream;
mod types;

pub use acceptor::TlsAcceptor;
pub use error::TlsError;
pub use stream::TlsSocket;
pub use types::{Certificate, CertificateChain, PrivateKey};
