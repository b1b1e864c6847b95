//! Shared server TLS configuration.

use super::error::TlsError;
use super::stream::TlsSocket;
use super::types::{CertificateChain, PrivateKey};
use crate::tracing_compat::debug;

use rustls::crypto::ring::default_provider;
use rustls::{ServerConfig, ServerConnection};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

/// Starts TLS sessions on accepted sockets.
///
/// Built once at server start and cloned into every worker; clones share one
/// rustls configuration.
///
/// ```ignore
/// let acceptor = TlsAcceptor::from_pem_files("cert.pem", "key.pem")?;
/// let socket = acceptor.accept(tcp_stream)?;
/// ```
#[derive(Clone)]
pub struct TlsAcceptor {
    config: Arc<ServerConfig>,
}

impl TlsAcceptor {
    /// Loads a PEM certificate chain and private key.
    ///
    /// # Errors
    ///
    /// `TlsError::Certificate` for unreadable or empty files,
    /// `TlsError::Rustls` when the key does not match the certificate.
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, TlsError> {
        let chain = CertificateChain::from_pem_file(cert_path)?;
        let key = PrivateKey::from_pem_file(key_path)?;
        Self::from_parts(chain, key)
    }

    /// Builds from an already loaded chain and key, TLS 1.2 and 1.3, no
    /// client authentication.
    ///
    /// # Errors
    ///
    /// `TlsError::Rustls` when rustls rejects the pair.
    pub fn from_parts(chain: CertificateChain, key: PrivateKey) -> Result<Self, TlsError> {
        let certs = chain.len();
        let config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain.into_inner(), key.clone_inner())?;
        debug!(certs, "tls acceptor ready");
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Starts a server session over `stream`.
    ///
    /// The handshake itself is driven by the owning connection as readiness
    /// events arrive.
    ///
    /// # Errors
    ///
    /// The session cannot be created or the socket cannot be made
    /// non-blocking.
    pub fn accept(&self, stream: TcpStream) -> Result<TlsSocket, TlsError> {
        let conn = ServerConnection::new(Arc::clone(&self.config))?;
        Ok(TlsSocket::new(stream, conn)?)
    }
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor").finish_non_exhaustive()
    }
}
