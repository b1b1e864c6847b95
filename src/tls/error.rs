//! Errors setting up TLS termination.

use std::fmt;
use std::io;

/// Why a [`TlsAcceptor`](super::TlsAcceptor) could not be built or a
/// session could not be started.
#[derive(Debug)]
pub enum TlsError {
    /// A certificate or key file was unreadable or held nothing usable.
    Certificate(String),
    /// rustls refused the certificate/key pair or the session parameters.
    Rustls(rustls::Error),
    /// The accepted socket could not be prepared.
    Io(io::Error),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Certificate(msg) => write!(f, "certificate error: {msg}"),
            Self::Rustls(err) => write!(f, "rustls rejected the configuration: {err}"),
            Self::Io(err) => write!(f, "socket setup failed: {err}"),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Rustls(err) => Some(err),
            Self::Certificate(_) => None,
        }
    }
}

impl From<io::Error> for TlsError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        Self::Rustls(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn certificate_errors_have_no_source() {
        let err = TlsError::Certificate("no certificates found in PEM".into());
        assert_eq!(err.to_string(), "certificate error: no certificates found in PEM");
        assert!(err.source().is_none());
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = TlsError::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_string(), "socket setup failed: boom");
        assert!(err.source().is_some());
    }
}
