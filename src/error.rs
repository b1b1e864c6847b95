//! Errors for configuration and server startup.
//!
//! Protocol-level failures never surface here: they end as a CLOSE frame on
//! the offending connection (see [`WsError`](crate::net::websocket::WsError)).
//! What remains are the errors an embedding program must handle: a bad
//! configuration, a socket that cannot be bound, or a pool with no workers.

use std::io;
use std::path::PathBuf;

/// An invalid or unreadable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// The value found.
        value: String,
        /// What was expected.
        expected: &'static str,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[cfg(feature = "config-file")]
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures starting or running a server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: std::net::SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS could not be set up from the configured files.
    #[cfg(feature = "tls")]
    #[error("TLS setup failed: {0}")]
    Tls(#[from] crate::tls::TlsError),

    /// Every worker has exited.
    #[error("no live workers")]
    NoWorkers,

    /// The listener thread panicked.
    #[error("listener thread panicked")]
    ListenerPanicked,
}

/// Result alias for server operations.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_field() {
        let err = ConfigError::invalid("workers", "must be at least 1");
        assert_eq!(err.to_string(), "invalid workers: must be at least 1");

        let err = ConfigError::Env {
            var: "WSENGINE_WORKERS",
            value: "many".into(),
            expected: "unsigned integer",
        };
        assert_eq!(
            err.to_string(),
            "invalid value for WSENGINE_WORKERS: expected unsigned integer, got \"many\""
        );
    }

    #[test]
    fn config_error_is_transparent_in_server_error() {
        let err: ServerError = ConfigError::invalid("fragment_size", "must be positive").into();
        assert_eq!(err.to_string(), "invalid fragment_size: must be positive");
        assert!(matches!(err, ServerError::Config(_)));
    }
}
