//! Server configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `bind` | `0.0.0.0:5080` |
//! | `workers` | 3 |
//! | `max_connections` | 100 per worker |
//! | `max_message_size` | 16 MiB |
//! | `fragment_size` | 1400 |
//! | `auto_fragment` | false |
//! | `handshake_timeout` | 2 s |
//! | `poll_timeout` | 100 ms |
//! | `connection_weight` | 0.7 |
//! | `balance_policy` | greedy |
//! | `snapshot_refresh_interval` | 16 admissions |
//! | `inbound_queue_capacity` | 1024 |
//! | `tls` | `None` |
//!
//! # Precedence
//!
//! [`ServerConfig::load`] starts from the defaults, applies the TOML file
//! (with the `config-file` feature), then `WSENGINE_*` environment
//! variables. Values set on the returned struct afterwards win over all three.

pub mod env;

pub use crate::server::BalancePolicy;
pub use env::apply_env_overrides;
#[cfg(feature = "config-file")]
pub use env::{apply_toml_config, parse_toml_file, parse_toml_str, ServerTomlConfig};

use crate::error::ConfigError;
use crate::net::websocket::{ConnectionSettings, MessageParser, DEFAULT_FRAGMENT_SIZE};
use crate::server::BalanceSettings;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Certificate and key for TLS termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

impl TlsConfig {
    /// TLS from the given PEM files.
    #[must_use]
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

/// Everything the server needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listening address.
    pub bind: SocketAddr,
    /// Worker threads.
    pub workers: usize,
    /// Connections per worker before new ones are refused with 403.
    pub max_connections: usize,
    /// Largest accepted message, in bytes.
    pub max_message_size: usize,
    /// Payload bytes per fragment when auto-fragmenting.
    pub fragment_size: usize,
    /// Fragment outgoing data messages.
    pub auto_fragment: bool,
    /// Time allowed from accept to a completed upgrade.
    pub handshake_timeout: Duration,
    /// Upper bound on one reactor wait.
    pub poll_timeout: Duration,
    /// Weight applied to candidate connection counts by the greedy balancer.
    pub connection_weight: f64,
    /// Worker selection policy.
    pub balance_policy: BalancePolicy,
    /// Admissions between balancer snapshot refreshes.
    pub snapshot_refresh_interval: usize,
    /// Capacity of each worker's inbound queue.
    pub inbound_queue_capacity: usize,
    /// TLS termination, off when `None`.
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 5080)),
            workers: 3,
            max_connections: 100,
            max_message_size: MessageParser::DEFAULT_MAX_MESSAGE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            auto_fragment: false,
            handshake_timeout: Duration::from_secs(2),
            poll_timeout: Duration::from_millis(100),
            connection_weight: 0.7,
            balance_policy: BalancePolicy::Greedy,
            snapshot_refresh_interval: 16,
            inbound_queue_capacity: 1024,
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the optional TOML file, then the environment.
    ///
    /// # Errors
    ///
    /// An unreadable or unparseable file, or a malformed variable. A file
    /// path without the `config-file` feature is also an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.apply_file(path)?;
        }
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    #[cfg(feature = "config-file")]
    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let toml = parse_toml_file(path)?;
        apply_toml_config(self, &toml);
        Ok(())
    }

    #[cfg(not(feature = "config-file"))]
    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        Err(ConfigError::Read {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "built without the config-file feature",
            ),
        })
    }

    /// Checks the values the server cannot run with.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid("max_connections", "must be at least 1"));
        }
        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "inbound_queue_capacity",
                "must be at least 1",
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::invalid("max_message_size", "must be positive"));
        }
        if self.fragment_size == 0 {
            return Err(ConfigError::invalid("fragment_size", "must be positive"));
        }
        if !(self.connection_weight.is_finite() && self.connection_weight > 0.0) {
            return Err(ConfigError::invalid(
                "connection_weight",
                format!("must be a positive number, got {}", self.connection_weight),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::invalid("poll_timeout", "must be positive"));
        }
        Ok(())
    }

    /// Per-connection limits.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            max_message_size: self.max_message_size,
            fragment_size: self.fragment_size,
            auto_fragment: self.auto_fragment,
            handshake_timeout: self.handshake_timeout,
            // One maximal reply may always be queued before reads pause.
            max_pending_output: self.max_message_size,
        }
    }

    /// Balancer settings.
    #[must_use]
    pub fn balance_settings(&self) -> BalanceSettings {
        BalanceSettings {
            policy: self.balance_policy,
            connection_weight: self.connection_weight,
            refresh_interval: self.snapshot_refresh_interval,
        }
    }
}
