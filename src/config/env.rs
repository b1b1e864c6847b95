//! Environment variable and config file support for [`ServerConfig`].
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `WSENGINE_BIND` | `SocketAddr` | `bind` |
//! | `WSENGINE_WORKERS` | `usize` | `workers` |
//! | `WSENGINE_MAX_CONNECTIONS` | `usize` | `max_connections` |
//! | `WSENGINE_MAX_MESSAGE_SIZE` | `usize` | `max_message_size` |
//! | `WSENGINE_FRAGMENT_SIZE` | `usize` | `fragment_size` |
//! | `WSENGINE_AUTO_FRAGMENT` | `bool` | `auto_fragment` |
//! | `WSENGINE_HANDSHAKE_TIMEOUT_MS` | `u64` | `handshake_timeout` |
//! | `WSENGINE_POLL_TIMEOUT_MS` | `u64` | `poll_timeout` |
//! | `WSENGINE_CONNECTION_WEIGHT` | `f64` | `connection_weight` |
//! | `WSENGINE_BALANCE_POLICY` | `greedy` / `round-robin` | `balance_policy` |
//! | `WSENGINE_SNAPSHOT_REFRESH_INTERVAL` | `usize` | `snapshot_refresh_interval` |
//! | `WSENGINE_INBOUND_QUEUE_CAPACITY` | `usize` | `inbound_queue_capacity` |
//! | `WSENGINE_TLS_CERT` | path | `tls.cert_path` |
//! | `WSENGINE_TLS_KEY` | path | `tls.key_path` |

use super::{ServerConfig, TlsConfig};
use crate::error::ConfigError;
use std::time::Duration;

/// Environment variable name for the listening address.
pub const ENV_BIND: &str = "WSENGINE_BIND";
/// Environment variable name for the worker count.
pub const ENV_WORKERS: &str = "WSENGINE_WORKERS";
/// Environment variable name for connections per worker.
pub const ENV_MAX_CONNECTIONS: &str = "WSENGINE_MAX_CONNECTIONS";
/// Environment variable name for the message size limit.
pub const ENV_MAX_MESSAGE_SIZE: &str = "WSENGINE_MAX_MESSAGE_SIZE";
/// Environment variable name for the fragment size.
pub const ENV_FRAGMENT_SIZE: &str = "WSENGINE_FRAGMENT_SIZE";
/// Environment variable name for the auto-fragment toggle.
pub const ENV_AUTO_FRAGMENT: &str = "WSENGINE_AUTO_FRAGMENT";
/// Environment variable name for the handshake timeout in milliseconds.
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "WSENGINE_HANDSHAKE_TIMEOUT_MS";
/// Environment variable name for the poll timeout in milliseconds.
pub const ENV_POLL_TIMEOUT_MS: &str = "WSENGINE_POLL_TIMEOUT_MS";
/// Environment variable name for the balancer connection weight.
pub const ENV_CONNECTION_WEIGHT: &str = "WSENGINE_CONNECTION_WEIGHT";
/// Environment variable name for the balance policy.
pub const ENV_BALANCE_POLICY: &str = "WSENGINE_BALANCE_POLICY";
/// Environment variable name for the balancer snapshot cadence.
pub const ENV_SNAPSHOT_REFRESH_INTERVAL: &str = "WSENGINE_SNAPSHOT_REFRESH_INTERVAL";
/// Environment variable name for the inbound queue capacity.
pub const ENV_INBOUND_QUEUE_CAPACITY: &str = "WSENGINE_INBOUND_QUEUE_CAPACITY";
/// Environment variable name for the TLS certificate chain.
pub const ENV_TLS_CERT: &str = "WSENGINE_TLS_CERT";
/// Environment variable name for the TLS private key.
pub const ENV_TLS_KEY: &str = "WSENGINE_TLS_KEY";

#[cfg(test)]
const ALL_VARS: [&str; 14] = [
    ENV_BIND,
    ENV_WORKERS,
    ENV_MAX_CONNECTIONS,
    ENV_MAX_MESSAGE_SIZE,
    ENV_FRAGMENT_SIZE,
    ENV_AUTO_FRAGMENT,
    ENV_HANDSHAKE_TIMEOUT_MS,
    ENV_POLL_TIMEOUT_MS,
    ENV_CONNECTION_WEIGHT,
    ENV_BALANCE_POLICY,
    ENV_SNAPSHOT_REFRESH_INTERVAL,
    ENV_INBOUND_QUEUE_CAPACITY,
    ENV_TLS_CERT,
    ENV_TLS_KEY,
];

/// Apply environment variable overrides to a [`ServerConfig`].
///
/// Only variables that are set are applied. The TLS pair must be set
/// together.
///
/// # Errors
///
/// `ConfigError::Env` for a set but unparseable variable.
pub fn apply_env_overrides(config: &mut ServerConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_BIND) {
        config.bind = val.trim().parse().map_err(|_| ConfigError::Env {
            var: ENV_BIND,
            value: val.clone(),
            expected: "socket address",
        })?;
    }
    if let Some(val) = read_env(ENV_WORKERS) {
        config.workers = parse_usize(ENV_WORKERS, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_CONNECTIONS) {
        config.max_connections = parse_usize(ENV_MAX_CONNECTIONS, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_MESSAGE_SIZE) {
        config.max_message_size = parse_usize(ENV_MAX_MESSAGE_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_FRAGMENT_SIZE) {
        config.fragment_size = parse_usize(ENV_FRAGMENT_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_AUTO_FRAGMENT) {
        config.auto_fragment = parse_bool(ENV_AUTO_FRAGMENT, &val)?;
    }
    if let Some(val) = read_env(ENV_HANDSHAKE_TIMEOUT_MS) {
        config.handshake_timeout = parse_millis(ENV_HANDSHAKE_TIMEOUT_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_POLL_TIMEOUT_MS) {
        config.poll_timeout = parse_millis(ENV_POLL_TIMEOUT_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_CONNECTION_WEIGHT) {
        config.connection_weight = val.trim().parse().map_err(|_| ConfigError::Env {
            var: ENV_CONNECTION_WEIGHT,
            value: val.clone(),
            expected: "number",
        })?;
    }
    if let Some(val) = read_env(ENV_BALANCE_POLICY) {
        config.balance_policy = val.parse().map_err(|_| ConfigError::Env {
            var: ENV_BALANCE_POLICY,
            value: val.clone(),
            expected: "greedy or round-robin",
        })?;
    }
    if let Some(val) = read_env(ENV_SNAPSHOT_REFRESH_INTERVAL) {
        config.snapshot_refresh_interval = parse_usize(ENV_SNAPSHOT_REFRESH_INTERVAL, &val)?;
    }
    if let Some(val) = read_env(ENV_INBOUND_QUEUE_CAPACITY) {
        config.inbound_queue_capacity = parse_usize(ENV_INBOUND_QUEUE_CAPACITY, &val)?;
    }
    match (read_env(ENV_TLS_CERT), read_env(ENV_TLS_KEY)) {
        (Some(cert), Some(key)) => config.tls = Some(TlsConfig::new(cert, key)),
        (Some(_), None) => return Err(missing_pair(ENV_TLS_KEY)),
        (None, Some(_)) => return Err(missing_pair(ENV_TLS_CERT)),
        (None, None) => {}
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn missing_pair(var: &'static str) -> ConfigError {
    ConfigError::Env {
        var,
        value: String::new(),
        expected: "a path, set together with its TLS counterpart",
    }
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|_| ConfigError::Env {
        var,
        value: val.to_string(),
        expected: "unsigned integer",
    })
}

fn parse_millis(var: &'static str, val: &str) -> Result<Duration, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::Env {
            var,
            value: val.to_string(),
            expected: "milliseconds",
        })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var,
            value: val.to_string(),
            expected: "bool (true/false/1/0/yes/no)",
        }),
    }
}

#[cfg(test)]
pub(crate) fn clear_env_for_tests() {
    for var in ALL_VARS {
        std::env::remove_var(var);
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable server configuration.
///
/// ```toml
/// [server]
/// bind = "0.0.0.0:5080"
/// workers = 3
/// max_connections = 100
/// handshake_timeout_ms = 2000
/// poll_timeout_ms = 100
/// inbound_queue_capacity = 1024
///
/// [protocol]
/// max_message_size = 16777216
/// fragment_size = 1400
/// auto_fragment = false
///
/// [balancer]
/// policy = "greedy"
/// connection_weight = 0.7
/// snapshot_refresh_interval = 16
///
/// [tls]
/// cert = "cert.pem"
/// key = "key.pem"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct ServerTomlConfig {
    /// Listener and worker settings.
    #[serde(default)]
    pub server: ServerToml,
    /// Codec settings.
    #[serde(default)]
    pub protocol: ProtocolToml,
    /// Balancer settings.
    #[serde(default)]
    pub balancer: BalancerToml,
    /// TLS files.
    pub tls: Option<TlsToml>,
}

/// Server section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct ServerToml {
    /// Listening address.
    pub bind: Option<std::net::SocketAddr>,
    /// Worker threads.
    pub workers: Option<usize>,
    /// Connections per worker.
    pub max_connections: Option<usize>,
    /// Handshake timeout in milliseconds.
    pub handshake_timeout_ms: Option<u64>,
    /// Poll timeout in milliseconds.
    pub poll_timeout_ms: Option<u64>,
    /// Inbound queue capacity per worker.
    pub inbound_queue_capacity: Option<usize>,
}

/// Protocol section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct ProtocolToml {
    /// Largest accepted message.
    pub max_message_size: Option<usize>,
    /// Fragment payload size.
    pub fragment_size: Option<usize>,
    /// Fragment outgoing messages.
    pub auto_fragment: Option<bool>,
}

/// Balancer section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct BalancerToml {
    /// Selection policy.
    pub policy: Option<super::BalancePolicy>,
    /// Greedy connection weight.
    pub connection_weight: Option<f64>,
    /// Admissions between snapshot refreshes.
    pub snapshot_refresh_interval: Option<usize>,
}

/// TLS section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct TlsToml {
    /// PEM certificate chain.
    pub cert: std::path::PathBuf,
    /// PEM private key.
    pub key: std::path::PathBuf,
}

/// Apply a parsed TOML config to a [`ServerConfig`].
///
/// Only fields present in the file override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut ServerConfig, toml: &ServerTomlConfig) {
    let server = &toml.server;
    if let Some(v) = server.bind {
        config.bind = v;
    }
    if let Some(v) = server.workers {
        config.workers = v;
    }
    if let Some(v) = server.max_connections {
        config.max_connections = v;
    }
    if let Some(v) = server.handshake_timeout_ms {
        config.handshake_timeout = Duration::from_millis(v);
    }
    if let Some(v) = server.poll_timeout_ms {
        config.poll_timeout = Duration::from_millis(v);
    }
    if let Some(v) = server.inbound_queue_capacity {
        config.inbound_queue_capacity = v;
    }
    let protocol = &toml.protocol;
    if let Some(v) = protocol.max_message_size {
        config.max_message_size = v;
    }
    if let Some(v) = protocol.fragment_size {
        config.fragment_size = v;
    }
    if let Some(v) = protocol.auto_fragment {
        config.auto_fragment = v;
    }
    let balancer = &toml.balancer;
    if let Some(v) = balancer.policy {
        config.balance_policy = v;
    }
    if let Some(v) = balancer.connection_weight {
        config.connection_weight = v;
    }
    if let Some(v) = balancer.snapshot_refresh_interval {
        config.snapshot_refresh_interval = v;
    }
    if let Some(tls) = &toml.tls {
        config.tls = Some(TlsConfig::new(tls.cert.clone(), tls.key.clone()));
    }
}

/// Parse a TOML string into a [`ServerTomlConfig`].
///
/// # Errors
///
/// `ConfigError::Toml` for malformed input or unknown keys.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<ServerTomlConfig, ConfigError> {
    Ok(toml::from_str(toml_str)?)
}

/// Read and parse a TOML file into a [`ServerTomlConfig`].
///
/// # Errors
///
/// `ConfigError::Read` if the file cannot be read, otherwise as
/// [`parse_toml_str`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<ServerTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
