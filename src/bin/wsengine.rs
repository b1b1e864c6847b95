//! wsengine server binary (feature `cli`).
//!
//! Serves an echo application on `/echo` until the process is killed.

use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wsengine::config::{BalancePolicy, TlsConfig};
use wsengine::{ConfigError, EchoApp, Registry, Server, ServerConfig, ServerError};

/// Bad arguments or configuration.
const EXIT_USER_ERROR: i32 = 1;
/// The server failed after starting, or could not start.
const EXIT_RUNTIME_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "wsengine", version, about = "WebSocket server engine")]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Listening address
    #[arg(short = 'b', long = "bind")]
    bind: Option<SocketAddr>,

    /// Number of I/O worker threads
    #[arg(short = 'w', long = "workers")]
    workers: Option<usize>,

    /// Connections per worker before new ones are refused
    #[arg(long = "max-connections")]
    max_connections: Option<usize>,

    /// Worker selection policy: greedy, round-robin
    #[arg(long = "policy", value_parser = parse_policy)]
    policy: Option<BalancePolicy>,

    /// PEM certificate chain; enables TLS together with --tls-key
    #[arg(long = "tls-cert", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long = "tls-key", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Fragment outgoing data messages
    #[arg(long = "auto-fragment", action = ArgAction::SetTrue)]
    auto_fragment: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbosity: u8,
}

impl Cli {
    fn to_config(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = ServerConfig::load(self.config.as_deref())?;
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(policy) = self.policy {
            config.balance_policy = policy;
        }
        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            config.tls = Some(TlsConfig::new(cert, key));
        }
        if self.auto_fragment {
            config.auto_fragment = true;
        }
        Ok(config)
    }

    fn default_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "wsengine=info",
            1 => "wsengine=debug",
            _ => "wsengine=trace",
        }
    }
}

fn parse_policy(s: &str) -> Result<BalancePolicy, String> {
    s.parse()
}

fn main() {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .init();

    let config = match cli.to_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(EXIT_USER_ERROR);
        }
    };

    if let Err(err) = run(config) {
        eprintln!("error: {err}");
        let code = match err {
            ServerError::Config(_) => EXIT_USER_ERROR,
            _ => EXIT_RUNTIME_ERROR,
        };
        std::process::exit(code);
    }
}

fn run(config: ServerConfig) -> Result<(), ServerError> {
    let mut registry = Registry::new();
    registry.register("/echo", Arc::new(EchoApp));
    let handle = Server::new(config, Arc::new(registry)).start()?;
    tracing::info!(addr = %handle.local_addr(), "serving /echo");
    handle.wait()
}
