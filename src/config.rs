//! The configuration record the event loop is built from, plus the CLI
//! and file-loading glue needed to actually assemble one at process
//! start. Argument parsing lives here, separate from the state machine
//! it configures.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::DaemonError;

fn default_max_connections() -> usize {
    256
}

fn default_poll_interval_secs() -> u64 {
    60
}

/// Configuration record consumed by the core event loop.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Either a decimal TCP port or a filesystem path; see [`ResolvedEndpoint::resolve`].
    pub endpoint: String,
    /// Hard cap on concurrent clients.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Remove a stale socket file before binding, if the endpoint is a path.
    #[serde(default)]
    pub force_unlink: bool,
    /// Housekeeping wakeup interval for the readiness wait.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "0".to_string(),
            max_connections: default_max_connections(),
            force_unlink: false,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Command-line flags. Any flag given overrides the value from `--config`.
#[derive(Parser, Debug)]
#[command(
    name = "keymutexd",
    about = "Keyed mutex daemon: elects one owner per key, releases waiters on its behalf"
)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Decimal TCP port, or a filesystem path for a Unix socket.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Hard cap on concurrent clients.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Remove a stale Unix socket file before binding.
    #[arg(long)]
    pub force_unlink: bool,

    /// Housekeeping wakeup interval for the readiness wait, in seconds.
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
}

impl Config {
    /// Builds a [`Config`] from an optional TOML file overridden by CLI flags.
    pub fn load(cli: &Cli) -> Result<Self, DaemonError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        if let Some(endpoint) = &cli.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(max_connections) = cli.max_connections {
            config.max_connections = max_connections;
        }
        if cli.force_unlink {
            config.force_unlink = true;
        }
        if let Some(poll_interval_secs) = cli.poll_interval_secs {
            config.poll_interval_secs = poll_interval_secs;
        }

        if config.max_connections == 0 {
            return Err(DaemonError::EmptyTable);
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, DaemonError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("reading {path:?}: {e}")))?;
        toml::from_str(&contents).map_err(|e| DaemonError::Config(format!("{path:?}: {e}")))
    }
}

/// The endpoint, after disambiguating the raw config string: a value
/// that parses as a decimal `u16` is a TCP port bound on all interfaces;
/// anything else is a filesystem path for a Unix domain socket.
#[derive(Debug, Clone)]
pub enum ResolvedEndpoint {
    /// Bind a TCP listener on this port, all interfaces.
    Tcp(SocketAddr),
    /// Bind a Unix domain socket at this path.
    Unix(PathBuf),
}

impl ResolvedEndpoint {
    /// Applies the disambiguation rule to a raw endpoint string.
    pub fn resolve(raw: &str) -> Self {
        match raw.parse::<u16>() {
            Ok(port) => ResolvedEndpoint::Tcp(SocketAddr::from(([0, 0, 0, 0], port))),
            Err(_) => ResolvedEndpoint::Unix(PathBuf::from(raw)),
        }
    }
}
