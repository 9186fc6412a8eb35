//! Startup-failure taxonomy: bind/listen/allocation failures are fatal
//! and abort the daemon before it starts serving. Per-connection I/O
//! errors deliberately do not flow through this type; they're handled
//! inline by the event loop instead.

use std::path::PathBuf;

/// Fatal errors that abort the daemon before it starts serving.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The configured endpoint could not be created or bound.
    #[error("failed to bind endpoint {endpoint}: {source}")]
    Bind {
        /// The endpoint that failed to bind, for diagnostics.
        endpoint: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// `force_unlink` was set but the stale socket file could not be removed.
    #[error("failed to unlink stale socket {path:?}: {source}")]
    Unlink {
        /// Path that could not be removed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The mio `Poll` instance could not be created.
    #[error("failed to create event loop: {0}")]
    Poll(#[source] std::io::Error),

    /// `max_connections` was zero, which can never admit a connection.
    #[error("max_connections must be at least 1")]
    EmptyTable,

    /// The configuration file or CLI arguments were malformed.
    #[error("invalid configuration: {0}")]
    Config(String),
}
