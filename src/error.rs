//! Error types for the relay
//!
//! Failures are either startup failures (binding a socket, invalid
//! configuration) or the runtime ingestion failure that terminates the
//! process. Subscriber refusals stay in `BroadcastError` and become HTTP
//! responses; per-subscriber delivery problems only retire that subscriber.

use std::net::SocketAddr;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug)]
pub enum Error {
    /// Failed to bind a listening socket at startup
    Bind {
        /// Which socket ("udp" or "http")
        what: &'static str,
        /// Requested address
        addr: SocketAddr,
        /// Underlying OS error
        source: std::io::Error,
    },
    /// Receive error on the ingestion socket after startup
    Ingest(std::io::Error),
    /// HTTP server failure
    Http(std::io::Error),
    /// Invalid configuration
    Config(String),
    /// Other I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Bind { what, addr, source } => {
                write!(f, "Failed to bind {} socket on {}: {}", what, addr, source)
            }
            Error::Ingest(e) => write!(f, "Ingestion socket failed: {}", e),
            Error::Http(e) => write!(f, "HTTP server failed: {}", e),
            Error::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind { source, .. } => Some(source),
            Error::Ingest(e) | Error::Http(e) | Error::Io(e) => Some(e),
            Error::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
