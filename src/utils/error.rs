//! Error taxonomy for the watcher
//!
//! Connection errors are retried by the connection manager and collapse into
//! [`ConnectionExhausted`]. Extraction errors mean the session is unusable and
//! are handled by the supervisor. Malformed records and delivery errors are
//! logged and never end a polling cycle.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// A single failed connection attempt
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}: {source}")]
    Transport {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Every attempt of one connect sequence failed
#[derive(Debug, thiserror::Error)]
#[error("failed to connect to {host}:{port} after {attempts} attempts")]
pub struct ConnectionExhausted {
    pub host: String,
    pub port: u16,
    pub attempts: u32,
    #[source]
    pub last_error: ConnectError,
}

/// The session can no longer be used for extraction
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no end-of-message marker within {0:?}")]
    ReadTimeout(Duration),
    #[error("session broken: {0}")]
    BrokenSession(#[from] io::Error),
}

/// One response line that could not be turned into a query record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecord {
    #[error("expected at least 5 fields, found {found}")]
    MissingFields { found: usize },
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp { value: String },
}

/// The chat endpoint did not accept a message
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to reach chat endpoint: {0}")]
    Request(#[from] reqwest::Error),
    #[error("chat endpoint rejected message: {status} - {description}")]
    Rejected { status: u16, description: String },
    #[error("chat endpoint did not answer within {0:?}")]
    Timeout(Duration),
}
