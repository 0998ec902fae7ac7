//! Error types for the epcore-dns crate.

use thiserror::Error;

/// Failures raised by the resolver, cache and node selector.
#[derive(Debug, Error)]
pub enum DnsError {
    /// A socket or poll operation failed.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A named-server address string was not a valid IPv4/IPv6 address.
    #[error("unrecognized named server address [{0}]")]
    BadServerAddress(String),

    /// The channel has no named servers to send to.
    #[error("no named servers configured")]
    NoServers,

    /// A DNS response could not be parsed.
    #[error("malformed DNS response: {0}")]
    Parse(&'static str),

    /// The server answered with a non-zero response code.
    #[error("DNS response code {0}")]
    ResponseCode(u8),

    /// The query timed out against every configured server.
    #[error("query timed out")]
    Timeout,

    /// The resolver is shutting down and refused the query.
    #[error("resolver is shutting down")]
    ShuttingDown,

    /// The persisted query file was malformed.
    #[error("query file {path}: {reason}")]
    QueryFile { path: String, reason: String },

    /// An underlying runtime component failed.
    #[error(transparent)]
    Thread(#[from] epcore_thread::ThreadError),

    /// An underlying synchronisation primitive failed.
    #[error(transparent)]
    Sync(#[from] epcore_sync::SyncError),

    /// A queue operation failed.
    #[error(transparent)]
    Queue(#[from] epcore_queue::QueueError),
}

impl DnsError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Specialized `Result` type for DNS operations.
pub type Result<T> = std::result::Result<T, DnsError>;
