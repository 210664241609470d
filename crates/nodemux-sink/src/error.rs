use std::path::PathBuf;

use crate::traits::StreamHandle;

/// Errors that can occur in sink operations.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on a stream.
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// Another listener already owns this address.
    #[error("address already in use: {0}")]
    AddrInUse(String),

    /// Nothing is listening on this address.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The handle does not belong to this sink.
    #[error("stream {0} is not owned by this sink")]
    UnknownStream(StreamHandle),

    /// The sink does not implement the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, SinkError>;
