use std::path::PathBuf;

/// Errors that can occur in link transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
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

    /// The link address could not be parsed.
    #[error("invalid link address '{input}': {reason}")]
    AddressParse { input: String, reason: String },

    /// Writing to the link failed.
    #[error("link write failed: {0}")]
    Write(std::io::Error),

    /// Any other I/O error on the underlying socket.
    #[error("link socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// Every importance id is taken by a packet awaiting acknowledgement.
    #[error("no free importance id ({outstanding} packets awaiting ack)")]
    ImportanceIdsExhausted { outstanding: usize },

    /// The link has been shut down.
    #[error("link shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
