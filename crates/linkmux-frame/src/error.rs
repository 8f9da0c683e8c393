/// Errors that can occur during frame and message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4C4D \"LM\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame carries a message kind this codec does not know.
    #[error("unknown message kind {0}")]
    UnknownKind(u16),

    /// The message body does not match the layout of its kind.
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },

    /// A typed sample names a type with no registered handler.
    #[error("no handler registered for sample type {0}")]
    UnknownSampleType(u16),

    /// A typed sample body could not be serialized or deserialized.
    #[error("sample body error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
