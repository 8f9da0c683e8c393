use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::kind::kind_name;

/// Frame header: magic (2) + length (4) + kind (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "LM" (0x4C 0x4D).
pub const MAGIC: [u8; 2] = [0x4C, 0x4D];

/// Default maximum body size: 1 MiB. Samples on constrained links are small.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// One framed protocol message, body still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message kind, see [`crate::kind`].
    pub kind: u16,
    /// The message body.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Human-readable kind name, for logs.
    pub fn kind_name(&self) -> &'static str {
        kind_name(self.kind)
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Kind     │ Body             │
/// │ 0x4C 0x4D    │ (4B LE)   │ (2B LE)  │ (Length bytes)   │
/// │ "LM"         │           │          │                  │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_frame(kind: u16, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if body.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body.len() as u32);
    dst.put_u16_le(kind);
    dst.put_slice(body);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let body_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let kind = u16::from_le_bytes([src[6], src[7]]);

    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + body_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(body_len).freeze();

    Ok(Some(Frame { kind, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 1 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
