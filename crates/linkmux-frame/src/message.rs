//! Protocol messages and their binary body layout.
//!
//! All integers are little-endian. Booleans are a single byte, `0` or `1`;
//! any other value is rejected as malformed.
//!
//! | kind | body |
//! |---|---|
//! | `channel_request` | src u32, dest u32 |
//! | `channel_response` | src u32, dest u32, ack u8 |
//! | `channel_ack` | src u32, dest u32, ack u8 |
//! | `channel_close` | src u32, dest u32 |
//! | `channel_restrict_request` | src u32, dest u32, restricted u8 |
//! | `channel_restrict_ack` | src u32, dest u32, restricted u8 |
//! | `data_sample` | src u32, dest u32, seqno i32, important u8, payload (rest) |
//! | `ack` | src u32, dest u32, seqno i32 |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{encode_frame, Frame};
use crate::error::{FrameError, Result};
use crate::kind::{self, kind_name};

/// Channel identifier, unique within one connection.
pub type ChannelId = u32;

/// Reserved id meaning "not yet known" (the remote id before the handshake).
pub const CHANNEL_ID_NOT_SET: ChannelId = u32::MAX;

/// Importance sequence number of a data sample.
pub type Seqno = i32;

/// Sequence number carried by non-important samples.
pub const SEQNO_NONE: Seqno = 0;

/// Largest sequence number before wrapping back to 1.
pub const SEQNO_MAX: Seqno = i32::MAX;

/// One decoded protocol message.
///
/// `src` is always the sender's channel id and `dest` the receiver's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ChannelRequest {
        src: ChannelId,
        dest: ChannelId,
    },
    ChannelResponse {
        src: ChannelId,
        dest: ChannelId,
        ack: bool,
    },
    ChannelAck {
        src: ChannelId,
        dest: ChannelId,
        ack: bool,
    },
    ChannelClose {
        src: ChannelId,
        dest: ChannelId,
    },
    ChannelRestrictRequest {
        src: ChannelId,
        dest: ChannelId,
        restricted: bool,
    },
    ChannelRestrictAck {
        src: ChannelId,
        dest: ChannelId,
        restricted: bool,
    },
    DataSample {
        src: ChannelId,
        dest: ChannelId,
        seqno: Seqno,
        important: bool,
        payload: Bytes,
    },
    Ack {
        src: ChannelId,
        dest: ChannelId,
        seqno: Seqno,
    },
}

impl Message {
    /// The frame kind tag for this message.
    pub fn kind(&self) -> u16 {
        match self {
            Message::ChannelRequest { .. } => kind::CHANNEL_REQUEST,
            Message::ChannelResponse { .. } => kind::CHANNEL_RESPONSE,
            Message::ChannelAck { .. } => kind::CHANNEL_ACK,
            Message::ChannelClose { .. } => kind::CHANNEL_CLOSE,
            Message::ChannelRestrictRequest { .. } => kind::CHANNEL_RESTRICT_REQUEST,
            Message::ChannelRestrictAck { .. } => kind::CHANNEL_RESTRICT_ACK,
            Message::DataSample { .. } => kind::DATA_SAMPLE,
            Message::Ack { .. } => kind::ACK,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        kind_name(self.kind())
    }

    /// The receiver-side channel id this message is addressed to.
    pub fn dest(&self) -> ChannelId {
        match self {
            Message::ChannelRequest { dest, .. }
            | Message::ChannelResponse { dest, .. }
            | Message::ChannelAck { dest, .. }
            | Message::ChannelClose { dest, .. }
            | Message::ChannelRestrictRequest { dest, .. }
            | Message::ChannelRestrictAck { dest, .. }
            | Message::DataSample { dest, .. }
            | Message::Ack { dest, .. } => *dest,
        }
    }

    /// Encode the message body (without frame header).
    pub fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            Message::ChannelRequest { src, dest } | Message::ChannelClose { src, dest } => {
                put_ids(dst, *src, *dest);
            }
            Message::ChannelResponse { src, dest, ack }
            | Message::ChannelAck { src, dest, ack } => {
                put_ids(dst, *src, *dest);
                dst.put_u8(u8::from(*ack));
            }
            Message::ChannelRestrictRequest {
                src,
                dest,
                restricted,
            }
            | Message::ChannelRestrictAck {
                src,
                dest,
                restricted,
            } => {
                put_ids(dst, *src, *dest);
                dst.put_u8(u8::from(*restricted));
            }
            Message::DataSample {
                src,
                dest,
                seqno,
                important,
                payload,
            } => {
                put_ids(dst, *src, *dest);
                dst.put_i32_le(*seqno);
                dst.put_u8(u8::from(*important));
                dst.put_slice(payload);
            }
            Message::Ack { src, dest, seqno } => {
                put_ids(dst, *src, *dest);
                dst.put_i32_le(*seqno);
            }
        }
    }

    /// Encode the complete frame (header and body) for this message.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::with_capacity(self.body_hint());
        self.encode_body(&mut body);
        encode_frame(self.kind(), &body, dst)
    }

    /// Encode into a fresh, immutable buffer. Used for resendable packets.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode a message from a frame.
    pub fn decode(frame: &Frame) -> Result<Self> {
        let name = kind_name(frame.kind);
        let mut body = frame.payload.clone();

        let message = match frame.kind {
            kind::CHANNEL_REQUEST => {
                let (src, dest) = take_ids(&mut body, name)?;
                Message::ChannelRequest { src, dest }
            }
            kind::CHANNEL_RESPONSE => {
                let (src, dest) = take_ids(&mut body, name)?;
                let ack = take_bool(&mut body, name)?;
                Message::ChannelResponse { src, dest, ack }
            }
            kind::CHANNEL_ACK => {
                let (src, dest) = take_ids(&mut body, name)?;
                let ack = take_bool(&mut body, name)?;
                Message::ChannelAck { src, dest, ack }
            }
            kind::CHANNEL_CLOSE => {
                let (src, dest) = take_ids(&mut body, name)?;
                Message::ChannelClose { src, dest }
            }
            kind::CHANNEL_RESTRICT_REQUEST => {
                let (src, dest) = take_ids(&mut body, name)?;
                let restricted = take_bool(&mut body, name)?;
                Message::ChannelRestrictRequest {
                    src,
                    dest,
                    restricted,
                }
            }
            kind::CHANNEL_RESTRICT_ACK => {
                let (src, dest) = take_ids(&mut body, name)?;
                let restricted = take_bool(&mut body, name)?;
                Message::ChannelRestrictAck {
                    src,
                    dest,
                    restricted,
                }
            }
            kind::DATA_SAMPLE => {
                let (src, dest) = take_ids(&mut body, name)?;
                let seqno = take_seqno(&mut body, name)?;
                let important = take_bool(&mut body, name)?;
                // The payload is whatever remains; it may be empty.
                let payload = std::mem::take(&mut body);
                Message::DataSample {
                    src,
                    dest,
                    seqno,
                    important,
                    payload,
                }
            }
            kind::ACK => {
                let (src, dest) = take_ids(&mut body, name)?;
                let seqno = take_seqno(&mut body, name)?;
                Message::Ack { src, dest, seqno }
            }
            other => return Err(FrameError::UnknownKind(other)),
        };

        if !body.is_empty() {
            return Err(FrameError::Malformed {
                kind: name,
                reason: format!("{} trailing bytes", body.len()),
            });
        }

        Ok(message)
    }

    fn body_hint(&self) -> usize {
        match self {
            Message::DataSample { payload, .. } => 13 + payload.len(),
            _ => 12,
        }
    }
}

fn put_ids(dst: &mut BytesMut, src: ChannelId, dest: ChannelId) {
    dst.put_u32_le(src);
    dst.put_u32_le(dest);
}

fn ensure(body: &Bytes, need: usize, kind: &'static str) -> Result<()> {
    if body.remaining() < need {
        return Err(FrameError::Malformed {
            kind,
            reason: format!("truncated body ({} bytes left, need {need})", body.remaining()),
        });
    }
    Ok(())
}

fn take_ids(body: &mut Bytes, kind: &'static str) -> Result<(ChannelId, ChannelId)> {
    ensure(body, 8, kind)?;
    Ok((body.get_u32_le(), body.get_u32_le()))
}

fn take_seqno(body: &mut Bytes, kind: &'static str) -> Result<Seqno> {
    ensure(body, 4, kind)?;
    Ok(body.get_i32_le())
}

fn take_bool(body: &mut Bytes, kind: &'static str) -> Result<bool> {
    ensure(body, 1, kind)?;
    match body.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(FrameError::Malformed {
            kind,
            reason: format!("invalid boolean byte {other}"),
        }),
    }
}
