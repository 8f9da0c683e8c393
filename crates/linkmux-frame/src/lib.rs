//! Wire codec for linkmux.
//!
//! Every protocol message travels as one frame:
//! - A 2-byte magic number ("LM") for stream synchronization
//! - A 4-byte little-endian body length
//! - A 2-byte little-endian message kind
//!
//! The body layout per kind is defined in [`message`]. Application payloads
//! carried inside data samples may use the typed sample codec in [`sample`].

pub mod codec;
pub mod error;
pub mod kind;
pub mod message;
pub mod reader;
pub mod sample;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use message::{ChannelId, Message, Seqno, CHANNEL_ID_NOT_SET, SEQNO_MAX, SEQNO_NONE};
pub use reader::FrameReader;
pub use sample::{
    encode_sample, split_sample, CheckedOut, SampleEncoder, SampleRegistry, SampleTypeId,
};
pub use writer::FrameWriter;
