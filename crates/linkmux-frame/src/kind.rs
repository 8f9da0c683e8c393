//! Message kind tags carried in the frame header.

pub const CHANNEL_REQUEST: u16 = 1;
pub const CHANNEL_RESPONSE: u16 = 2;
pub const CHANNEL_ACK: u16 = 3;
pub const CHANNEL_CLOSE: u16 = 4;
pub const CHANNEL_RESTRICT_REQUEST: u16 = 5;
pub const CHANNEL_RESTRICT_ACK: u16 = 6;
pub const DATA_SAMPLE: u16 = 7;
pub const ACK: u16 = 8;

/// Returns a human-readable name for a message kind.
pub fn kind_name(kind: u16) -> &'static str {
    match kind {
        CHANNEL_REQUEST => "channel_request",
        CHANNEL_RESPONSE => "channel_response",
        CHANNEL_ACK => "channel_ack",
        CHANNEL_CLOSE => "channel_close",
        CHANNEL_RESTRICT_REQUEST => "channel_restrict_request",
        CHANNEL_RESTRICT_ACK => "channel_restrict_ack",
        DATA_SAMPLE => "data_sample",
        ACK => "ack",
        _ => "unknown",
    }
}
