//! Multi-channel links with acknowledged, ordered delivery over a single
//! byte stream.
//!
//! A linkmux connection multiplexes any number of channels over one Unix
//! domain socket or TCP stream. Each channel carries best-effort samples and
//! *important* samples, which are acknowledged, delivered in order and
//! retransmitted until the peer confirms them.
//!
//! # Crate Structure
//!
//! - [`transport`]: link streams, listeners and address parsing
//! - [`frame`]: wire codec for protocol messages and typed samples
//! - [`event`]: the priority event scheduler and its worker loop
//! - [`protocol`]: connections, channels and the stream transport binding
//!   (behind the default `protocol` feature)

/// Re-export transport types.
pub mod transport {
    pub use linkmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use linkmux_frame::*;
}

/// Re-export event scheduling types.
pub mod event {
    pub use linkmux_event::*;
}

/// Re-export protocol engine types (requires `protocol` feature).
#[cfg(feature = "protocol")]
pub mod protocol {
    pub use linkmux_protocol::*;
}
