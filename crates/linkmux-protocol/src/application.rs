use bytes::Bytes;
use tracing::error;

use crate::connection::Connection;
use crate::error::ErrorKind;
use crate::handle::ChannelHandle;

/// Outcome of a restriction exchange, as seen by one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionInfo {
    /// Both sides agreed: important traffic on the channel is held.
    Restricted,
    /// The restriction was lifted; held traffic is released.
    Unrestricted,
    /// The peer refused this side's restriction request.
    Denied,
}

/// Callbacks from the protocol engine to the application.
///
/// All callbacks run on the event loop thread. They may freely call
/// [`ChannelHandle`] and [`Connection`] methods, which only enqueue work.
pub trait Application: Send + Sync + 'static {
    /// Decide whether to admit a channel the peer wants to open.
    fn on_channel_accept(&self, channel: &ChannelHandle) -> bool;

    /// The handshake completed; the channel is usable on both sides.
    fn on_channel_opened(&self, channel: &ChannelHandle) {
        let _ = channel;
    }

    /// The channel was closed, locally or by the peer.
    fn on_channel_closed(&self, channel: &ChannelHandle) {
        let _ = channel;
    }

    /// The peer refused a channel this side asked for.
    fn on_channel_rejected(&self, connection: &Connection) {
        let _ = connection;
    }

    fn on_restriction_changed(&self, channel: &ChannelHandle, info: RestrictionInfo) {
        let _ = (channel, info);
    }

    /// Decide whether to grant the peer's restriction request.
    fn on_restrict_request(&self, channel: &ChannelHandle) -> bool {
        let _ = channel;
        true
    }

    /// A raw sample arrived on a channel with no typed handlers registered.
    fn on_sample(&self, channel: &ChannelHandle, payload: Bytes, important: bool) {
        let _ = (channel, payload, important);
    }

    /// Single sink for every error the engine reports.
    fn on_error(&self, kind: ErrorKind, message: &str) {
        error!(%kind, message, "linkmux error");
    }
}
