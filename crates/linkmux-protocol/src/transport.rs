use bytes::Bytes;
use linkmux_transport::{ImportanceId, Result};

use crate::connection::Connection;

/// Capability a link binding offers the protocol engine.
///
/// Implementations must tolerate concurrent calls from the event loop and
/// from their own resend machinery; [`crate::StreamBinding`] serializes
/// writes behind a mutex.
pub trait Transport: Send + Sync + 'static {
    /// Write one encoded frame.
    ///
    /// For an important packet the binding takes over retransmission and
    /// returns the importance id that will later be passed to
    /// [`Transport::ack`]. Non-important writes return `None`.
    fn write(
        &self,
        frame: Bytes,
        important: bool,
        connection: &Connection,
    ) -> Result<Option<ImportanceId>>;

    /// The peer acknowledged an important packet: stop resending it.
    fn ack(&self, id: ImportanceId, connection: &Connection);

    /// Called once when the connection is opened on this transport.
    fn on_connection_open(&self, connection: &Connection) -> Result<()>;

    /// Called once after the connection has been freed.
    fn on_connection_close(&self, connection: &Connection);
}
