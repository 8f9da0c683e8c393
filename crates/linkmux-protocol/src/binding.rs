//! Transport binding over a byte stream.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use bytes::Bytes;
use linkmux_frame::{FrameError, FrameReader, FrameWriter, HEADER_SIZE};
use linkmux_transport::{ImportanceId, LinkStream, Result, TransportError};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, WeakConnection};
use crate::error::ProtocolError;
use crate::resend::ResendRegistry;
use crate::transport::Transport;

type SharedWriter = Arc<Mutex<FrameWriter<LinkStream>>>;

/// [`Transport`] implementation over one [`LinkStream`] (UDS or TCP).
///
/// Opening a connection on the binding starts two threads: a read loop
/// that decodes frames and hands them to the connection, and the resend
/// timer. Writes from the event loop and the timer share one mutex.
pub struct StreamBinding {
    writer: SharedWriter,
    reader: Mutex<Option<FrameReader<LinkStream>>>,
    control: LinkStream,
    resend: Arc<ResendRegistry>,
    peer: String,
}

impl StreamBinding {
    pub fn new(stream: LinkStream, config: &ConnectionConfig) -> Result<Self> {
        let peer = stream.peer_label();
        let control = stream.try_clone()?;
        let reader_stream = stream.try_clone()?;

        let reader = FrameReader::with_config_link(reader_stream, config.frame.clone())
            .map_err(frame_to_transport_error)?;
        let writer = FrameWriter::with_config_link(stream, config.frame.clone())
            .map_err(frame_to_transport_error)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Mutex::new(Some(reader)),
            control,
            resend: Arc::new(ResendRegistry::new(config.resend.clone())),
            peer,
        })
    }

    /// Description of the remote end, for logs.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Important packets written but not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        self.resend.len()
    }

    fn shutdown(&self) {
        self.resend.stop();
        if let Err(err) = self.control.shutdown() {
            debug!(peer = %self.peer, error = %err, "link shutdown failed");
        }
    }
}

impl Transport for StreamBinding {
    fn write(
        &self,
        frame: Bytes,
        important: bool,
        connection: &Connection,
    ) -> Result<Option<ImportanceId>> {
        if self.resend.is_stopped() {
            return Err(TransportError::Shutdown);
        }

        // The writer lock keeps the resend timer from touching the entry
        // before its first write.
        let mut writer = lock_writer(&self.writer);
        let max = writer.config().max_payload_size + HEADER_SIZE;
        if frame.len() > max {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds limit of {max}", frame.len()),
            )));
        }

        let id = if important {
            Some(self.resend.register(frame.clone(), connection)?)
        } else {
            None
        };
        if let Err(err) = writer.write_raw(&frame) {
            if let Some(id) = id {
                self.resend.remove(id);
            }
            return Err(frame_to_transport_error(err));
        }
        Ok(id)
    }

    fn ack(&self, id: ImportanceId, _connection: &Connection) {
        self.resend.remove(id);
    }

    fn on_connection_open(&self, connection: &Connection) -> Result<()> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::Shutdown)?;

        let weak = connection.downgrade();
        let peer = self.peer.clone();
        thread::Builder::new()
            .name("linkmux-read".into())
            .spawn(move || read_loop(reader, weak, peer))?;

        let registry = Arc::clone(&self.resend);
        let writer = Arc::clone(&self.writer);
        thread::Builder::new()
            .name("linkmux-resend".into())
            .spawn(move || {
                registry.run(|frame| {
                    lock_writer(&writer)
                        .write_raw(frame)
                        .map_err(|err| ProtocolError::Transport(frame_to_transport_error(err)))
                })
            })?;

        info!(peer = %self.peer, connection = connection.id(), "link bound");
        Ok(())
    }

    fn on_connection_close(&self, connection: &Connection) {
        info!(peer = %self.peer, connection = connection.id(), "link unbound");
        self.shutdown();
    }
}

impl Drop for StreamBinding {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for StreamBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBinding")
            .field("peer", &self.peer)
            .field("resend", &self.resend)
            .finish()
    }
}

fn read_loop(mut reader: FrameReader<LinkStream>, connection: WeakConnection, peer: String) {
    loop {
        let result = reader.read_message();
        let Some(conn) = connection.upgrade() else {
            debug!(peer = %peer, "connection gone, read loop exiting");
            return;
        };

        match result {
            Ok(message) => {
                if let Err(err) = conn.deliver(message) {
                    conn.report(&err);
                }
            }
            // Frame boundaries are intact; skip the bad message.
            Err(
                err @ (FrameError::Malformed { .. }
                | FrameError::UnknownKind(_)
                | FrameError::UnknownSampleType(_)
                | FrameError::Json(_)),
            ) => {
                conn.report(&err.into());
            }
            Err(FrameError::ConnectionClosed) => {
                debug!(peer = %peer, "link closed by peer");
                close_quietly(&conn);
                return;
            }
            Err(err) => {
                if conn.is_open() {
                    conn.report(&err.into());
                }
                close_quietly(&conn);
                return;
            }
        }
    }
}

fn close_quietly(connection: &Connection) {
    if let Err(err) = connection.close() {
        connection.report(&err);
    }
}

fn lock_writer(writer: &SharedWriter) -> MutexGuard<'_, FrameWriter<LinkStream>> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn frame_to_transport_error(err: FrameError) -> TransportError {
    match err {
        FrameError::Io(io) => TransportError::Write(io),
        FrameError::ConnectionClosed => TransportError::Shutdown,
        other => TransportError::Io(std::io::Error::other(other.to_string())),
    }
}
