use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use linkmux_event::Priority;
use linkmux_frame::{ChannelId, SampleEncoder, SampleRegistry, SampleTypeId};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::channel::{ChannelInfo, ChannelState};
use crate::connection::Connection;
use crate::error::Result;
use crate::event::Op;

/// Application-facing handle to one channel.
///
/// Every operation is asynchronous: it enqueues an event and returns.
/// Failures detected later are reported through
/// [`crate::Application::on_error`].
#[derive(Clone)]
pub struct ChannelHandle {
    connection: Connection,
    local_id: ChannelId,
    input: Arc<Mutex<SampleRegistry>>,
}

impl ChannelHandle {
    pub(crate) fn new(
        connection: Connection,
        local_id: ChannelId,
        input: Arc<Mutex<SampleRegistry>>,
    ) -> Self {
        Self {
            connection,
            local_id,
            input,
        }
    }

    pub fn local_id(&self) -> ChannelId {
        self.local_id
    }

    /// The peer's id for this channel, once the handshake has assigned it.
    pub fn remote_id(&self) -> Option<ChannelId> {
        self.info().and_then(|info| info.remote_id)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Current channel state, or `None` once the channel has been closed.
    pub fn state(&self) -> Option<ChannelState> {
        self.info().map(|info| info.state)
    }

    pub fn info(&self) -> Option<ChannelInfo> {
        self.connection.channel(self.local_id)
    }

    pub fn is_restricted(&self) -> bool {
        self.info()
            .is_some_and(|info| info.restricted_local && info.restricted_remote)
    }

    /// Send raw bytes. Important samples are delivered in order, at least
    /// once, one at a time.
    pub fn send(&self, payload: impl Into<Bytes>, important: bool) -> Result<()> {
        self.connection.ensure_open("send a sample")?;
        self.connection.schedule(
            Priority::MEDIUM,
            Op::Send {
                channel: self.local_id,
                payload: payload.into(),
                important,
            },
            &[],
        )?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.connection.schedule(
            Priority::MEDIUM,
            Op::CloseChannel {
                channel: self.local_id,
            },
            &[],
        )?;
        Ok(())
    }

    /// Ask the peer to hold important traffic on this channel.
    pub fn restrict(&self) -> Result<()> {
        self.set_restricted(true)
    }

    pub fn unrestrict(&self) -> Result<()> {
        self.set_restricted(false)
    }

    fn set_restricted(&self, restricted: bool) -> Result<()> {
        self.connection.ensure_open("change a channel restriction")?;
        self.connection.schedule(
            Priority::MEDIUM,
            Op::Restrict {
                channel: self.local_id,
                restricted,
            },
            &[],
        )?;
        Ok(())
    }

    /// Typed output stream for this channel.
    pub fn output_stream(&self) -> SampleOutput {
        SampleOutput {
            channel: self.clone(),
            encoder: SampleEncoder::new(),
        }
    }

    /// Typed input stream for this channel. Once any handler is registered,
    /// incoming payloads are decoded and dispatched instead of being passed
    /// to [`crate::Application::on_sample`].
    pub fn input_stream(&self) -> SampleInput {
        SampleInput {
            registry: Arc::clone(&self.input),
        }
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("connection", &self.connection.id())
            .field("local_id", &self.local_id)
            .finish()
    }
}

/// Sends typed values on a channel.
#[derive(Debug, Clone)]
pub struct SampleOutput {
    channel: ChannelHandle,
    encoder: SampleEncoder,
}

impl SampleOutput {
    /// Declare a type this stream will send.
    pub fn declare(&mut self, type_id: SampleTypeId) -> &mut Self {
        self.encoder.declare(type_id);
        self
    }

    pub fn send<T: Serialize>(&self, type_id: SampleTypeId, value: &T, important: bool) -> Result<()> {
        let payload = self.encoder.encode(type_id, value)?;
        self.channel.send(payload, important)
    }
}

/// Registers per-type handlers for samples arriving on a channel.
#[derive(Clone)]
pub struct SampleInput {
    registry: Arc<Mutex<SampleRegistry>>,
}

impl SampleInput {
    pub fn register<T, F>(&self, type_id: SampleTypeId, handler: F)
    where
        T: DeserializeOwned,
        F: FnMut(T) + Send + 'static,
    {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(type_id, handler);
    }

    pub fn unregister(&self, type_id: SampleTypeId) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(type_id)
    }
}

impl fmt::Debug for SampleInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleInput").finish_non_exhaustive()
    }
}
