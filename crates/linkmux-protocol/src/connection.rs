use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use linkmux_event::{EventId, EventScheduler, Priority};
use linkmux_frame::{ChannelId, Message, CHANNEL_ID_NOT_SET};
use linkmux_transport::ImportanceId;
use tracing::{debug, error, info};

use crate::application::{Application, RestrictionInfo};
use crate::channel::{Channel, ChannelInfo, ChannelState, Pending};
use crate::error::{ProtocolError, Result};
use crate::event::{Op, ProtocolEvent};
use crate::handle::ChannelHandle;
use crate::transport::Transport;

/// Scheduler type shared by every connection it drives.
pub type Scheduler = EventScheduler<ProtocolEvent>;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Open => f.write_str("open"),
            ConnectionState::Closing => f.write_str("closing"),
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

/// Mutable protocol state. Only events running on the event loop touch it.
pub(crate) struct Core {
    pub state: ConnectionState,
    pub channels: BTreeMap<ChannelId, Channel>,
    next_channel_id: ChannelId,
}

impl Core {
    /// Hand out the next local channel id. Ids are never reused.
    pub fn allocate_channel_id(&mut self) -> Result<ChannelId> {
        let id = self.next_channel_id;
        if id == CHANNEL_ID_NOT_SET {
            return Err(ProtocolError::ChannelIdsExhausted);
        }
        self.next_channel_id += 1;
        Ok(id)
    }
}

/// Application notifications produced while the core is locked and fired
/// after it is released.
pub(crate) enum Notice {
    Opened(ChannelHandle),
    Closed(ChannelHandle),
    Rejected,
    Restriction(ChannelHandle, RestrictionInfo),
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

struct Shared {
    id: u64,
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn Transport>,
    application: Option<Arc<dyn Application>>,
    core: Mutex<Core>,
}

/// One peer link and the channels multiplexed over it.
///
/// `Connection` is a cheap, cloneable handle. Its public methods never
/// mutate protocol state directly: they enqueue events on the scheduler,
/// and the event loop applies them one at a time.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Non-owning reference to a connection, held by transport threads.
#[derive(Clone)]
pub struct WeakConnection {
    shared: Weak<Shared>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.shared.upgrade().map(|shared| Connection { shared })
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl Connection {
    /// Create a connection over `transport` and tell the transport about it.
    ///
    /// Without an application, inbound channel requests are refused with a
    /// missing-callback error and errors are only logged.
    pub fn open(
        scheduler: Arc<Scheduler>,
        transport: Arc<dyn Transport>,
        application: Option<Arc<dyn Application>>,
    ) -> Result<Self> {
        let connection = Self {
            shared: Arc::new(Shared {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                scheduler,
                transport,
                application,
                core: Mutex::new(Core {
                    state: ConnectionState::Open,
                    channels: BTreeMap::new(),
                    next_channel_id: 0,
                }),
            }),
        };
        connection
            .shared
            .transport
            .on_connection_open(&connection)?;
        info!(connection = connection.id(), "connection opened");
        Ok(connection)
    }

    /// Process-unique id, used in logs.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.shared.scheduler
    }

    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// Snapshot of every channel, ordered by local id.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.lock().channels.values().map(Channel::info).collect()
    }

    pub fn channel(&self, local_id: ChannelId) -> Option<ChannelInfo> {
        self.lock().channels.get(&local_id).map(Channel::info)
    }

    /// Ask the peer for a new channel. The outcome arrives through
    /// [`Application::on_channel_opened`] or [`Application::on_channel_rejected`].
    pub fn open_channel(&self) -> Result<EventId> {
        self.ensure_open("open a channel")?;
        self.schedule(Priority::MEDIUM, Op::OpenChannel, &[])
    }

    /// Close every channel, then free the connection and its transport
    /// binding. Closing a connection that is already closing is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.schedule(Priority::LOW, Op::CloseConnection, &[])?;
        Ok(())
    }

    /// Hand an inbound message to the engine. Called by transport read loops.
    pub fn deliver(&self, message: Message) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            debug!(
                connection = self.id(),
                kind = message.kind_name(),
                "message for closed connection dropped"
            );
            return Ok(());
        }
        self.schedule(Priority::MEDIUM, Op::Deliver(message), &[])?;
        Ok(())
    }

    /// Report an error through the application's error channel.
    pub fn report(&self, err: &ProtocolError) {
        let kind = err.kind();
        debug!(connection = self.id(), %kind, error = %err, "reporting error");
        match &self.shared.application {
            Some(app) => app.on_error(kind, &err.to_string()),
            None => error!(connection = self.id(), %kind, message = %err, "linkmux error"),
        }
    }

    pub(crate) fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            state => Err(ProtocolError::ConnectionState { state, operation }),
        }
    }

    pub(crate) fn schedule(&self, priority: Priority, op: Op, deps: &[EventId]) -> Result<EventId> {
        let event = ProtocolEvent::new(self.clone(), op);
        Ok(self.shared.scheduler.schedule(priority, event, deps)?)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Core> {
        self.shared
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn application(&self) -> Option<&Arc<dyn Application>> {
        self.shared.application.as_ref()
    }

    /// Encode and write one message.
    pub(crate) fn write(&self, message: &Message, important: bool) -> Result<Option<ImportanceId>> {
        let frame = message.to_bytes()?;
        let id = self.shared.transport.write(frame, important, self)?;
        debug!(
            connection = self.id(),
            kind = message.kind_name(),
            dest = message.dest(),
            important,
            importance_id = id.map(|id| id.get()),
            "message sent"
        );
        Ok(id)
    }

    /// Tell the transport an important packet needs no further resends.
    pub(crate) fn release(&self, id: ImportanceId) {
        self.shared.transport.ack(id, self);
    }

    pub(crate) fn handle(&self, channel: &Channel) -> ChannelHandle {
        ChannelHandle::new(self.clone(), channel.local_id, Arc::clone(&channel.input))
    }

    /// Move an important send into the channel's single flight slot queue
    /// and make sure someone will pick it up.
    pub(crate) fn enqueue_pending(&self, channel: &mut Channel, pending: Pending) -> Result<()> {
        channel.queue.push_back(pending);
        if channel.in_flight.is_none() {
            self.schedule(Priority::HIGH, Op::SendNext { channel: channel.local_id }, &[])?;
        }
        Ok(())
    }

    pub(crate) fn notify(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let Some(app) = self.application() else {
            return;
        };
        for notice in notices {
            match notice {
                Notice::Opened(handle) => app.on_channel_opened(&handle),
                Notice::Closed(handle) => app.on_channel_closed(&handle),
                Notice::Rejected => app.on_channel_rejected(self),
                Notice::Restriction(handle, info) => app.on_restriction_changed(&handle, info),
            }
        }
    }

    /// Tear down every channel and schedule the connection's own free once
    /// they are gone.
    pub(crate) fn begin_close(&self) -> Result<()> {
        let channels: Vec<ChannelId> = {
            let mut core = self.lock();
            if core.state != ConnectionState::Open {
                return Ok(());
            }
            core.state = ConnectionState::Closing;
            core.channels.keys().copied().collect()
        };
        info!(
            connection = self.id(),
            channels = channels.len(),
            "connection closing"
        );

        let mut deps = Vec::with_capacity(channels.len());
        for channel in channels {
            deps.push(self.schedule(Priority::LOW, Op::Teardown { channel }, &[])?);
        }
        let deps = self.fan_in(deps)?;
        self.schedule(Priority::LOW, Op::Free, &deps)?;
        Ok(())
    }

    /// Reduce a dependency list to at most [`linkmux_event::MAX_DEPENDENCIES`]
    /// entries by inserting barrier events.
    fn fan_in(&self, mut deps: Vec<EventId>) -> Result<Vec<EventId>> {
        while deps.len() > linkmux_event::MAX_DEPENDENCIES {
            deps = deps
                .chunks(linkmux_event::MAX_DEPENDENCIES)
                .map(|chunk| self.schedule(Priority::LOW, Op::Barrier, chunk))
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(deps)
    }

    pub(crate) fn free(&self) -> Result<()> {
        let leftovers: Vec<Channel> = {
            let mut core = self.lock();
            if core.state == ConnectionState::Closed {
                return Ok(());
            }
            core.state = ConnectionState::Closed;
            std::mem::take(&mut core.channels).into_values().collect()
        };

        let mut notices = Vec::new();
        for channel in leftovers {
            if let Some(flight) = channel.in_flight {
                self.release(flight.id);
            }
            // A channel still in its handshake was never announced as opened.
            if channel.state != ChannelState::Ready {
                notices.push(Notice::Closed(self.handle(&channel)));
            }
        }
        self.notify(notices);

        self.shared.transport.on_connection_close(self);
        info!(connection = self.id(), "connection closed");
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Connection");
        out.field("id", &self.shared.id);
        // Formatting may happen while an event holds the core.
        if let Ok(core) = self.shared.core.try_lock() {
            out.field("state", &core.state)
                .field("channels", &core.channels.len());
        }
        out.finish()
    }
}
