use std::convert::Infallible;
use std::fmt;

use bytes::Bytes;
use linkmux_event::Action;
use linkmux_frame::{ChannelId, Message};
use tracing::trace;

use crate::connection::{Connection, ConnectionState};
use crate::error::Result;

/// Protocol operations carried by events.
pub(crate) enum Op {
    OpenChannel,
    Send {
        channel: ChannelId,
        payload: Bytes,
        important: bool,
    },
    /// Fill the channel's free flight slot from its queue.
    SendNext {
        channel: ChannelId,
    },
    CloseChannel {
        channel: ChannelId,
    },
    Restrict {
        channel: ChannelId,
        restricted: bool,
    },
    Deliver(Message),
    CloseConnection,
    /// Close one channel as part of connection teardown.
    Teardown {
        channel: ChannelId,
    },
    /// Joins dependencies when there are more than one event can carry.
    Barrier,
    Free,
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::OpenChannel => "open_channel",
            Op::Send { .. } => "send",
            Op::SendNext { .. } => "send_next",
            Op::CloseChannel { .. } => "close_channel",
            Op::Restrict { .. } => "restrict",
            Op::Deliver(_) => "deliver",
            Op::CloseConnection => "close_connection",
            Op::Teardown { .. } => "teardown",
            Op::Barrier => "barrier",
            Op::Free => "free",
        }
    }
}

/// A protocol action bound to the connection it operates on.
pub struct ProtocolEvent {
    connection: Connection,
    op: Op,
}

impl ProtocolEvent {
    pub(crate) fn new(connection: Connection, op: Op) -> Self {
        Self { connection, op }
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }
}

impl fmt::Debug for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEvent")
            .field("connection", &self.connection.id())
            .field("op", &self.op.name())
            .finish()
    }
}

impl Action for ProtocolEvent {
    type Error = Infallible;

    fn execute(self) -> std::result::Result<(), Infallible> {
        let ProtocolEvent { connection, op } = self;
        if let Err(err) = connection.run(op) {
            connection.report(&err);
        }
        Ok(())
    }
}

impl Connection {
    fn run(&self, op: Op) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            trace!(connection = self.id(), op = op.name(), "event for closed connection dropped");
            return Ok(());
        }

        match op {
            Op::OpenChannel => self.open_channel_now(),
            Op::Send {
                channel,
                payload,
                important,
            } => self.send_now(channel, payload, important),
            Op::SendNext { channel } => self.send_next(channel),
            Op::CloseChannel { channel } => self.close_channel_now(channel),
            Op::Restrict {
                channel,
                restricted,
            } => self.restrict_now(channel, restricted),
            Op::Deliver(message) => self.handle_message(message),
            Op::CloseConnection => self.begin_close(),
            Op::Teardown { channel } => self.teardown_channel(channel),
            Op::Barrier => Ok(()),
            Op::Free => self.free(),
        }
    }

    fn handle_message(&self, message: Message) -> Result<()> {
        trace!(
            connection = self.id(),
            kind = message.kind_name(),
            dest = message.dest(),
            "message received"
        );
        match message {
            Message::ChannelRequest { src, dest } => self.on_channel_request(src, dest),
            Message::ChannelResponse { src, dest, ack } => self.on_channel_response(src, dest, ack),
            Message::ChannelAck { src, dest, ack } => self.on_channel_ack(src, dest, ack),
            Message::ChannelClose { src, dest } => self.on_channel_close(src, dest),
            Message::ChannelRestrictRequest {
                src,
                dest,
                restricted,
            } => self.on_restrict_request(src, dest, restricted),
            Message::ChannelRestrictAck {
                src,
                dest,
                restricted,
            } => self.on_restrict_ack(src, dest, restricted),
            Message::DataSample {
                src,
                dest,
                seqno,
                important,
                payload,
            } => self.on_data_sample(src, dest, seqno, important, payload),
            Message::Ack { src, dest, seqno } => self.on_ack(src, dest, seqno),
        }
    }
}
