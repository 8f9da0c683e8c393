use std::fmt;

use linkmux_event::EventError;
use linkmux_frame::{ChannelId, FrameError};
use linkmux_transport::{ImportanceId, TransportError};

use crate::connection::ConnectionState;

/// Coarse classification of every failure the engine can report.
///
/// This is what [`crate::Application::on_error`] receives alongside the
/// descriptive message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Allocation,
    TransportSocket,
    Bind,
    AddressParse,
    TransportWrite,
    Codec,
    ProtocolState,
    UserDefined,
    MissingCallback,
    EventDispatch,
    ConnectionState,
    ChannelRefused,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Allocation => "allocation",
            ErrorKind::TransportSocket => "transport_socket",
            ErrorKind::Bind => "bind",
            ErrorKind::AddressParse => "address_parse",
            ErrorKind::TransportWrite => "transport_write",
            ErrorKind::Codec => "codec",
            ErrorKind::ProtocolState => "protocol_state",
            ErrorKind::UserDefined => "user_defined",
            ErrorKind::MissingCallback => "missing_callback",
            ErrorKind::EventDispatch => "event_dispatch",
            ErrorKind::ConnectionState => "connection_state",
            ErrorKind::ChannelRefused => "channel_refused",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in the protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Link-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Wire or sample codec error.
    #[error("codec error: {0}")]
    Frame(#[from] FrameError),

    /// The scheduler refused an event.
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// The peer (or the local application) broke the protocol.
    #[error("protocol violation: {0}")]
    ProtocolState(String),

    /// No channel with this local id exists on the connection.
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// A required application callback was not supplied.
    #[error("missing application callback: {0}")]
    MissingCallback(&'static str),

    /// The operation is not valid in the connection's current state.
    #[error("cannot {operation} on a {state} connection")]
    ConnectionState {
        state: ConnectionState,
        operation: &'static str,
    },

    /// An inbound channel request was refused by this side.
    #[error("channel request from remote channel {remote} refused: {reason}")]
    ChannelRefused {
        remote: ChannelId,
        reason: &'static str,
    },

    /// An important packet was never acknowledged.
    #[error("important packet {id} unacknowledged after {retries} resends")]
    Unacknowledged { id: ImportanceId, retries: u32 },

    /// Every local channel id has been handed out.
    #[error("channel ids exhausted")]
    ChannelIdsExhausted,

    /// Application-defined failure.
    #[error("{0}")]
    User(String),
}

impl ProtocolError {
    pub fn protocol_state(msg: impl Into<String>) -> Self {
        ProtocolError::ProtocolState(msg.into())
    }

    pub fn user(msg: impl Into<String>) -> Self {
        ProtocolError::User(msg.into())
    }

    /// Map this error onto the reporting taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Transport(err) => match err {
                TransportError::Bind { .. } => ErrorKind::Bind,
                TransportError::AddressParse { .. } => ErrorKind::AddressParse,
                TransportError::Write(_) => ErrorKind::TransportWrite,
                TransportError::ImportanceIdsExhausted { .. } => ErrorKind::Allocation,
                _ => ErrorKind::TransportSocket,
            },
            ProtocolError::Frame(FrameError::Io(_)) => ErrorKind::TransportWrite,
            ProtocolError::Frame(_) => ErrorKind::Codec,
            ProtocolError::Event(EventError::PoolExhausted { .. }) => ErrorKind::Allocation,
            ProtocolError::Event(EventError::Spawn(_)) => ErrorKind::Allocation,
            ProtocolError::Event(EventError::TooManyDependencies { .. }) => {
                ErrorKind::EventDispatch
            }
            ProtocolError::ProtocolState(_) | ProtocolError::UnknownChannel(_) => {
                ErrorKind::ProtocolState
            }
            ProtocolError::MissingCallback(_) => ErrorKind::MissingCallback,
            ProtocolError::ConnectionState { .. } => ErrorKind::ConnectionState,
            ProtocolError::ChannelRefused { .. } => ErrorKind::ChannelRefused,
            ProtocolError::Unacknowledged { .. } => ErrorKind::TransportWrite,
            ProtocolError::ChannelIdsExhausted => ErrorKind::Allocation,
            ProtocolError::User(_) => ErrorKind::UserDefined,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use std::num::NonZeroU8;

    use super::*;

    #[test]
    fn transport_errors_keep_their_flavor() {
        let bind = ProtocolError::from(TransportError::Bind {
            addr: "tcp:0.0.0.0:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        });
        assert_eq!(bind.kind(), ErrorKind::Bind);

        let parse = ProtocolError::from(TransportError::AddressParse {
            input: "nope".into(),
            reason: "bad".into(),
        });
        assert_eq!(parse.kind(), ErrorKind::AddressParse);

        let write = ProtocolError::from(TransportError::Write(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert_eq!(write.kind(), ErrorKind::TransportWrite);
        assert_eq!(
            ProtocolError::from(TransportError::ImportanceIdsExhausted { outstanding: 255 }).kind(),
            ErrorKind::Allocation
        );
        assert_eq!(
            ProtocolError::from(TransportError::Shutdown).kind(),
            ErrorKind::TransportSocket
        );
    }

    #[test]
    fn engine_errors_map_to_taxonomy() {
        assert_eq!(
            ProtocolError::from(FrameError::InvalidMagic).kind(),
            ErrorKind::Codec
        );
        assert_eq!(
            ProtocolError::from(EventError::PoolExhausted { capacity: 4 }).kind(),
            ErrorKind::Allocation
        );
        assert_eq!(
            ProtocolError::UnknownChannel(3).kind(),
            ErrorKind::ProtocolState
        );
        assert_eq!(
            ProtocolError::Unacknowledged {
                id: NonZeroU8::MIN,
                retries: 5
            }
            .kind(),
            ErrorKind::TransportWrite
        );
        assert_eq!(ProtocolError::user("x").kind(), ErrorKind::UserDefined);
    }

    #[test]
    fn messages_are_descriptive() {
        let err = ProtocolError::ConnectionState {
            state: ConnectionState::Closed,
            operation: "open a channel",
        };
        assert_eq!(err.to_string(), "cannot open a channel on a closed connection");
        assert_eq!(ErrorKind::ProtocolState.to_string(), "protocol_state");
    }
}
