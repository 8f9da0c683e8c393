//! The linkmux protocol engine.
//!
//! A [`Connection`] multiplexes independent channels over one transport
//! binding. Channels carry samples in two modes: best effort, and
//! *important* (acknowledged, in order, retried on timeout, at most one
//! unacknowledged packet per channel).
//!
//! All protocol state is mutated by events on a shared
//! [`linkmux_event::EventScheduler`]; run it with an
//! [`linkmux_event::EventLoop`]. Transports and the application plug in
//! through the [`Transport`] and [`Application`] traits.
//!
//! ```no_run
//! use std::sync::Arc;
//! use linkmux_event::{EventLoop, SchedulerConfig};
//! use linkmux_protocol::{connect, Application, ChannelHandle, Scheduler};
//!
//! struct Client;
//!
//! impl Application for Client {
//!     fn on_channel_accept(&self, _channel: &ChannelHandle) -> bool {
//!         false
//!     }
//!
//!     fn on_channel_opened(&self, channel: &ChannelHandle) {
//!         let _ = channel.send(&b"hello"[..], true);
//!     }
//! }
//!
//! let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
//! let _event_loop = EventLoop::start(Arc::clone(&scheduler)).unwrap();
//! let addr = "unix:/tmp/linkmux.sock".parse().unwrap();
//! let connection = connect(&addr, scheduler, Arc::new(Client)).unwrap();
//! connection.open_channel().unwrap();
//! ```

pub mod application;
pub mod binding;
pub mod channel;
pub mod config;
pub mod connection;
pub mod connector;
mod delivery;
pub mod error;
pub mod event;
pub mod handle;
mod handshake;
pub mod resend;
mod restrict;
pub mod transport;

pub use application::{Application, RestrictionInfo};
pub use binding::StreamBinding;
pub use channel::{next_seqno, ChannelInfo, ChannelState};
pub use config::{ConnectionConfig, ResendConfig};
pub use connection::{Connection, ConnectionState, Scheduler, WeakConnection};
pub use connector::{connect, connect_with_config, LinkListener};
pub use error::{ErrorKind, ProtocolError, Result};
pub use event::ProtocolEvent;
pub use handle::{ChannelHandle, SampleInput, SampleOutput};
pub use resend::{ResendEntry, ResendRegistry};
pub use transport::Transport;
