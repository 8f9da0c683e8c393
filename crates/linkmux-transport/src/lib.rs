//! Physical link plumbing for linkmux.
//!
//! A linkmux connection runs over one byte stream between two peers. This
//! crate provides that stream ([`LinkStream`]), the listeners and connectors
//! that produce it (Unix domain sockets and TCP), address parsing, and the
//! small importance-id tokens a transport binding hands out for every
//! important packet it is asked to deliver.
//!
//! Everything protocol-aware lives further up the stack.

pub mod addr;
pub mod error;
pub mod importance;
pub mod listener;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use addr::LinkAddr;
pub use error::{Result, TransportError};
pub use importance::{ImportanceId, ImportanceIds};
pub use listener::{connect, Listener};
pub use stream::LinkStream;
pub use tcp::TcpLink;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
