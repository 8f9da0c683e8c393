use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Listening TCP socket producing [`LinkStream`]s.
pub struct TcpLink {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpLink {
    /// Bind and listen. Port 0 picks an ephemeral port; see [`Self::local_addr`].
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening on tcp");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming link (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted tcp link");
        LinkStream::from_tcp(stream)
    }

    /// Connect to a listening TCP peer (blocking).
    pub fn connect(addr: SocketAddr) -> Result<LinkStream> {
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        debug!(%addr, "connected tcp link");
        LinkStream::from_tcp(stream)
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
