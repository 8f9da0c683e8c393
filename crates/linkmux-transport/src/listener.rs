use crate::addr::LinkAddr;
use crate::error::Result;
#[cfg(not(unix))]
use crate::error::TransportError;
use crate::stream::LinkStream;
use crate::tcp::TcpLink;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// A bound listener for either link flavor.
pub enum Listener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpLink),
}

impl Listener {
    /// Bind to `addr`.
    pub fn bind(addr: &LinkAddr) -> Result<Self> {
        match addr {
            #[cfg(unix)]
            LinkAddr::Unix(path) => Ok(Self::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            LinkAddr::Unix(path) => Err(TransportError::Bind {
                addr: path.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix domain sockets are not available on this platform",
                ),
            }),
            LinkAddr::Tcp(sock) => Ok(Self::Tcp(TcpLink::bind(*sock)?)),
        }
    }

    /// Accept the next link (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        match self {
            #[cfg(unix)]
            Self::Unix(uds) => uds.accept(),
            Self::Tcp(tcp) => tcp.accept(),
        }
    }

    /// The address this listener is reachable at.
    pub fn local_addr(&self) -> LinkAddr {
        match self {
            #[cfg(unix)]
            Self::Unix(uds) => LinkAddr::Unix(uds.path().to_path_buf()),
            Self::Tcp(tcp) => LinkAddr::Tcp(tcp.local_addr()),
        }
    }
}

/// Open a link to `addr` (blocking).
pub fn connect(addr: &LinkAddr) -> Result<LinkStream> {
    match addr {
        #[cfg(unix)]
        LinkAddr::Unix(path) => UnixDomainSocket::connect(path),
        #[cfg(not(unix))]
        LinkAddr::Unix(path) => Err(TransportError::Connect {
            addr: path.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix domain sockets are not available on this platform",
            ),
        }),
        LinkAddr::Tcp(sock) => TcpLink::connect(*sock),
    }
}
