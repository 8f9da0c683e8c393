use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected link stream: the one physical byte pipe a connection runs over.
///
/// On Unix this may wrap a Unix domain socket; TCP works everywhere.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Tcp(TcpStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
            LinkStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
            LinkStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
            LinkStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    /// Wrap a connected Unix domain socket.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Wrap a connected TCP stream. Nagle is disabled: linkmux frames are
    /// small and latency-sensitive.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            inner: LinkStreamInner::Tcp(stream),
        })
    }

    /// A connected in-process pair, handy for tests and loopback links.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout)?,
            LinkStreamInner::Tcp(stream) => stream.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_write_timeout(timeout)?,
            LinkStreamInner::Tcp(stream) => stream.set_write_timeout(timeout)?,
        }
        Ok(())
    }

    /// Clone the handle (a second descriptor onto the same socket), so one
    /// thread can block in `read` while another writes.
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => LinkStreamInner::Unix(stream.try_clone()?),
            LinkStreamInner::Tcp(stream) => LinkStreamInner::Tcp(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Shut down both directions. A reader blocked on a clone of this
    /// stream wakes up with EOF.
    pub fn shutdown(&self) -> Result<()> {
        let res = match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
            LinkStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
        };
        match res {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Human-readable description of the remote end, for logs.
    pub fn peer_label(&self) -> String {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => match stream.peer_addr() {
                Ok(addr) => match addr.as_pathname() {
                    Some(path) => format!("unix:{}", path.display()),
                    None => "unix:<unnamed>".to_string(),
                },
                Err(_) => "unix:<unknown>".to_string(),
            },
            LinkStreamInner::Tcp(stream) => match stream.peer_addr() {
                Ok(addr) => format!("tcp:{addr}"),
                Err(_) => "tcp:<unknown>".to_string(),
            },
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => "unix-domain-socket",
            LinkStreamInner::Tcp(_) => "tcp",
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
