use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Where a link listens or connects.
///
/// Accepted textual forms:
/// - `unix:/run/app.sock` or any string containing a `/` → Unix domain socket
/// - `tcp:127.0.0.1:7000` or a bare `host:port` socket address → TCP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddr {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl FromStr for LinkAddr {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parse_err = |reason: &str| TransportError::AddressParse {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = input.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(parse_err("empty socket path"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let tcp = input.strip_prefix("tcp:").unwrap_or(input);
        if let Ok(addr) = tcp.parse::<SocketAddr>() {
            return Ok(Self::Tcp(addr));
        }

        if input.starts_with("tcp:") {
            return Err(parse_err("expected <ip>:<port>"));
        }
        if input.contains('/') {
            return Ok(Self::Unix(PathBuf::from(input)));
        }

        Err(parse_err(
            "expected unix:<path>, tcp:<ip>:<port>, a socket path or an ip:port pair",
        ))
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}
