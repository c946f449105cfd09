use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::relay::Direction;

/// Failure of one proxied connection. Never affects other connections.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("connecting to {target} timed out after {after:?}")]
    DialTimeout { target: String, after: Duration },
    #[error("no complete request head within {after:?}")]
    HeadTimeout { after: Duration },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("relay {direction} failed: {source}")]
    Relay {
        direction: Direction,
        #[source]
        source: io::Error,
    },
    #[error("connection cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Status line sent to the client before closing, if the failure happens
    /// before any bytes were relayed.
    pub(crate) fn response(&self) -> Option<&'static [u8]> {
        match self {
            Self::Dial { .. } | Self::DialTimeout { .. } => Some(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"),
            Self::HeadTimeout { .. } => Some(b"HTTP/1.1 408 Request Timeout\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"),
            Self::BadRequest(_) => Some(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"),
            _ => None,
        }
    }
}
