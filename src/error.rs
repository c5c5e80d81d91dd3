//! Error types for each stage of a relay session.
//!
//! None of these cross a session boundary: a session catches them, records
//! an event and tears its own sockets down. Only [`BindError`] reaches the
//! caller of [`ProxyServer::start`](crate::ProxyServer::start).

use crate::{protocol::ReplyCode, relay::Direction};
use std::{io, net::SocketAddr, time::Duration};
use thiserror::Error;

/// BindError is fatal to one start attempt, never to the process
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to resolve bind address {addr}: {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("no candidate port could be bound on {host} (tried {tried:?})")]
    Exhausted { host: String, tried: Vec<u16> },
}

/// HandshakeError covers malformed or unsupported client input during
/// negotiation
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("client closed the connection before sending anything")]
    Closed,

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("no acceptable authentication method offered")]
    NoAcceptableMethod,

    #[error("unsupported SOCKS version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("invalid domain name in request")]
    InvalidDomain,

    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("invalid port in request target {0:?}")]
    InvalidPort(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HandshakeError {
    /// reply_code returns the SOCKS5 REP value owed to the client before the
    /// connection is closed, if the protocol defines one for this failure
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            Self::UnsupportedVersion(_) | Self::UnsupportedCommand(_) => {
                Some(ReplyCode::CommandNotSupported)
            }
            Self::UnsupportedAddressType(_) => Some(ReplyCode::AddrTypeUnsupported),
            Self::InvalidDomain => Some(ReplyCode::ServerFailure),
            _ => None,
        }
    }

    /// on_read builds a mapper for read_exact failures: a short read becomes
    /// Truncated(what), anything else stays an I/O error
    pub(crate) fn on_read(what: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Self::Truncated(what)
            } else {
                Self::Io(e)
            }
        }
    }
}

/// DialError is the typed reason an upstream connection could not be opened
#[derive(Debug, Error)]
pub enum DialError {
    #[error("failed to resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },

    #[error("{host} resolved to no addresses")]
    NoAddresses { host: String },

    #[error("connection to {addr} refused")]
    Refused { addr: SocketAddr },

    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    Timeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("failed to connect to {addr}: {source}")]
    Io { addr: SocketAddr, source: io::Error },
}

/// RelayError is recorded as a session event and never reported further
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{direction} relay failed: {source}")]
    Io {
        direction: Direction,
        source: io::Error,
    },

    #[error("{direction} relay task aborted: {source}")]
    Join {
        direction: Direction,
        source: tokio::task::JoinError,
    },
}
