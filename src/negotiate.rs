use crate::{
    address::TargetAddr,
    auth::negotiate_auth,
    commands::{read_socks_request, send_reply},
    error::HandshakeError,
    http::parse_http_target,
    protocol::Version,
};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::debug;

/// Size of the first read used to tell the two proxy flavors apart
pub const FIRST_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Socks5,
    HttpStyle,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Socks5 => f.write_str("SOCKS5"),
            ProtocolKind::HttpStyle => f.write_str("HTTP"),
        }
    }
}

/// NegotiationResult is what a completed handshake knows about the upstream
#[derive(Debug, Clone)]
pub struct NegotiationResult {
    pub protocol: ProtocolKind,
    pub target: TargetAddr,

    /// Client bytes already read that belong to the upstream. For the HTTP
    /// flavor this is the whole buffered request; for SOCKS5 it is only set
    /// when the client pipelined payload behind its request frame.
    pub replay: Option<Vec<u8>>,
}

/// negotiate reads the first chunk from the client, decides which proxy
/// flavor it speaks and runs that handshake to completion. On a SOCKS5
/// request failure the protocol's error reply has already been sent when
/// this returns.
pub async fn negotiate<S>(stream: &mut S) -> Result<NegotiationResult, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; FIRST_CHUNK];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Err(HandshakeError::Closed);
    }
    let chunk = &buf[..n];

    if chunk[0] == Version::SOCKS5 as u8 {
        debug!("negotiating SOCKS5 ({n} byte hello)");
        negotiate_socks5(stream, chunk).await
    } else {
        debug!("negotiating HTTP-style request ({n} bytes)");
        let target = parse_http_target(chunk)?;
        Ok(NegotiationResult {
            protocol: ProtocolKind::HttpStyle,
            target,
            replay: Some(chunk.to_vec()),
        })
    }
}

async fn negotiate_socks5<S>(stream: &mut S, chunk: &[u8]) -> Result<NegotiationResult, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let consumed = negotiate_auth(stream, chunk).await?;

    // Anything after the hello in the first chunk is the start of the
    // request frame
    let mut reader = (&chunk[consumed..]).chain(&mut *stream);
    let request = read_socks_request(&mut reader).await;
    let (leftover, _) = reader.into_inner();

    match request {
        Ok((target, _)) => Ok(NegotiationResult {
            protocol: ProtocolKind::Socks5,
            target,
            replay: (!leftover.is_empty()).then(|| leftover.to_vec()),
        }),
        Err(e) => {
            if let Some(code) = e.reply_code() {
                if let Err(write_err) = send_reply(stream, code).await {
                    debug!("failed to send {code:?} reply: {write_err}");
                }
            }
            Err(e)
        }
    }
}
