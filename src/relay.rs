//! Bidirectional byte pump between a client and its upstream.
//!
//! Each direction runs as its own task. Whichever direction finishes first
//! (EOF or error) shuts its write side and trips a shared token; the other
//! direction abandons whatever read or write it is blocked in as soon as it
//! sees the token. [`relay`] returns after both tasks are joined, at which
//! point every half of both streams has been dropped.
//!
//! Half-closed connections are not kept alive: one side finishing ends the
//! whole relay.

use crate::error::RelayError;
use std::{fmt, io};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bytes moved per read
pub const RELAY_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => f.write_str("client->upstream"),
            Direction::UpstreamToClient => f.write_str("upstream->client"),
        }
    }
}

/// RelayStats summarizes a finished relay
#[derive(Debug, Default)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    pub errors: Vec<RelayError>,
}

/// relay copies bytes both ways between `client` and `upstream` until either
/// side closes or fails
pub async fn relay<C, U>(client: C, upstream: U) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);
    let closed = CancellationToken::new();

    let outbound = tokio::spawn(pump(
        Direction::ClientToUpstream,
        client_read,
        upstream_write,
        closed.clone(),
    ));
    let inbound = tokio::spawn(pump(
        Direction::UpstreamToClient,
        upstream_read,
        client_write,
        closed,
    ));

    let mut stats = RelayStats::default();
    stats.client_to_upstream = join(Direction::ClientToUpstream, outbound, &mut stats.errors).await;
    stats.upstream_to_client = join(Direction::UpstreamToClient, inbound, &mut stats.errors).await;
    stats
}

async fn join(
    direction: Direction,
    handle: JoinHandle<(u64, Option<io::Error>)>,
    errors: &mut Vec<RelayError>,
) -> u64 {
    match handle.await {
        Ok((bytes, None)) => bytes,
        Ok((bytes, Some(source))) => {
            errors.push(RelayError::Io { direction, source });
            bytes
        }
        Err(source) => {
            errors.push(RelayError::Join { direction, source });
            0
        }
    }
}

/// pump moves bytes from `reader` to `writer` and returns how many were
/// fully written, plus the error that ended it if it was not a clean EOF
async fn pump<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    closed: CancellationToken,
) -> (u64, Option<io::Error>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_CHUNK];
    let mut total = 0u64;

    let error = loop {
        let n = tokio::select! {
            _ = closed.cancelled() => break None,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break None,
                Ok(n) => n,
                Err(e) => break Some(e),
            },
        };

        tokio::select! {
            _ = closed.cancelled() => break None,
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    break Some(e);
                }
            }
        }
        total += n as u64;
    };

    // Wake the opposite direction before touching our own writer
    closed.cancel();
    if let Err(e) = writer.shutdown().await {
        debug!("{direction} shutdown: {e}");
    }

    debug!("{direction} finished after {total} bytes");
    (total, error)
}
