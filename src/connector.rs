use crate::error::DialError;
use std::{io, time::Duration};
use tokio::{
    net::{TcpStream, lookup_host},
    time,
};
use tracing::debug;

/// dial opens a TCP connection to `host:port`. Resolution and every connect
/// attempt together are bounded by `timeout`; resolved addresses are tried
/// in order and the first that accepts wins.
pub async fn dial(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, DialError> {
    match time::timeout(timeout, connect(host, port)).await {
        Ok(result) => result,
        Err(_) => Err(DialError::Timeout {
            host: host.to_string(),
            port,
            timeout,
        }),
    }
}

async fn connect(host: &str, port: u16) -> Result<TcpStream, DialError> {
    let addrs = lookup_host((host, port))
        .await
        .map_err(|source| DialError::Resolve {
            host: host.to_string(),
            source,
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("failed to set TCP_NODELAY on {addr}: {e}");
                }
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("{addr} refused connection");
                last_err = Some(DialError::Refused { addr });
            }
            Err(source) => {
                debug!("connect to {addr} failed: {source}");
                last_err = Some(DialError::Io { addr, source });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| DialError::NoAddresses {
        host: host.to_string(),
    }))
}
