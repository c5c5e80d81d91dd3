use crate::{
    address::{TargetAddr, parse_address_from_stream},
    error::HandshakeError,
    protocol::{AddressType, Command, RSV, ReplyCode, Version},
};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// read_socks_request reads a SOCKS5 request frame and returns the CONNECT
/// target. BIND, UDP ASSOCIATE and unknown commands still have their address
/// read off the wire, so the client's frame is fully consumed, but the
/// address is discarded and never dialed.
pub async fn read_socks_request<R>(stream: &mut R) -> Result<(TargetAddr, AddressType), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    // Instantiate a request buffer & read
    let mut reqbuf = [0u8; 3];
    stream
        .read_exact(&mut reqbuf)
        .await
        .map_err(HandshakeError::on_read("request header"))?;

    let version = reqbuf[0];
    let command = reqbuf[1];
    // RSV is not checked

    if version != Version::SOCKS5 as u8 {
        return Err(HandshakeError::UnsupportedVersion(version));
    }

    match Command::from_byte(command) {
        Some(Command::Connect) => parse_address_from_stream(stream).await,
        _ => {
            match parse_address_from_stream(stream).await {
                Ok((target, _)) => debug!("ignoring target {target} of command {command:#04x}"),
                Err(e) => debug!("unreadable address behind command {command:#04x}: {e}"),
            }
            Err(HandshakeError::UnsupportedCommand(command))
        }
    }
}

/// send_reply writes a SOCKS5 reply frame. BND.ADDR and BND.PORT are always
/// reported as 0.0.0.0:0, whatever the upstream's local address really is.
pub async fn send_reply<W>(stream: &mut W, reply_code: ReplyCode) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    let reply = [
        Version::SOCKS5 as u8,
        reply_code as u8,
        RSV,
        AddressType::IPv4 as u8,
        0,
        0,
        0,
        0,
        0,
        0,
    ];

    stream.write_all(&reply).await?;
    stream.flush().await
}
