use crate::{error::HandshakeError, protocol::AddressType};
use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};
use tokio::io::{AsyncRead, AsyncReadExt};

/// TargetAddr is the upstream host and port a client asked for. IP
/// addresses are kept in their textual form so every address type dials
/// through the same resolver path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

impl TargetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// parse_address_from_stream contains logic to parse the network address
/// from an incoming client connection request: IPv4, IPv6, or domain name
pub async fn parse_address_from_stream<R>(
    stream: &mut R,
) -> Result<(TargetAddr, AddressType), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    // Read address type byte from stream
    let mut atype = [0u8; 1];
    stream
        .read_exact(&mut atype)
        .await
        .map_err(HandshakeError::on_read("address type"))?;

    let addr_type = AddressType::from_byte(atype[0])
        .ok_or(HandshakeError::UnsupportedAddressType(atype[0]))?;

    // Match type and extract address or domain name
    let host = match addr_type {
        AddressType::IPv4 => {
            let mut addr = [0u8; 4];
            stream
                .read_exact(&mut addr)
                .await
                .map_err(HandshakeError::on_read("IPv4 address"))?;
            Ipv4Addr::from(addr).to_string()
        }
        AddressType::DomainName => {
            // First octet in DomainName contains the number of
            // octets to follow
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(HandshakeError::on_read("domain length"))?;
            if len[0] == 0 {
                return Err(HandshakeError::InvalidDomain);
            }

            let mut domain = vec![0u8; len[0] as usize];
            stream
                .read_exact(&mut domain)
                .await
                .map_err(HandshakeError::on_read("domain name"))?;
            String::from_utf8(domain).map_err(|_| HandshakeError::InvalidDomain)?
        }
        AddressType::IPv6 => {
            let mut addr = [0u8; 16];
            stream
                .read_exact(&mut addr)
                .await
                .map_err(HandshakeError::on_read("IPv6 address"))?;
            Ipv6Addr::from(addr).to_string()
        }
    };

    // Port is always two bytes, network order
    let mut port_buf = [0u8; 2];
    stream
        .read_exact(&mut port_buf)
        .await
        .map_err(HandshakeError::on_read("destination port"))?;
    let port = u16::from_be_bytes(port_buf);

    Ok((TargetAddr { host, port }, addr_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(bytes: &[u8]) -> Result<(TargetAddr, AddressType), HandshakeError> {
        let mut reader = bytes;
        parse_address_from_stream(&mut reader).await
    }

    #[tokio::test]
    async fn parses_ipv4() {
        let (target, atyp) = parse(&[0x01, 127, 0, 0, 1, 0x1F, 0x90]).await.unwrap();
        assert_eq!(atyp, AddressType::IPv4);
        assert_eq!(target, TargetAddr::new("127.0.0.1", 8080));
    }

    #[tokio::test]
    async fn domain_reads_exactly_length_bytes_then_port() {
        let mut bytes = vec![0x03, 11];
        bytes.extend_from_slice(b"example.org");
        bytes.extend_from_slice(&443u16.to_be_bytes());
        // Trailing payload must stay unread
        bytes.extend_from_slice(b"GET");

        let mut reader = &bytes[..];
        let (target, atyp) = parse_address_from_stream(&mut reader).await.unwrap();
        assert_eq!(atyp, AddressType::DomainName);
        assert_eq!(target, TargetAddr::new("example.org", 443));
        assert_eq!(reader, b"GET");
    }

    #[tokio::test]
    async fn parses_ipv6() {
        let mut bytes = vec![0x04];
        bytes.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        bytes.extend_from_slice(&[0x00, 0x50]);

        let (target, atyp) = parse(&bytes).await.unwrap();
        assert_eq!(atyp, AddressType::IPv6);
        assert_eq!(target, TargetAddr::new("::1", 80));
        assert_eq!(target.to_string(), "[::1]:80");
    }

    #[tokio::test]
    async fn unknown_address_type() {
        let err = parse(&[0x02, 1, 2, 3, 4]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedAddressType(0x02)));
    }

    #[tokio::test]
    async fn truncated_port() {
        let err = parse(&[0x01, 10, 0, 0, 1, 0x00]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Truncated("destination port")));
    }

    #[tokio::test]
    async fn empty_or_invalid_domain() {
        let err = parse(&[0x03, 0, 0x00, 0x50]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidDomain));

        let err = parse(&[0x03, 2, 0xFF, 0xFE, 0x00, 0x50]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidDomain));
    }
}
