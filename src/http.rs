//! Target resolution for the minimal HTTP-style proxy flavor.
//!
//! Only the request line is inspected (plus the Host header for
//! origin-form targets). Nothing is rewritten: the caller replays the
//! buffered bytes to the upstream unchanged.

use crate::{address::TargetAddr, error::HandshakeError};

pub const DEFAULT_HTTP_PORT: u16 = 80;

/// parse_http_target resolves the upstream from a buffered request such as
/// `GET http://example.org:8000/path HTTP/1.1`
pub fn parse_http_target(chunk: &[u8]) -> Result<TargetAddr, HandshakeError> {
    let text = String::from_utf8_lossy(chunk);
    let mut lines = text.lines();

    let request_line = lines.next().ok_or(HandshakeError::MalformedRequestLine)?;
    let mut tokens = request_line.split_whitespace();
    let _method = tokens.next().ok_or(HandshakeError::MalformedRequestLine)?;
    let target = tokens.next().ok_or(HandshakeError::MalformedRequestLine)?;

    // Origin-form (`GET /path`) carries no authority, fall back to Host
    if target.starts_with('/') {
        let host = lines
            .take_while(|line| !line.is_empty())
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim().eq_ignore_ascii_case("host").then(|| value.trim())
            })
            .ok_or(HandshakeError::MalformedRequestLine)?;
        return split_authority(host);
    }

    // Strip the scheme if present
    let rest = match target.split_once("://") {
        Some((_, rest)) => rest,
        None => target,
    };

    // Authority ends at the first path delimiter
    let authority = match rest.find('/') {
        Some(idx) => &rest[..idx],
        None => rest,
    };

    split_authority(authority)
}

/// split_authority separates host and port at the first ':', defaulting to
/// port 80. Bracketed IPv6 literals keep their inner colons.
fn split_authority(authority: &str) -> Result<TargetAddr, HandshakeError> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or(HandshakeError::MalformedRequestLine)?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(HandshakeError::MalformedRequestLine),
        }
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(HandshakeError::MalformedRequestLine);
    }

    let port = match port {
        Some(digits) => digits
            .parse::<u16>()
            .map_err(|_| HandshakeError::InvalidPort(digits.to_string()))?,
        None => DEFAULT_HTTP_PORT,
    };

    Ok(TargetAddr::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(request: &str) -> TargetAddr {
        parse_http_target(request.as_bytes()).unwrap()
    }

    #[test]
    fn absolute_uri_with_port() {
        let t = target("GET http://example.org:8000/path HTTP/1.1\r\nHost: example.org:8000\r\n\r\n");
        assert_eq!(t, TargetAddr::new("example.org", 8000));
    }

    #[test]
    fn absolute_uri_defaults_to_port_80() {
        let t = target("GET http://example.org/index.html HTTP/1.1\r\n\r\n");
        assert_eq!(t, TargetAddr::new("example.org", 80));

        let t = target("GET http://example.org HTTP/1.0\r\n\r\n");
        assert_eq!(t, TargetAddr::new("example.org", 80));
    }

    #[test]
    fn connect_style_authority() {
        let t = target("CONNECT example.org:443 HTTP/1.1\r\nHost: example.org:443\r\n\r\n");
        assert_eq!(t, TargetAddr::new("example.org", 443));
    }

    #[test]
    fn colon_after_path_is_not_a_port() {
        let t = target("GET http://example.org/a:b HTTP/1.1\r\n\r\n");
        assert_eq!(t, TargetAddr::new("example.org", 80));
    }

    #[test]
    fn origin_form_uses_host_header() {
        let t = target("GET /path HTTP/1.1\r\nUser-Agent: x\r\nhost: example.org:8080\r\n\r\n");
        assert_eq!(t, TargetAddr::new("example.org", 8080));
    }

    #[test]
    fn bracketed_ipv6() {
        let t = target("GET http://[::1]:8080/ HTTP/1.1\r\n\r\n");
        assert_eq!(t, TargetAddr::new("::1", 8080));

        let t = target("GET http://[::1]/ HTTP/1.1\r\n\r\n");
        assert_eq!(t, TargetAddr::new("::1", 80));
    }

    #[test]
    fn rejects_malformed_lines() {
        for request in ["", "GET\r\n\r\n", "GET http://:80/ HTTP/1.1\r\n", "GET /x HTTP/1.1\r\n\r\n"] {
            let err = parse_http_target(request.as_bytes()).unwrap_err();
            assert!(
                matches!(err, HandshakeError::MalformedRequestLine),
                "{request:?} -> {err:?}"
            );
        }
    }

    #[test]
    fn rejects_bad_port() {
        let err = parse_http_target(b"GET http://example.org:99999/ HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidPort(p) if p == "99999"));

        let err = parse_http_target(b"GET http://example.org:/ HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidPort(p) if p.is_empty()));
    }
}
