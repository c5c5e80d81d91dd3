use crate::{
    error::HandshakeError,
    protocol::{AuthMethod, Version},
};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// negotiate_auth answers the client hello found at the start of `chunk` and
/// returns how many bytes of `chunk` the hello occupied. Only the no-auth
/// method is ever selected; a client that does not offer it is told so and
/// gets NoAcceptableMethod back.
pub async fn negotiate_auth<S>(stream: &mut S, chunk: &[u8]) -> Result<usize, HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+
    let (methods, consumed) = parse_client_hello(chunk)?;

    // Retrieve desired method
    let method = select_auth_method(methods);

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    stream.write_all(&[Version::SOCKS5 as u8, method as u8]).await?;

    match method {
        AuthMethod::NoAuth => Ok(consumed),
        AuthMethod::NoAcceptable => Err(HandshakeError::NoAcceptableMethod),
    }
}

/// parse_client_hello splits the offered methods out of a buffered hello
fn parse_client_hello(chunk: &[u8]) -> Result<(&[u8], usize), HandshakeError> {
    if chunk.len() < 3 {
        return Err(HandshakeError::Truncated("client hello"));
    }

    // Ensure version is 0x05 -> SOCKS5
    if chunk[0] != Version::SOCKS5 as u8 {
        return Err(HandshakeError::UnsupportedVersion(chunk[0]));
    }

    let n_methods = chunk[1] as usize;
    let end = 2 + n_methods;
    if chunk.len() < end {
        return Err(HandshakeError::Truncated("client hello method list"));
    }

    Ok((&chunk[2..end], end))
}

/// select_auth_method walks the server's preference list and returns the
/// first method the client also offered
fn select_auth_method(client_methods: &[u8]) -> AuthMethod {
    // Preferred auth method order
    const PREFERRED_METHODS: &[AuthMethod] = &[AuthMethod::NoAuth];

    PREFERRED_METHODS
        .iter()
        .copied()
        .find(|preferred| client_methods.contains(&(*preferred as u8)))
        .unwrap_or(AuthMethod::NoAcceptable)
}
