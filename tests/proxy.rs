use minirelay::{Config, EventSink, ProxyServer, Saturation};
use std::{net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(5);

async fn start_proxy(config: Config) -> (ProxyServer, SocketAddr) {
    let mut server = ProxyServer::new(config);
    let addr = server.start().await.unwrap();
    (server, addr)
}

fn local_config() -> Config {
    Config::new("127.0.0.1", 0).with_accept_timeout(Duration::from_millis(50))
}

fn connect_request(target: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = target else {
        panic!("tests only use IPv4 upstreams");
    };
    let mut req = vec![0x05, 0x01, 0x00, 0x01];
    req.extend_from_slice(&v4.ip().octets());
    req.extend_from_slice(&v4.port().to_be_bytes());
    req
}

/// socks5_connect runs the full client side of the handshake and returns
/// the 10-byte reply
async fn socks5_connect(proxy: SocketAddr, target: SocketAddr) -> (TcpStream, [u8; 10]) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    stream.write_all(&connect_request(target)).await.unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    (stream, reply)
}

#[tokio::test]
async fn socks5_round_trip() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = upstream.local_addr().unwrap();
    let (mut server, proxy) = start_proxy(local_config()).await;

    let (mut client, reply) = socks5_connect(proxy, target).await;
    assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    let (mut accepted, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

    client.write_all(b"ping from client").await.unwrap();
    let mut buf = [0u8; 16];
    accepted.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping from client");

    accepted.write_all(b"pong from upstream").await.unwrap();
    let mut buf = [0u8; 18];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong from upstream");

    server.stop().await;
}

#[tokio::test]
async fn http_style_request_is_forwarded_verbatim() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = upstream.local_addr().unwrap().port();
    let (mut server, proxy) = start_proxy(local_config()).await;

    let request = format!(
        "GET http://127.0.0.1:{port}/path HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n"
    );
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();

    let (mut accepted, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();
    let mut received = vec![0u8; request.len()];
    accepted.read_exact(&mut received).await.unwrap();
    assert_eq!(received, request.as_bytes());

    // The first bytes back are the upstream's own response
    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    accepted.write_all(response).await.unwrap();
    let mut buf = vec![0u8; response.len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, response);

    server.stop().await;
}

#[tokio::test]
async fn http_style_request_longer_than_first_read() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = upstream.local_addr().unwrap().port();
    let (mut server, proxy) = start_proxy(local_config()).await;

    let cookie = "c".repeat(1024);
    let request = format!(
        "GET http://127.0.0.1:{port}/ HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nCookie: {cookie}\r\n\r\n"
    );
    assert!(request.len() > minirelay::FIRST_CHUNK);

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();

    // The first read is replayed, the rest follows through the relay
    let (mut accepted, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();
    let mut received = vec![0u8; request.len()];
    timeout(WAIT, accepted.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, request.as_bytes());

    server.stop().await;
}

#[tokio::test]
async fn unsupported_command_is_never_dialed() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = upstream.local_addr().unwrap();
    let (mut server, proxy) = start_proxy(local_config()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();

    // BIND
    let mut request = connect_request(target);
    request[1] = 0x02;
    client.write_all(&request).await.unwrap();

    let mut reply = Vec::new();
    timeout(WAIT, client.read_to_end(&mut reply)).await.unwrap().unwrap();
    assert_eq!(reply, [0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    assert!(
        timeout(Duration::from_millis(200), upstream.accept()).await.is_err(),
        "proxy dialed the target of an unsupported command"
    );

    server.stop().await;
}

#[tokio::test]
async fn unreachable_target_gets_0x05() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = closed.local_addr().unwrap();
    drop(closed);
    let (mut server, proxy) = start_proxy(local_config()).await;

    let (mut client, reply) = socks5_connect(proxy, target).await;
    assert_eq!(reply, [0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    // Nothing is relayed, the proxy just hangs up
    let mut rest = Vec::new();
    timeout(WAIT, client.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn upstream_close_tears_down_client() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = upstream.local_addr().unwrap();
    let (mut server, proxy) = start_proxy(local_config()).await;

    let (mut client, _) = socks5_connect(proxy, target).await;
    let (mut accepted, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

    accepted.write_all(b"bye").await.unwrap();
    drop(accepted);

    // The client never closes, yet its side must still be shut
    let mut rest = Vec::new();
    timeout(WAIT, client.read_to_end(&mut rest))
        .await
        .expect("client side left open after upstream closed")
        .unwrap();
    assert_eq!(rest, b"bye");

    server.stop().await;
}

#[tokio::test]
async fn stop_leaves_running_sessions_alone() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = upstream.local_addr().unwrap();
    let (mut server, proxy) = start_proxy(local_config()).await;

    let (mut client, _) = socks5_connect(proxy, target).await;
    let (mut accepted, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

    server.stop().await;
    assert!(TcpStream::connect(proxy).await.is_err());

    client.write_all(b"still here").await.unwrap();
    let mut buf = [0u8; 10];
    accepted.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still here");
}

#[tokio::test]
async fn saturated_pool_rejects_when_configured() {
    let events = EventSink::default();
    let config = local_config()
        .with_max_workers(1)
        .with_handshake_timeout(None)
        .with_saturation(Saturation::Reject);
    let mut server = ProxyServer::new(config).with_events(events.clone());
    let proxy = server.start().await.unwrap();

    // Holds the only worker by never finishing its handshake
    let _idle = TcpStream::connect(proxy).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let mut second = TcpStream::connect(proxy).await.unwrap();
    let mut buf = [0u8; 1];
    let read = timeout(WAIT, second.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)), "rejected client got {read:?}");

    server.stop().await;
    assert!(
        events.drain().iter().any(|e| e.message.contains("rejected")),
        "no rejection event"
    );
}

#[tokio::test]
async fn saturated_pool_queues_by_default() {
    let events = EventSink::default();
    let config = local_config()
        .with_max_workers(1)
        .with_handshake_timeout(None);
    let mut server = ProxyServer::new(config).with_events(events.clone());
    let proxy = server.start().await.unwrap();

    let idle = TcpStream::connect(proxy).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let mut queued = TcpStream::connect(proxy).await.unwrap();
    queued.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

    // No worker is free, so the hello sits unanswered
    let mut method = [0u8; 2];
    assert!(
        timeout(Duration::from_millis(200), queued.read_exact(&mut method))
            .await
            .is_err()
    );

    // The waiting connection is already visible to the observer
    let messages: Vec<_> = events.drain().into_iter().map(|e| e.message).collect();
    assert!(
        messages.iter().any(|m| m.starts_with("[#2] accepted")),
        "{messages:?}"
    );
    assert!(
        messages.iter().any(|m| m.starts_with("[#2] queued")),
        "{messages:?}"
    );

    // Freeing the worker lets the queued session run
    drop(idle);
    timeout(WAIT, queued.read_exact(&mut method))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(method, [0x05, 0x00]);

    server.stop().await;
}

#[tokio::test]
async fn milestones_reach_the_event_sink() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = upstream.local_addr().unwrap();
    let events = EventSink::default();
    let mut server = ProxyServer::new(local_config()).with_events(events.clone());
    let proxy = server.start().await.unwrap();

    let (client, _) = socks5_connect(proxy, target).await;
    let (accepted, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();
    drop(client);
    drop(accepted);

    // Give the session a moment to record its close
    let mut messages = Vec::new();
    for _ in 0..50 {
        messages.extend(events.drain().into_iter().map(|e| e.message));
        if messages.iter().any(|m| m.contains("closed")) {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    server.stop().await;

    let expected = ["listening on", "accepted", "SOCKS5 request", "relaying", "closed"];
    let mut position = 0;
    for needle in expected {
        let found = messages[position..]
            .iter()
            .position(|m| m.contains(needle))
            .unwrap_or_else(|| panic!("missing {needle:?} in {messages:?}"));
        position += found + 1;
    }
}
