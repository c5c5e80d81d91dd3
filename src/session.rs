use crate::{
    address::TargetAddr,
    commands::send_reply,
    config::Config,
    connector::dial,
    error::HandshakeError,
    events::EventSink,
    negotiate::{NegotiationResult, ProtocolKind, negotiate},
    protocol::ReplyCode,
    relay::relay,
};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};
use tracing::{debug, info, warn};

/// How long a failed handshake keeps reading client bytes before closing
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound on client bytes discarded while draining
const DRAIN_LIMIT: u64 = 64 * 1024;

/// SessionState tracks one client connection from accept to teardown.
/// Closed, Rejected and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Negotiating,
    Resolved,
    Connecting,
    Relaying,
    Closed,
    Rejected,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Closed | SessionState::Rejected | SessionState::Failed
        )
    }
}

/// Session drives a single accepted connection. The client stream is owned
/// by [`Session::run`]; the upstream stream only exists once a dial has
/// succeeded, and both are dropped (closed) before `run` returns.
pub struct Session {
    pub id: u64,
    pub peer: SocketAddr,
    pub started_at: Instant,
    state: SessionState,
    target: Option<TargetAddr>,
    config: Arc<Config>,
    events: EventSink,
}

/// Session implementation block
impl Session {
    pub fn new(id: u64, peer: SocketAddr, config: Arc<Config>, events: EventSink) -> Self {
        Self {
            id,
            peer,
            started_at: Instant::now(),
            state: SessionState::Accepted,
            target: None,
            config,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> Option<&TargetAddr> {
        self.target.as_ref()
    }

    /// run takes the session through negotiation, dialing and relaying and
    /// returns the terminal state it ended in. Errors never escape: each one
    /// is recorded as an event and ends this session only.
    pub async fn run(mut self, mut client: TcpStream) -> SessionState {
        self.transition(SessionState::Negotiating);

        let negotiated = match self.handshake(&mut client).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                let terminal = match e {
                    HandshakeError::NoAcceptableMethod => SessionState::Rejected,
                    _ => SessionState::Failed,
                };
                self.event(format!("handshake from {} failed: {e}", self.peer));
                self.drain(&mut client).await;
                return self.finish(terminal);
            }
        };

        let NegotiationResult {
            protocol,
            target,
            replay,
        } = negotiated;
        self.target = Some(target.clone());
        self.transition(SessionState::Resolved);
        self.event(format!("{protocol} request from {} to {target}", self.peer));

        self.transition(SessionState::Connecting);
        let mut upstream = match dial(&target.host, target.port, self.config.connect_timeout).await {
            Ok(upstream) => upstream,
            Err(e) => {
                self.event(format!("failed to reach {target}: {e}"));
                // The HTTP-style flavor has no failure frame, the client
                // just sees the connection close
                if protocol == ProtocolKind::Socks5 {
                    if let Err(write_err) = send_reply(&mut client, ReplyCode::ConnectionRefused).await {
                        debug!("session {}: failed to send failure reply: {write_err}", self.id);
                    }
                }
                return self.finish(SessionState::Failed);
            }
        };

        if protocol == ProtocolKind::Socks5 {
            if let Err(e) = send_reply(&mut client, ReplyCode::Succeeded).await {
                self.event(format!("failed to confirm connection to {}: {e}", self.peer));
                return self.finish(SessionState::Failed);
            }
        }

        if let Some(replay) = replay {
            if let Err(e) = upstream.write_all(&replay).await {
                self.event(format!("failed to forward request to {target}: {e}"));
                return self.finish(SessionState::Failed);
            }
        }

        self.transition(SessionState::Relaying);
        self.event(format!("relaying {} <-> {target}", self.peer));

        let stats = relay(client, upstream).await;
        for err in &stats.errors {
            self.event(format!("relay error {} <-> {target}: {err}", self.peer));
        }
        self.event(format!(
            "closed {} <-> {target}: {} bytes sent, {} bytes received in {:.1?}",
            self.peer,
            stats.client_to_upstream,
            stats.upstream_to_client,
            self.started_at.elapsed()
        ));

        self.finish(SessionState::Closed)
    }

    async fn handshake(&self, client: &mut TcpStream) -> Result<NegotiationResult, HandshakeError> {
        match self.config.handshake_timeout {
            Some(limit) => time::timeout(limit, negotiate(client))
                .await
                .map_err(|_| HandshakeError::Timeout(limit))?,
            None => negotiate(client).await,
        }
    }

    /// drain half-closes the client and discards whatever it still sends, so
    /// the socket is closed with FIN rather than reset over unread bytes and
    /// any error reply already written reaches the client
    async fn drain(&self, client: &mut TcpStream) {
        if let Err(e) = client.shutdown().await {
            debug!("session {}: shutdown after failed handshake: {e}", self.id);
            return;
        }
        let mut rest = (&mut *client).take(DRAIN_LIMIT);
        match time::timeout(DRAIN_TIMEOUT, io::copy(&mut rest, &mut io::sink())).await {
            Ok(Ok(n)) if n > 0 => debug!("session {}: discarded {n} trailing bytes", self.id),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("session {}: drain failed: {e}", self.id),
            Err(_) => debug!("session {}: client still open after drain", self.id),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    fn finish(mut self, terminal: SessionState) -> SessionState {
        self.transition(terminal);
        match terminal {
            SessionState::Closed => info!("session {} closed", self.id),
            _ => warn!("session {} ended {:?}", self.id, terminal),
        }
        terminal
    }

    fn event(&self, message: String) {
        debug!("session {}: {message}", self.id);
        self.events.push(format!("[#{}] {message}", self.id));
    }
}
