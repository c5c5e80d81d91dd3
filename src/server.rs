use crate::{
    config::{Config, Saturation},
    error::BindError,
    events::EventSink,
    session::Session,
};
use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpSocket, lookup_host},
    sync::Semaphore,
    task::JoinHandle,
    time,
};
use tracing::{debug, error, info, warn};

const MIN_ACCEPT_TIMEOUT: Duration = Duration::from_millis(1);

/// ProxyServer owns the listening socket and the accept loop. Its lifecycle
/// is driven entirely by the caller through start and stop.
pub struct ProxyServer {
    config: Arc<Config>,
    events: EventSink,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

/// ProxyServer implementation block
impl ProxyServer {
    /// new is a constructor for the ProxyServer type
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            events: EventSink::default(),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            accept_task: None,
        }
    }

    /// with_events routes status lines to an existing sink
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// start binds the configured address and spawns the accept loop. A
    /// server that is already running just reports where it listens.
    pub async fn start(&mut self) -> Result<SocketAddr, BindError> {
        if let (true, Some(addr)) = (self.is_running(), self.local_addr) {
            return Ok(addr);
        }

        let (listener, addr) = match bind(&self.config).await {
            Ok(bound) => bound,
            Err(e) => {
                error!("{e}");
                self.events.push(format!("failed to start: {e}"));
                return Err(e);
            }
        };

        info!("proxy listening on {addr}");
        self.events.push(format!("listening on {addr}"));

        self.running.store(true, Ordering::SeqCst);
        self.local_addr = Some(addr);
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.config),
            self.events.clone(),
            Arc::clone(&self.running),
        )));

        Ok(addr)
    }

    /// start_with_fallback tries each port in order and keeps the first one
    /// that binds; later ports are not attempted
    pub async fn start_with_fallback(&mut self, ports: &[u16]) -> Result<SocketAddr, BindError> {
        let mut tried = Vec::with_capacity(ports.len());

        for &port in ports {
            if !self.is_running() {
                self.config = Arc::new(self.config.as_ref().clone().with_port(port));
            }
            match self.start().await {
                Ok(addr) => return Ok(addr),
                Err(e) => {
                    warn!("port {port} unavailable: {e}");
                    tried.push(port);
                }
            }
        }

        Err(BindError::Exhausted {
            host: self.config.bind_host.clone(),
            tried,
        })
    }

    /// stop halts new accepts and waits for the accept loop to exit. Sessions
    /// already running are left to finish on their own. Calling it on a
    /// stopped server does nothing.
    pub async fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        let Some(task) = self.accept_task.take() else {
            return;
        };
        if let Err(e) = task.await {
            error!("accept loop aborted: {e}");
        }

        if was_running {
            if let Some(addr) = self.local_addr.take() {
                info!("proxy on {addr} stopped");
                self.events.push(format!("stopped listening on {addr}"));
            }
        }
        self.local_addr = None;
    }
}

/// bind resolves the configured host and opens a listening socket with
/// address reuse enabled and the configured backlog. The returned address
/// is the one actually bound, which differs from the request for port 0.
async fn bind(config: &Config) -> Result<(TcpListener, SocketAddr), BindError> {
    let requested = config.listen_addr();
    let addr = lookup_host((config.bind_host.as_str(), config.bind_port))
        .await
        .map_err(|source| BindError::Resolve {
            addr: requested.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| BindError::Resolve {
            addr: requested,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|source| BindError::Bind { addr, source })?;

    socket
        .set_reuseaddr(true)
        .map_err(|source| BindError::Bind { addr, source })?;
    socket
        .bind(addr)
        .map_err(|source| BindError::Bind { addr, source })?;
    let listener = socket
        .listen(config.backlog)
        .map_err(|source| BindError::Bind { addr, source })?;
    let bound = listener
        .local_addr()
        .map_err(|source| BindError::Bind { addr, source })?;

    Ok((listener, bound))
}

/// accept_loop hands each connection to its own session task until the
/// running flag is cleared. Each accept waits at most accept_timeout so a
/// stop request is noticed promptly. Dropping the listener on exit closes
/// the listening socket.
async fn accept_loop(
    listener: TcpListener,
    config: Arc<Config>,
    events: EventSink,
    running: Arc<AtomicBool>,
) {
    let max_workers = config.max_workers.max(1);
    let workers = Arc::new(Semaphore::new(max_workers));
    // A zero wait would never park the loop between accepts
    let accept_timeout = config.accept_timeout.max(MIN_ACCEPT_TIMEOUT);
    let mut next_id: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let (stream, peer_addr) = match time::timeout(accept_timeout, listener.accept()).await {
            Err(_) => continue,
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("accept failed: {e}");
                events.push(format!("accept failed: {e}"));
                // Errors like EMFILE persist until some session closes
                time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        next_id += 1;
        let id = next_id;

        let permit = match config.saturation {
            Saturation::Queue => None,
            Saturation::Reject => match Arc::clone(&workers).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!("all {max_workers} workers busy, dropping {peer_addr}");
                    events.push(format!(
                        "[#{id}] rejected {peer_addr}: all {max_workers} workers busy"
                    ));
                    continue;
                }
            },
        };

        let workers = Arc::clone(&workers);
        let config = Arc::clone(&config);
        let events = events.clone();

        debug!("new client: {peer_addr}");
        events.push(format!("[#{id}] accepted {peer_addr}"));

        // Spawn async task
        tokio::spawn(async move {
            // Queued sessions wait here for a free worker slot
            let _permit = match permit {
                Some(permit) => permit,
                None => match Arc::clone(&workers).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!("all {max_workers} workers busy, {peer_addr} waits");
                        events.push(format!(
                            "[#{id}] queued {peer_addr}: all {max_workers} workers busy"
                        ));
                        match workers.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        }
                    }
                },
            };

            Session::new(id, peer_addr, config, events)
                .run(stream)
                .await;
        });
    }

    debug!("accept loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> Config {
        Config::new("127.0.0.1", 0).with_accept_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn start_and_stop() {
        let mut server = ProxyServer::new(local_config());
        assert!(!server.is_running());

        let addr = server.start().await.unwrap();
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));
        assert_ne!(addr.port(), 0);

        // A second start is a no-op
        assert_eq!(server.start().await.unwrap(), addr);

        server.stop().await;
        assert!(!server.is_running());
        assert_eq!(server.local_addr(), None);

        // The listening socket is gone once stop returns
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());

        // stop is idempotent
        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn zero_accept_timeout_still_stops() {
        let mut server = ProxyServer::new(local_config().with_accept_timeout(Duration::ZERO));
        server.start().await.unwrap();
        time::timeout(Duration::from_secs(5), server.stop())
            .await
            .unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let events = EventSink::default();
        let mut server = ProxyServer::new(local_config().with_port(port)).with_events(events.clone());
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, BindError::Bind { .. }));
        assert!(!server.is_running());

        let messages: Vec<_> = events.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("failed to start"));
    }

    #[tokio::test]
    async fn fallback_keeps_first_port_that_binds() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let busy = taken.local_addr().unwrap().port();

        let mut server = ProxyServer::new(local_config());
        let addr = server.start_with_fallback(&[busy, 0]).await.unwrap();
        assert_ne!(addr.port(), busy);
        assert!(server.is_running());
        server.stop().await;
    }

    #[tokio::test]
    async fn fallback_exhausted() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let busy = taken.local_addr().unwrap().port();

        let mut server = ProxyServer::new(local_config());
        let err = server.start_with_fallback(&[busy]).await.unwrap_err();
        assert!(matches!(err, BindError::Exhausted { tried, .. } if tried == vec![busy]));
    }
}
