use std::time::Duration;

/// Ports tried in order when the configured one cannot be bound
pub const DEFAULT_FALLBACK_PORTS: [u16; 4] = [1080, 8080, 9050, 3128];

/// Saturation decides what happens to a connection accepted while every
/// worker slot is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Saturation {
    /// Spawn the session anyway and let it wait for a free slot. Waiting
    /// sessions are not bounded.
    #[default]
    Queue,
    /// Close the connection straight away
    Reject,
}

/// Config holds everything the server needs at start time. It is cloned
/// into the server and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,

    /// Listen backlog handed to the kernel
    pub backlog: u32,

    /// Sessions allowed to run at once; zero is treated as one
    pub max_workers: usize,

    /// Longest a single accept waits before the lifecycle flag is re-checked
    pub accept_timeout: Duration,

    /// Upper bound on resolving and connecting to an upstream
    pub connect_timeout: Duration,

    /// Upper bound on the whole negotiation phase, None for no bound
    pub handshake_timeout: Option<Duration>,

    pub saturation: Saturation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 1080,
            backlog: 100,
            max_workers: 100,
            accept_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(15),
            handshake_timeout: Some(Duration::from_secs(30)),
            saturation: Saturation::Queue,
        }
    }
}

/// Config implementation block
impl Config {
    /// new builds a default config listening on the given host and port
    pub fn new(bind_host: impl Into<String>, bind_port: u16) -> Self {
        Self {
            bind_host: bind_host.into(),
            bind_port,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, bind_port: u16) -> Self {
        self.bind_port = bind_port;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_saturation(mut self, saturation: Saturation) -> Self {
        self.saturation = saturation;
        self
    }

    /// listen_addr renders host:port for log lines, bracketing IPv6 hosts
    pub fn listen_addr(&self) -> String {
        if self.bind_host.contains(':') {
            format!("[{}]:{}", self.bind_host, self.bind_port)
        } else {
            format!("{}:{}", self.bind_host, self.bind_port)
        }
    }
}
