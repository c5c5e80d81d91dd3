use anyhow::{Context, Result};
use clap::Parser;
use minirelay::{Config, DEFAULT_FALLBACK_PORTS, EventSink, ProxyServer, Saturation};
use std::time::Duration;
use tokio::{signal, time};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 and HTTP-style proxy relay", long_about = None)]
struct Args {
    /// Listener host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Preferred listener port, tried before the fallback ports
    #[arg(short, long, default_value_t = 1080)]
    port: u16,

    /// Ports tried in order when the preferred one cannot be bound
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_FALLBACK_PORTS)]
    fallback_ports: Vec<u16>,

    /// Listen backlog
    #[arg(long, default_value_t = 100)]
    backlog: u32,

    /// Maximum concurrently running sessions
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    max_workers: u64,

    /// Close new connections instead of queueing them when every worker is busy
    #[arg(long, action)]
    reject_when_saturated: bool,

    /// Accept wait in milliseconds before the stop flag is re-checked
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    accept_timeout_ms: u64,

    /// Upstream connect timeout in seconds
    #[arg(long, default_value_t = 15)]
    connect_timeout: u64,

    /// Handshake timeout in seconds (0 = no timeout)
    #[arg(long, default_value_t = 30)]
    handshake_timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Result<Config> {
        let max_workers = usize::try_from(self.max_workers).context("max-workers out of range")?;
        let saturation = if self.reject_when_saturated {
            Saturation::Reject
        } else {
            Saturation::Queue
        };

        Ok(Config::new(self.host.clone(), self.port)
            .with_backlog(self.backlog)
            .with_max_workers(max_workers)
            .with_saturation(saturation)
            .with_accept_timeout(Duration::from_millis(self.accept_timeout_ms))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_handshake_timeout(
                (self.handshake_timeout > 0).then(|| Duration::from_secs(self.handshake_timeout)),
            ))
    }

    /// candidate_ports puts the preferred port first and drops repeats
    fn candidate_ports(&self) -> Vec<u16> {
        let mut ports = vec![self.port];
        for &port in &self.fallback_ports {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }
}

/// flush_events plays the external observer: it writes pending status lines
/// to the log
fn flush_events(events: &EventSink) {
    for event in events.drain() {
        info!(target: "minirelay::events", "{}", event.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let events = EventSink::default();
    let mut server = ProxyServer::new(args.config()?).with_events(events.clone());

    let ports = args.candidate_ports();
    let started = server.start_with_fallback(&ports).await;
    flush_events(&events);
    let addr = started.with_context(|| format!("could not listen on {} (ports {ports:?})", args.host))?;
    info!("Starting proxy relay: {addr}");

    let mut ticker = time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => flush_events(&events),
            res = signal::ctrl_c() => {
                res.context("failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    info!("Shutting down");
    server.stop().await;
    flush_events(&events);

    Ok(())
}
