//! A lightweight forward-proxy relay
//!
//! ## Implementation
//!
//! - Features:
//!     - SOCKS5 CONNECT with IPv4, IPv6 and domain name targets
//!     - No Authentication (the only method offered)
//!     - Minimal HTTP-style proxying: the upstream is taken from the request
//!       line and the request itself is replayed verbatim
//!     - One tokio task per session, two per active relay
//!     - Bounded worker pool with queue-or-reject saturation policy
//!     - Fallback port list at startup
//!     - Pollable event feed for an external observer
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!
//! Not supported: authenticated methods, BIND, UDP ASSOCIATE, TLS.
//!
//! # Example
//! ```no_run
//! use minirelay::{Config, DEFAULT_FALLBACK_PORTS, ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = ProxyServer::new(Config::new("127.0.0.1", 1080));
//!     let addr = server.start_with_fallback(&DEFAULT_FALLBACK_PORTS).await?;
//!     println!("listening on {addr}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     for event in server.events().drain() {
//!         println!("{}", event.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod auth;
pub mod commands;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod http;
pub mod negotiate;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

// Re-export main types at crate root for convenience
pub use address::TargetAddr;
pub use config::{Config, DEFAULT_FALLBACK_PORTS, Saturation};
pub use connector::dial;
pub use error::{BindError, DialError, HandshakeError, RelayError};
pub use events::{EventSink, LogEvent};
pub use negotiate::{FIRST_CHUNK, NegotiationResult, ProtocolKind, negotiate};
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use relay::{RelayStats, relay};
pub use server::ProxyServer;
pub use session::{Session, SessionState};
