//! Performance-enhancing TCP proxy for DASH segment traffic.
//!
//! Each accepted connection is paired with a connection to its destination,
//! both sockets are tuned, and bytes are relayed in both directions until
//! either side closes.

pub mod args;
pub mod config;
mod connection;
pub mod error;
pub mod event;
pub mod relay;
pub mod request;
pub mod server;
pub mod stats;
pub mod tuning;
pub mod utils;

pub use config::{KeepaliveTuning, ProxyConfig, SocketTuning};
pub use error::ProxyError;
pub use event::{ProxyEvent, ProxyEventCallback, RelayMode};
pub use server::ProxyServer;
pub use stats::{ProxyStats, StatsSnapshot};
