use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::ProxyConfig;
use crate::connection::{handle, Shared};
use crate::error::ProxyError;
use crate::event::ProxyEventCallback;
use crate::stats::ProxyStats;

/// Accept loop of the proxy. Every accepted connection runs as its own task.
pub struct ProxyServer {
    listener: TcpListener,
    config: ProxyConfig,
    stats: Arc<ProxyStats>,
    callback: Option<ProxyEventCallback>,
    cancel: CancellationToken,
}

impl ProxyServer {
    /// Binds the listening socket. Must be called from within a Tokio runtime.
    pub fn bind(config: ProxyConfig) -> Result<Self, ProxyError> {
        config.validate()?;
        let addr = config
            .listen_addr()
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ProxyError::Config(format!("{} does not resolve", config.listen_addr())))?;
        let listener = listen(addr)?;
        Ok(Self {
            listener,
            config,
            stats: Arc::new(ProxyStats::default()),
            callback: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_callback(mut self, callback: ProxyEventCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ProxyStats> {
        self.stats.clone()
    }

    /// Cancelling the token stops accepting and closes every open connection.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[instrument(skip_all)]
    pub async fn run(self) -> Result<(), ProxyError> {
        let shared = Arc::new(Shared {
            config: self.config,
            stats: self.stats,
            callback: self.callback,
        });
        info!(
            "Proxy listening on {}, default target {}:{}",
            self.listener.local_addr()?,
            shared.config.target_host,
            shared.config.target_port
        );

        let mut next_id: u64 = 0;
        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = self.cancel.cancelled() => break,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    warn!("Accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };
            next_id += 1;
            tokio::spawn(handle(stream, peer, next_id, shared.clone(), self.cancel.child_token()));
        }

        info!("Proxy stopped after {} connections", next_id);
        Ok(())
    }
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let sock = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM, // Will become SOCK_CLOEXEC internally on Linux
        None,
    )?;

    sock.set_reuse_address(true)?;
    #[cfg(unix)]
    sock.set_reuse_port(true)?;
    sock.set_nonblocking(true)?;
    sock.bind(&addr.into())?;
    sock.listen(1024)?;

    TcpListener::from_std(sock.into())
}
