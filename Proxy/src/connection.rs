use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::event::{ProxyEvent, ProxyEventCallback, RelayMode};
use crate::relay::{relay, RelayFailure, Transferred};
use crate::request::{read_request, ClientRequest};
use crate::stats::ProxyStats;
use crate::tuning;

const TUNNEL_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// State every connection handler reads. Configuration is immutable and the
/// counters are atomics, so handlers never wait on each other.
pub(crate) struct Shared {
    pub config: ProxyConfig,
    pub stats: Arc<ProxyStats>,
    pub callback: Option<ProxyEventCallback>,
}

impl Shared {
    fn emit(&self, event: ProxyEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}

/// Serves one accepted connection to completion. Errors end this connection
/// only and are reported through the event callback.
#[instrument(skip_all, fields(id = connection_id, %peer))]
pub(crate) async fn handle(
    mut client: TcpStream,
    peer: SocketAddr,
    connection_id: u64,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    shared.stats.connection_opened();
    shared.emit(ProxyEvent::Accepted { connection_id, peer });

    let target = tokio::select! {
        result = establish(&mut client, connection_id, &shared) => result,
        _ = cancel.cancelled() => {
            shared.stats.connection_closed(false);
            shared.emit(closed_event(connection_id, Transferred::default(), started.elapsed().as_secs_f64()));
            return;
        }
    };
    let target = match target {
        Ok(target) => target,
        Err(e) => {
            let response = e.response();
            fail(&shared, connection_id, e, Transferred::default(), started.elapsed().as_secs_f64());
            if let Some(response) = response {
                // Best effort, the client may already be gone.
                let _ = client.write_all(response).await;
                let _ = client.shutdown().await;
            }
            return;
        }
    };

    let buffer_size = shared.config.copy_buffer_size();
    match relay(client, target, buffer_size, &shared.stats, &cancel).await {
        Ok(transferred) => {
            let duration = started.elapsed().as_secs_f64();
            info!(
                "Closed after {duration:.2}s: {} bytes up, {} bytes down",
                transferred.client_to_target, transferred.target_to_client
            );
            shared.stats.connection_closed(false);
            shared.emit(closed_event(connection_id, transferred, duration));
        }
        Err(RelayFailure {
            error: ProxyError::Cancelled,
            transferred,
        }) => {
            info!("Cancelled after {} bytes", transferred.total());
            shared.stats.connection_closed(false);
            shared.emit(closed_event(connection_id, transferred, started.elapsed().as_secs_f64()));
        }
        Err(RelayFailure { error, transferred }) => {
            fail(&shared, connection_id, error, transferred, started.elapsed().as_secs_f64())
        }
    }
}

fn fail(shared: &Shared, connection_id: u64, error: ProxyError, transferred: Transferred, duration_seconds: f64) {
    warn!("Connection failed after {} bytes: {error}", transferred.total());
    shared.stats.connection_closed(true);
    shared.emit(ProxyEvent::Error {
        connection_id,
        error: error.to_string(),
        client_to_target: transferred.client_to_target,
        target_to_client: transferred.target_to_client,
        duration_seconds,
        transfer_rate_bps: transfer_rate(transferred, duration_seconds),
    });
}

/// Bits per second over `duration_seconds`, counting both directions.
fn transfer_rate(transferred: Transferred, duration_seconds: f64) -> f64 {
    if duration_seconds > 0.0 {
        transferred.total() as f64 * 8.0 / duration_seconds
    } else {
        0.0
    }
}

fn closed_event(connection_id: u64, transferred: Transferred, duration_seconds: f64) -> ProxyEvent {
    ProxyEvent::Closed {
        connection_id,
        client_to_target: transferred.client_to_target,
        target_to_client: transferred.target_to_client,
        duration_seconds,
        transfer_rate_bps: transfer_rate(transferred, duration_seconds),
    }
}

/// Reads the request head, dials the destination and sends whatever the
/// client already wrote. Returns the tuned target socket ready for relaying.
async fn establish(client: &mut TcpStream, connection_id: u64, shared: &Shared) -> Result<TcpStream, ProxyError> {
    let config = &shared.config;
    let client_tuning = tuning::apply(client, &config.tuning)?;

    let request = timeout(config.head_timeout, read_request(client, config.copy_buffer_size()))
        .await
        .map_err(|_| ProxyError::HeadTimeout {
            after: config.head_timeout,
        })??;
    let (host, port, mode, pending) = match request {
        ClientRequest::Connect { host, port, leftover } => (host, port, RelayMode::Tunnel, leftover),
        ClientRequest::Forward { host, port, head } => (host, port, RelayMode::Forward, head),
        ClientRequest::Transparent { bytes } => (config.target_host.clone(), config.target_port, RelayMode::Transparent, bytes),
    };

    let target_name = format!("{host}:{port}");
    debug!("Dialing {target_name} ({mode:?})");
    let mut target = match timeout(config.connect_timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(ProxyError::Dial { target: target_name, source }),
        Err(_) => {
            return Err(ProxyError::DialTimeout {
                target: target_name,
                after: config.connect_timeout,
            })
        }
    };
    let target_tuning = tuning::apply(&target, &config.tuning)?;

    if mode == RelayMode::Tunnel {
        client.write_all(TUNNEL_ESTABLISHED).await?;
    }
    if !pending.is_empty() {
        target.write_all(&pending).await?;
    }

    info!("Relaying to {target_name}");
    shared.emit(ProxyEvent::Established {
        connection_id,
        target: target_name,
        mode,
        client_tuning,
        target_tuning,
    });
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_rate_covers_both_directions() {
        let transferred = Transferred {
            client_to_target: 1_000,
            target_to_client: 249_000,
        };
        let ProxyEvent::Closed { transfer_rate_bps, .. } = closed_event(3, transferred, 2.0) else {
            panic!("expected a closed event");
        };
        assert_eq!(transfer_rate_bps, 1_000_000.0);
    }

    #[test]
    fn zero_duration_reports_no_rate() {
        let ProxyEvent::Closed { transfer_rate_bps, .. } = closed_event(3, Transferred::default(), 0.0) else {
            panic!("expected a closed event");
        };
        assert_eq!(transfer_rate_bps, 0.0);
    }
}
