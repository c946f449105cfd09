use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::ProxyError;
use crate::stats::ProxyStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToTarget => write!(f, "client->target"),
            Direction::TargetToClient => write!(f, "target->client"),
        }
    }
}

/// Bytes moved in each direction by one relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transferred {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

impl Transferred {
    pub fn total(&self) -> u64 {
        self.client_to_target + self.target_to_client
    }
}

/// A relay that ended early, with the bytes it moved before stopping.
#[derive(Debug)]
pub struct RelayFailure {
    pub error: ProxyError,
    pub transferred: Transferred,
}

/// Copies bytes both ways until both sides have closed their write half.
///
/// EOF on one side is forwarded as a write shutdown on the other, so a
/// client that half-closes still receives the rest of the response.
/// Cancelling `cancel` drops both sockets without affecting any other relay.
pub async fn relay(
    client: TcpStream,
    target: TcpStream,
    buffer_size: usize,
    stats: &ProxyStats,
    cancel: &CancellationToken,
) -> Result<Transferred, RelayFailure> {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut target_read, mut target_write) = target.into_split();
    let client_to_target = AtomicU64::new(0);
    let target_to_client = AtomicU64::new(0);

    let upstream = copy_half(
        &mut client_read,
        &mut target_write,
        Direction::ClientToTarget,
        buffer_size,
        [&client_to_target, &stats.bytes_client_to_target],
    );
    let downstream = copy_half(
        &mut target_read,
        &mut client_write,
        Direction::TargetToClient,
        buffer_size,
        [&target_to_client, &stats.bytes_target_to_client],
    );

    let outcome = tokio::select! {
        result = async { tokio::try_join!(upstream, downstream) } => result.map(|_| ()),
        _ = cancel.cancelled() => Err(ProxyError::Cancelled),
    };
    let transferred = Transferred {
        client_to_target: client_to_target.load(Ordering::Relaxed),
        target_to_client: target_to_client.load(Ordering::Relaxed),
    };
    match outcome {
        Ok(()) => Ok(transferred),
        Err(error) => Err(RelayFailure { error, transferred }),
    }
}

/// Copies one direction. Every chunk is added to the connection's own counter
/// and to the proxy-wide one, so partial totals survive a failure.
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    direction: Direction,
    buffer_size: usize,
    counters: [&AtomicU64; 2],
) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    let fail = |source| ProxyError::Relay { direction, source };

    loop {
        let n = reader.read(&mut buf).await.map_err(fail)?;
        if n == 0 {
            break;
        }
        // write_all only returns once the peer's window has taken the chunk,
        // so a slow reader throttles the fast side.
        writer.write_all(&buf[..n]).await.map_err(fail)?;
        total += n as u64;
        for counter in counters {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    trace!("{direction} reached EOF after {total} bytes");
    // The peer may already be gone; its own half reports that.
    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn half_close_still_delivers_the_reply() {
        // user <-> (client side | relay | target side) <-> origin
        let (mut user, client_side) = pair().await;
        let (target_side, mut origin) = pair().await;
        let stats = ProxyStats::default();
        let cancel = CancellationToken::new();

        let relay_task = tokio::spawn(async move {
            let stats = stats;
            let result = relay(client_side, target_side, 1024, &stats, &cancel).await;
            (result, stats.snapshot())
        });

        user.write_all(b"ping").await.unwrap();
        user.shutdown().await.unwrap();

        let mut request = Vec::new();
        origin.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"ping");
        origin.write_all(b"pong-pong").await.unwrap();
        drop(origin);

        let mut reply = Vec::new();
        user.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"pong-pong");

        let (result, snapshot) = relay_task.await.unwrap();
        let transferred = result.unwrap();
        assert_eq!(transferred.client_to_target, 4);
        assert_eq!(transferred.target_to_client, 9);
        assert_eq!(transferred.total(), 13);
        assert_eq!(snapshot.bytes_client_to_target, 4);
        assert_eq!(snapshot.bytes_target_to_client, 9);
    }

    #[tokio::test]
    async fn cancellation_closes_both_sides() {
        let (mut user, client_side) = pair().await;
        let (target_side, mut origin) = pair().await;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let relay_task = tokio::spawn(async move {
            let stats = ProxyStats::default();
            relay(client_side, target_side, 1024, &stats, &token).await
        });
        cancel.cancel();

        let failure = relay_task.await.unwrap().unwrap_err();
        assert!(matches!(failure.error, ProxyError::Cancelled));
        assert_eq!(failure.transferred, Transferred::default());
        let mut rest = Vec::new();
        assert_eq!(user.read_to_end(&mut rest).await.unwrap(), 0);
        assert_eq!(origin.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_keeps_the_bytes_already_relayed() {
        let (mut user, client_side) = pair().await;
        let (target_side, mut origin) = pair().await;
        let stats = std::sync::Arc::new(ProxyStats::default());
        let cancel = CancellationToken::new();

        let relay_stats = stats.clone();
        let relay_task =
            tokio::spawn(async move { relay(client_side, target_side, 1024, &relay_stats, &cancel).await });

        user.write_all(b"hello").await.unwrap();
        let mut request = [0u8; 5];
        origin.read_exact(&mut request).await.unwrap();
        socket2::SockRef::from(&origin)
            .set_linger(Some(std::time::Duration::ZERO))
            .unwrap();
        drop(origin);

        let failure = relay_task.await.unwrap().unwrap_err();
        assert!(matches!(
            failure.error,
            ProxyError::Relay { direction: Direction::TargetToClient, .. }
        ));
        assert_eq!(failure.transferred.client_to_target, 5);
        assert_eq!(failure.transferred.target_to_client, 0);
        assert_eq!(stats.snapshot().bytes_client_to_target, 5);
    }

    #[test]
    fn directions_display_as_arrows() {
        assert_eq!(Direction::ClientToTarget.to_string(), "client->target");
        assert_eq!(Direction::TargetToClient.to_string(), "target->client");
    }
}
