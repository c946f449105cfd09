use std::io;

use serde::Serialize;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::SocketTuning;

/// Socket options as reported by the kernel after tuning. Linux doubles the
/// requested buffer sizes and caps them at `net.core.{r,w}mem_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedTuning {
    pub send_buffer_bytes: usize,
    pub receive_buffer_bytes: usize,
    pub nodelay: bool,
    pub keepalive: bool,
    pub keepalive_idle_seconds: Option<u64>,
    pub keepalive_interval_seconds: Option<u64>,
    pub keepalive_retries: Option<u32>,
}

/// Applies `tuning` to `stream` and reads the effective values back.
pub fn apply(stream: &TcpStream, tuning: &SocketTuning) -> io::Result<AppliedTuning> {
    let socket = SockRef::from(stream);
    socket.set_send_buffer_size(tuning.send_buffer_bytes)?;
    socket.set_recv_buffer_size(tuning.receive_buffer_bytes)?;
    socket.set_nodelay(tuning.nodelay)?;

    match &tuning.keepalive {
        Some(keepalive) => {
            let params = TcpKeepalive::new().with_time(keepalive.idle);
            #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd", windows))]
            let params = params.with_interval(keepalive.interval);
            #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
            let params = params.with_retries(keepalive.retries);
            socket.set_tcp_keepalive(&params)?;
        }
        None => socket.set_keepalive(false)?,
    }

    let applied = read_back(&socket)?;
    debug!("Applied socket tuning: {applied:?}");
    Ok(applied)
}

fn read_back(socket: &SockRef<'_>) -> io::Result<AppliedTuning> {
    let keepalive = socket.keepalive()?;

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
    let (idle, interval, retries) = if keepalive {
        (
            Some(socket.keepalive_time()?.as_secs()),
            Some(socket.keepalive_interval()?.as_secs()),
            Some(socket.keepalive_retries()?),
        )
    } else {
        (None, None, None)
    };
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd")))]
    let (idle, interval, retries) = (None, None, None);

    Ok(AppliedTuning {
        send_buffer_bytes: socket.send_buffer_size()?,
        receive_buffer_bytes: socket.recv_buffer_size()?,
        nodelay: socket.nodelay()?,
        keepalive,
        keepalive_idle_seconds: idle,
        keepalive_interval_seconds: interval,
        keepalive_retries: retries,
    })
}
