use std::time::Duration;

use crate::error::ProxyError;

/// Socket options applied to both legs of every relayed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketTuning {
    pub send_buffer_bytes: usize,
    pub receive_buffer_bytes: usize,
    pub nodelay: bool,
    pub keepalive: Option<KeepaliveTuning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveTuning {
    /// Idle time before the first probe.
    pub idle: Duration,
    pub interval: Duration,
    pub retries: u32,
}

impl Default for KeepaliveTuning {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            retries: 6,
        }
    }
}

impl Default for SocketTuning {
    fn default() -> Self {
        Self {
            send_buffer_bytes: 2 * 1024 * 1024,
            receive_buffer_bytes: 2 * 1024 * 1024,
            nodelay: true,
            keepalive: Some(KeepaliveTuning::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_host: String,
    pub listen_port: u16,
    /// Destination for connections that do not name one themselves.
    pub target_host: String,
    pub target_port: u16,
    pub connect_timeout: Duration,
    /// How long a new client may take to send its request head, or its first
    /// bytes in transparent mode.
    pub head_timeout: Duration,
    pub tuning: SocketTuning,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8888,
            target_host: "dash.akamaized.net".to_string(),
            target_port: 443,
            connect_timeout: Duration::from_secs(10),
            head_timeout: Duration::from_secs(10),
            tuning: SocketTuning::default(),
        }
    }
}

impl ProxyConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.target_host.is_empty() || self.target_port == 0 {
            return Err(ProxyError::Config("a target host and non-zero port are required".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ProxyError::Config("connect timeout must be positive".to_string()));
        }
        if self.head_timeout.is_zero() {
            return Err(ProxyError::Config("request head timeout must be positive".to_string()));
        }
        if self.tuning.send_buffer_bytes == 0 || self.tuning.receive_buffer_bytes == 0 {
            return Err(ProxyError::Config("socket buffer sizes must be positive".to_string()));
        }
        Ok(())
    }

    /// Size of the per-direction copy buffer. Matches the receive buffer,
    /// capped so thousands of idle connections stay cheap.
    pub(crate) fn copy_buffer_size(&self) -> usize {
        self.tuning.receive_buffer_bytes.clamp(16 * 1024, 256 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_public_cdn() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:8888");
        assert_eq!(config.target_port, 443);
        assert_eq!(config.tuning.send_buffer_bytes, 2 * 1024 * 1024);
        assert!(config.validate().is_ok());
        assert_eq!(config.copy_buffer_size(), 256 * 1024);
    }

    #[test]
    fn zero_buffers_are_rejected() {
        let mut config = ProxyConfig::default();
        config.tuning.receive_buffer_bytes = 0;
        assert!(config.validate().is_err());
    }
}
