// File: args.rs
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::config::{KeepaliveTuning, ProxyConfig, SocketTuning};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogLevel {
    Trace = 0, // Designates very fine-grained informational events, extremely verbose.
    Debug = 1, // Designates fine-grained informational events.
    Info = 2, // Designates informational messages.
    Warn = 3, // Designates hazardous situations.
    Error = 4, // Designates very serious errors.
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = "A TCP performance-enhancing proxy that tunes and relays DASH segment traffic.")]
pub struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_host: String,
    #[arg(long, default_value_t = 8888)]
    pub listen_port: u16,
    /// Destination for connections that are not proxy requests
    #[arg(long, default_value = "dash.akamaized.net")]
    pub target_host: String,
    #[arg(long, default_value_t = 443)]
    pub target_port: u16,
    /// Seconds to wait for the target to accept a connection
    #[arg(long, default_value_t = 10.0)]
    pub connect_timeout: f64,
    /// Seconds a new client may take to send its request
    #[arg(long, default_value_t = 10.0)]
    pub head_timeout: f64,
    /// SO_SNDBUF for both legs, in bytes
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    pub send_buffer: usize,
    /// SO_RCVBUF for both legs, in bytes
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    pub receive_buffer: usize,
    /// Leave Nagle's algorithm enabled
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_nodelay: bool,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_keepalive: bool,
    #[arg(long, default_value_t = 60)]
    pub keepalive_idle: u64,
    #[arg(long, default_value_t = 10)]
    pub keepalive_interval: u64,
    #[arg(long, default_value_t = 6)]
    pub keepalive_retries: u32,
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
    /// Serve Prometheus metrics on this port
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

pub fn parse_args() -> Args {
    Args::parse()
}

pub fn get_log_level_filter(args: &Args) -> LevelFilter {
    // Map the LogLevel enum to the LevelFilter enum
    match args.log_level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    }
}

impl Args {
    pub fn proxy_config(&self) -> ProxyConfig {
        let keepalive = (!self.no_keepalive).then(|| KeepaliveTuning {
            idle: Duration::from_secs(self.keepalive_idle),
            interval: Duration::from_secs(self.keepalive_interval),
            retries: self.keepalive_retries,
        });
        ProxyConfig {
            listen_host: self.listen_host.clone(),
            listen_port: self.listen_port,
            target_host: self.target_host.clone(),
            target_port: self.target_port,
            connect_timeout: Duration::from_secs_f64(self.connect_timeout.max(0.0)),
            head_timeout: Duration::from_secs_f64(self.head_timeout.max(0.0)),
            tuning: SocketTuning {
                send_buffer_bytes: self.send_buffer,
                receive_buffer_bytes: self.receive_buffer,
                nodelay: !self.no_nodelay,
                keepalive,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_proxy_config() {
        let args = Args::parse_from(["pep-proxy"]);
        let config = args.proxy_config();
        let defaults = ProxyConfig::default();
        assert_eq!(config.listen_addr(), defaults.listen_addr());
        assert_eq!(config.target_host, defaults.target_host);
        assert_eq!(config.connect_timeout, defaults.connect_timeout);
        assert_eq!(config.head_timeout, defaults.head_timeout);
        assert_eq!(config.tuning, defaults.tuning);
        assert_eq!(get_log_level_filter(&args), LevelFilter::INFO);
    }

    #[test]
    fn flags_override_tuning() {
        let args = Args::parse_from([
            "pep-proxy",
            "--listen-port",
            "9000",
            "--receive-buffer",
            "65536",
            "--no-keepalive",
            "--no-nodelay",
            "-l",
            "debug",
        ]);
        let config = args.proxy_config();
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.tuning.receive_buffer_bytes, 65536);
        assert_eq!(config.tuning.keepalive, None);
        assert!(!config.tuning.nodelay);
        assert_eq!(get_log_level_filter(&args), LevelFilter::DEBUG);
    }
}
