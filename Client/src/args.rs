// File: args.rs
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dash_player::config::DEFAULT_PEP_BUFFER_SIZE;
use dash_player::{Algorithm, FetcherConfig, PepConfig, PlayerConfig};
use tracing::level_filters::LevelFilter;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogLevel {
    Trace = 0, // Designates very fine-grained informational events, extremely verbose.
    Debug = 1, // Designates fine-grained informational events.
    Info = 2, // Designates informational messages.
    Warn = 3, // Designates hazardous situations.
    Error = 4, // Designates very serious errors.
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum Playback {
    Basic,
    Sara,
    Netflix,
    /// Every algorithm, one after the other
    All,
}

impl Playback {
    pub fn algorithms(self) -> Vec<Algorithm> {
        match self {
            Playback::Basic => vec![Algorithm::Basic],
            Playback::Sara => vec![Algorithm::Sara],
            Playback::Netflix => vec![Algorithm::Netflix],
            Playback::All => Algorithm::ALL.to_vec(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = "A headless DASH client that emulates playback and logs adaptation behaviour.")]
pub struct Args {
    /// URL of the MPD file
    #[arg(short, long)]
    pub manifest: String,
    /// List all the representations and exit
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub list: bool,
    #[arg(short, long, value_enum, default_value = "basic")]
    pub playback: Playback,
    /// Stop after this many segments
    #[arg(short = 'n', long)]
    pub segment_limit: Option<usize>,
    /// Keep the downloaded segments in a TEMP_<random> directory
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub download: bool,
    /// Route segment requests through the PEP proxy
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub use_pep: bool,
    #[arg(long, default_value = "localhost")]
    pub pep_host: String,
    #[arg(long, default_value_t = 8888)]
    pub pep_port: u16,
    /// TCP receive buffer size in bytes for the PEP path
    #[arg(long, default_value_t = DEFAULT_PEP_BUFFER_SIZE)]
    pub buffer_size: usize,
    /// Skip certificate checks, for a PEP that terminates TLS
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub accept_invalid_certs: bool,
    /// Seconds allowed for one segment request
    #[arg(long, default_value_t = 5.0)]
    pub timeout: f64,
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,
    #[arg(long, default_value_t = 30.0)]
    pub max_buffer: f64,
    #[arg(long, default_value_t = 4.0)]
    pub initial_buffer: f64,
    #[arg(long, default_value_t = 3)]
    pub max_consecutive_failures: u32,
    #[arg(long, default_value = "info")]
    pub log_level: LogLevel,
    /// Append every player event to this file as JSON lines
    #[arg(long)]
    pub event_log: Option<PathBuf>,
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
    /// Player settings for one session. The PEP route is only configured
    /// when `--use-pep` is given.
    pub fn player_config(&self, artifact_dir: Option<PathBuf>) -> PlayerConfig {
        let proxy = self.use_pep.then(|| PepConfig {
            buffer_size: self.buffer_size,
            ..PepConfig::new(self.pep_host.clone(), self.pep_port)
        });
        PlayerConfig {
            max_buffer_seconds: self.max_buffer,
            initial_buffer_seconds: self.initial_buffer,
            max_consecutive_failures: self.max_consecutive_failures,
            fetch: FetcherConfig {
                timeout: Duration::from_secs_f64(self.timeout.max(0.0)),
                max_retries: self.max_retries,
                proxy,
                accept_invalid_certs: self.accept_invalid_certs,
                artifact_dir,
                ..FetcherConfig::default()
            },
            ..PlayerConfig::default()
        }
    }
}
