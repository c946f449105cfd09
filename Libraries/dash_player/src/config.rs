//! Tunables for a playback session. Every constant the adaptation papers leave
//! open is exposed here with a documented default.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default socket buffer size requested from the PEP path (2 MiB).
pub const DEFAULT_PEP_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Where the fetcher sends its requests when running through the PEP proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PepConfig {
    pub host: String,
    pub port: u16,
    /// Requested socket buffer size for the PEP path. The HTTP client offers no
    /// socket hook, so this is only logged when the fetcher is built.
    pub buffer_size: usize,
}

impl PepConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            buffer_size: DEFAULT_PEP_BUFFER_SIZE,
        }
    }

    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Budget for a single attempt. The whole retry sequence never exceeds
    /// `timeout * (max_retries + 1)`.
    pub timeout: Duration,
    pub max_retries: u32,
    /// First backoff delay, doubled on every further attempt.
    pub base_backoff: Duration,
    pub proxy: Option<PepConfig>,
    /// Needed when the PEP terminates TLS with its own certificate.
    pub accept_invalid_certs: bool,
    /// When set, every downloaded body is written below this directory.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
            proxy: None,
            accept_invalid_certs: false,
            artifact_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationConfig {
    /// Fraction of the measured throughput the BASIC and SARA strategies may commit to.
    pub safety_factor: f64,
    /// Slack added to the buffer level before SARA rejects a candidate.
    pub sara_margin_seconds: f64,
    /// Number of samples in SARA's weighted harmonic mean.
    pub sara_sample_count: usize,
    /// Below this buffer level the buffer-based strategy always picks the lowest tier.
    pub netflix_reservoir_seconds: f64,
    /// Above this buffer level the buffer-based strategy permits the highest sustainable tier.
    pub netflix_cushion_seconds: f64,
    /// Startup step-up threshold, as a fraction of the segment duration.
    pub netflix_startup_factor: f64,
    /// Buffer level at which the startup phase may hand over to the rate map.
    pub netflix_startup_exit_seconds: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            safety_factor: 0.8,
            sara_margin_seconds: 1.0,
            sara_sample_count: 5,
            netflix_reservoir_seconds: 5.0,
            netflix_cushion_seconds: 25.0,
            netflix_startup_factor: 0.875,
            netflix_startup_exit_seconds: 8.0,
        }
    }
}

impl AdaptationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "safety factor must be in (0, 1], got {}",
                self.safety_factor
            )));
        }
        if self.sara_margin_seconds < 0.0 {
            return Err(ConfigError::Invalid("SARA margin must not be negative".to_string()));
        }
        if self.sara_sample_count == 0 {
            return Err(ConfigError::Invalid("SARA sample count must be at least 1".to_string()));
        }
        if self.netflix_reservoir_seconds < 0.0
            || self.netflix_cushion_seconds <= self.netflix_reservoir_seconds
        {
            return Err(ConfigError::Invalid(format!(
                "reservoir ({}) must be non-negative and below cushion ({})",
                self.netflix_reservoir_seconds, self.netflix_cushion_seconds
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Hard cap on buffered media. Fetching pauses instead of overshooting it.
    pub max_buffer_seconds: f64,
    /// Media that must be buffered before the playback clock starts draining.
    pub initial_buffer_seconds: f64,
    /// Cadence of the playback clock and of buffer events.
    pub tick_interval: Duration,
    /// Back-to-back skipped segments that abort the session.
    pub max_consecutive_failures: u32,
    pub fetch: FetcherConfig,
    pub adaptation: AdaptationConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_buffer_seconds: 30.0,
            initial_buffer_seconds: 4.0,
            tick_interval: Duration::from_secs(1),
            max_consecutive_failures: 3,
            fetch: FetcherConfig::default(),
            adaptation: AdaptationConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_buffer_seconds <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "max_buffer_seconds",
                value: self.max_buffer_seconds,
            });
        }
        if self.initial_buffer_seconds < 0.0 || self.initial_buffer_seconds > self.max_buffer_seconds {
            return Err(ConfigError::Invalid(format!(
                "initial buffer ({}) must lie within [0, {}]",
                self.initial_buffer_seconds, self.max_buffer_seconds
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::NotPositive { field: "tick_interval", value: 0.0 });
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid("max_consecutive_failures must be at least 1".to_string()));
        }
        if self.fetch.timeout.is_zero() {
            return Err(ConfigError::NotPositive { field: "timeout", value: 0.0 });
        }
        if self.adaptation.netflix_cushion_seconds > self.max_buffer_seconds {
            return Err(ConfigError::Invalid(format!(
                "cushion ({}) exceeds the maximum buffer ({})",
                self.adaptation.netflix_cushion_seconds, self.max_buffer_seconds
            )));
        }
        self.adaptation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PlayerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_initial_buffer_above_capacity() {
        let config = PlayerConfig {
            initial_buffer_seconds: 40.0,
            ..PlayerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_netflix_thresholds() {
        let adaptation = AdaptationConfig {
            netflix_reservoir_seconds: 20.0,
            netflix_cushion_seconds: 10.0,
            ..AdaptationConfig::default()
        };
        assert!(adaptation.validate().is_err());
    }
}
