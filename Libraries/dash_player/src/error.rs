use thiserror::Error;

/// Failure to obtain a usable manifest. Fatal to session start.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to fetch manifest {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("manifest request to {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("failed to parse manifest: {0}")]
    Parse(String),
    #[error("manifest contains no playable video representation")]
    Empty,
}

impl From<quick_xml::Error> for ManifestError {
    fn from(error: quick_xml::Error) -> Self {
        Self::Parse(error.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ManifestError {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        Self::Parse(error.to_string())
    }
}

impl From<std::str::Utf8Error> for ManifestError {
    fn from(error: std::str::Utf8Error) -> Self {
        Self::Parse(error.to_string())
    }
}

/// Failure of a single segment fetch attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SegmentFetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("HTTP {status}")]
    HttpStatus { status: u16 },
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("error while reading body: {0}")]
    Body(String),
    #[error("failed to store segment: {0}")]
    Io(String),
    #[error("fetch cancelled")]
    Cancelled,
}

impl SegmentFetchError {
    /// Whether another attempt at the same segment could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionRefused(_) | Self::Connection(_) | Self::Body(_) => true,
            // 4xx other than 408/429 will not change on retry
            Self::HttpStatus { status } => *status >= 500 || *status == 408 || *status == 429,
            Self::Tls(_) | Self::Io(_) | Self::Cancelled => false,
        }
    }

    /// Short classification used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused(_) => "connection_refused",
            Self::HttpStatus { .. } => "http_status",
            Self::Tls(_) => "tls",
            Self::Connection(_) => "connection",
            Self::Body(_) => "body",
            Self::Io(_) => "io",
            Self::Cancelled => "cancelled",
        }
    }

    pub(crate) fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = error.status() {
            return Self::HttpStatus { status: status.as_u16() };
        }
        let chain = error_chain(error);
        if error.is_connect() {
            let lower = chain.to_lowercase();
            if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
                return Self::Tls(chain);
            }
            if lower.contains("refused") {
                return Self::ConnectionRefused(chain);
            }
            return Self::Connection(chain);
        }
        if error.is_body() || error.is_decode() {
            return Self::Body(chain);
        }
        Self::Connection(chain)
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{0}")]
    Invalid(String),
}

/// Fatal session failure. The message names the failing stage.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("manifest load failed: {0}")]
    Manifest(#[from] ManifestError),
    #[error("segment {segment}: giving up after {failures} consecutive failed segments ({last})")]
    ConsecutiveFailures {
        segment: u64,
        failures: u32,
        last: SegmentFetchError,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("session cancelled")]
    Cancelled,
}
