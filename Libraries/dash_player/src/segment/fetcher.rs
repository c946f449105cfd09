use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FetcherConfig;
use crate::error::{ConfigError, SegmentFetchError};
use crate::segment::{throughput, DownloadRecord};

/// Body of one successful attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchedBody {
    pub bytes: u64,
    pub elapsed: Duration,
}

/// A single, bounded GET. Implementations must give up once `timeout` elapses.
#[async_trait]
pub trait SegmentFetch: Send + Sync {
    async fn fetch_once(&self, url: &str, timeout: Duration) -> Result<FetchedBody, SegmentFetchError>;
}

/// Retry schedule shared by every fetch of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Upper bound for one segment, retries and backoff included.
    pub fn budget(&self) -> Duration {
        self.timeout.saturating_mul(self.max_retries.saturating_add(1))
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl From<&FetcherConfig> for RetryPolicy {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_retries: config.max_retries,
            base_backoff: config.base_backoff,
        }
    }
}

/// Fetches over HTTP(S), either directly or through the PEP proxy.
pub struct HttpFetcher {
    client: Client,
    artifact_dir: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, ConfigError> {
        let mut builder = Client::builder()
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .user_agent(concat!("dash-emulator/", env!("CARGO_PKG_VERSION")));

        builder = match &config.proxy {
            Some(pep) => {
                info!(
                    "Routing segment requests through PEP at {}:{} (buffer size {} bytes)",
                    pep.host, pep.port, pep.buffer_size
                );
                let proxy = reqwest::Proxy::all(pep.proxy_url())
                    .map_err(|e| ConfigError::Invalid(format!("bad PEP address: {e}")))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };
        if config.accept_invalid_certs {
            warn!("TLS certificate verification disabled for a terminating proxy");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            artifact_dir: config.artifact_dir.clone(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn download(&self, url: &str) -> Result<FetchedBody, SegmentFetchError> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SegmentFetchError::from_reqwest(&e))?;
        if !response.status().is_success() {
            return Err(SegmentFetchError::HttpStatus {
                status: response.status().as_u16(),
            });
        }

        let mut artifact = match &self.artifact_dir {
            Some(dir) => Some(create_artifact(dir, url).await?),
            None => None,
        };
        let mut bytes = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SegmentFetchError::Body(e.to_string()))?;
            bytes += chunk.len() as u64;
            if let Some(file) = artifact.as_mut() {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| SegmentFetchError::Io(e.to_string()))?;
            }
        }
        if let Some(mut file) = artifact {
            file.flush().await.map_err(|e| SegmentFetchError::Io(e.to_string()))?;
        }

        Ok(FetchedBody {
            bytes,
            elapsed: start.elapsed(),
        })
    }
}

async fn create_artifact(dir: &Path, url: &str) -> Result<File, SegmentFetchError> {
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').find(|part| !part.is_empty()))
        .unwrap_or("segment");
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| SegmentFetchError::Io(e.to_string()))?;
    File::create(dir.join(name))
        .await
        .map_err(|e| SegmentFetchError::Io(e.to_string()))
}

#[async_trait]
impl SegmentFetch for HttpFetcher {
    async fn fetch_once(&self, url: &str, timeout: Duration) -> Result<FetchedBody, SegmentFetchError> {
        match tokio::time::timeout(timeout, self.download(url)).await {
            Ok(result) => result,
            Err(_) => Err(SegmentFetchError::Timeout),
        }
    }
}

/// Downloads `url` with the session's retry policy. The whole sequence stays
/// within [`RetryPolicy::budget`]: later attempts get whatever time is left.
/// Returns the body together with the number of attempts made.
pub async fn fetch_with_retry(
    fetcher: &dyn SegmentFetch,
    url: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> (Result<FetchedBody, SegmentFetchError>, u32) {
    let deadline = Instant::now() + policy.budget();
    let mut attempt = 0u32;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout = policy.timeout.min(remaining);
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SegmentFetchError::Cancelled),
            result = fetcher.fetch_once(url, timeout) => result,
        };
        let error = match result {
            Ok(body) => return (Ok(body), attempt),
            Err(error) => error,
        };

        if !error.is_retryable() || attempt > policy.max_retries {
            return (Err(error), attempt);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let backoff = policy.backoff(attempt - 1);
        if remaining <= backoff {
            debug!("No time left for another attempt at {url}");
            return (Err(error), attempt);
        }
        warn!("Fetch of {url} failed (attempt {attempt}): {error}, retrying in {backoff:?}");
        tokio::select! {
            _ = cancel.cancelled() => return (Err(SegmentFetchError::Cancelled), attempt),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Fetches one segment and condenses the outcome into a [`DownloadRecord`].
pub async fn fetch_segment(
    fetcher: &dyn SegmentFetch,
    sequence_number: u64,
    representation: usize,
    url: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> DownloadRecord {
    let start = Instant::now();
    let (result, attempts) = fetch_with_retry(fetcher, url, policy, cancel).await;
    match result {
        Ok(body) => {
            let seconds = body.elapsed.as_secs_f64();
            DownloadRecord {
                sequence_number,
                representation,
                url: url.to_string(),
                bytes_received: body.bytes,
                duration_seconds: seconds,
                throughput_bps: throughput(body.bytes, seconds),
                attempts,
                failure: None,
            }
        }
        Err(error) => DownloadRecord {
            sequence_number,
            representation,
            url: url.to_string(),
            bytes_received: 0,
            duration_seconds: start.elapsed().as_secs_f64(),
            throughput_bps: 0.0,
            attempts,
            failure: Some(error),
        },
    }
}
