use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::abr::{Algorithm, DecisionContext};
use crate::buffer::{BufferModel, PlaybackState, EPSILON};
use crate::config::PlayerConfig;
use crate::error::{ConfigError, SegmentFetchError, SessionError};
use crate::mpd::Manifest;
use crate::segment::fetcher::{fetch_segment, fetch_with_retry, HttpFetcher, RetryPolicy, SegmentFetch};
use crate::segment::DownloadHistory;
use crate::{epoch_time, BufferEvent, EventCallback, PlaybackEvent, PlayerEvent};

/// Summary of one completed session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
    pub algorithm: Algorithm,
    pub segments_played: u64,
    pub stall_events: u32,
    /// Media and initialization bytes received.
    pub total_bytes: u64,
    pub segments_downloaded: u64,
    pub segments_skipped: u64,
    pub up_shifts: u32,
    pub down_shifts: u32,
    /// Mean advertised bitrate of the downloaded segments.
    pub average_bitrate: f64,
    pub stall_duration_seconds: f64,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Default)]
struct DownloadStats {
    total_bytes: u64,
    segments_downloaded: u64,
    segments_skipped: u64,
    up_shifts: u32,
    down_shifts: u32,
    bitrate_sum: f64,
}

/// Emulated DASH client: downloads segments as a real player would, while a
/// clock drains the buffer in real time. Nothing is decoded.
pub struct DashPlayer {
    config: PlayerConfig,
    direct: Arc<dyn SegmentFetch>,
    via_pep: Option<Arc<dyn SegmentFetch>>,
    callback: EventCallback,
    cancellation_token: CancellationToken,
}

impl DashPlayer {
    /// Builds HTTP fetchers from `config`. A PEP route is only available when
    /// `config.fetch.proxy` is set.
    pub fn new(config: PlayerConfig, callback: EventCallback) -> Result<Self, ConfigError> {
        config.validate()?;
        let direct_config = crate::config::FetcherConfig {
            proxy: None,
            ..config.fetch.clone()
        };
        let direct: Arc<dyn SegmentFetch> = Arc::new(HttpFetcher::new(&direct_config)?);
        let via_pep = match &config.fetch.proxy {
            Some(_) => Some(Arc::new(HttpFetcher::new(&config.fetch)?) as Arc<dyn SegmentFetch>),
            None => None,
        };
        Ok(Self::with_fetchers(config, direct, via_pep, callback))
    }

    pub fn with_fetchers(
        config: PlayerConfig,
        direct: Arc<dyn SegmentFetch>,
        via_pep: Option<Arc<dyn SegmentFetch>>,
        callback: EventCallback,
    ) -> Self {
        Self {
            config,
            direct,
            via_pep,
            callback,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Aborts the running session. In-flight fetches are dropped.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    fn fetcher(&self, use_pep: bool) -> Result<Arc<dyn SegmentFetch>, ConfigError> {
        if !use_pep {
            return Ok(self.direct.clone());
        }
        self.via_pep
            .clone()
            .ok_or_else(|| ConfigError::Invalid("PEP requested but no proxy is configured".to_string()))
    }

    /// A segment longer than the whole buffer could never be admitted.
    fn check_capacity(&self, manifest: &Manifest) -> Result<(), ConfigError> {
        let capacity = self.config.max_buffer_seconds;
        match (0..manifest.segment_count()).find(|&p| manifest.segment_duration(p) > capacity + EPSILON) {
            Some(position) => Err(ConfigError::Invalid(format!(
                "segment {} lasts {}s, longer than the maximum buffer ({capacity}s)",
                position + 1,
                manifest.segment_duration(position)
            ))),
            None => Ok(()),
        }
    }

    /// Plays `manifest` with `algorithm` until `segment_limit` segments (or all
    /// of them) have been downloaded and the buffer has drained.
    #[instrument(skip_all, fields(algorithm = %algorithm, pep = use_pep))]
    pub async fn run(
        &self,
        manifest: &Manifest,
        algorithm: Algorithm,
        segment_limit: Option<usize>,
        use_pep: bool,
    ) -> Result<SessionResult, SessionError> {
        let fetcher = self.fetcher(use_pep)?;
        self.check_capacity(manifest)?;
        let started = Instant::now();
        let session = self.cancellation_token.child_token();
        let buffer = Arc::new(BufferModel::new(
            self.config.max_buffer_seconds,
            self.config.initial_buffer_seconds,
        ));

        let clock = tokio::spawn(run_clock(
            buffer.clone(),
            self.config.tick_interval,
            self.callback.clone(),
            session.clone(),
        ));

        let outcome = match self
            .download_all(manifest, algorithm, segment_limit, fetcher.as_ref(), &buffer, &session)
            .await
        {
            Ok(stats) => {
                buffer.finish_downloads();
                tokio::select! {
                    _ = session.cancelled() => Err(SessionError::Cancelled),
                    _ = buffer.wait_until_ended() => Ok(stats),
                }
            }
            Err(e) => Err(e),
        };

        session.cancel();
        if let Err(e) = clock.await {
            warn!("Playback clock task failed: {e}");
        }
        let stats = outcome?;

        let result = SessionResult {
            algorithm,
            segments_played: buffer.segments_played(),
            stall_events: buffer.stall_events(),
            total_bytes: stats.total_bytes,
            segments_downloaded: stats.segments_downloaded,
            segments_skipped: stats.segments_skipped,
            up_shifts: stats.up_shifts,
            down_shifts: stats.down_shifts,
            average_bitrate: if stats.segments_downloaded > 0 {
                stats.bitrate_sum / stats.segments_downloaded as f64
            } else {
                0.0
            },
            stall_duration_seconds: buffer.stall_seconds(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            "Session finished: {} played, {} stalls, {} skipped, {} bytes",
            result.segments_played, result.stall_events, result.segments_skipped, result.total_bytes
        );
        Ok(result)
    }

    async fn download_all(
        &self,
        manifest: &Manifest,
        algorithm: Algorithm,
        segment_limit: Option<usize>,
        fetcher: &dyn SegmentFetch,
        buffer: &BufferModel,
        cancel: &CancellationToken,
    ) -> Result<DownloadStats, SessionError> {
        let policy = RetryPolicy::from(&self.config.fetch);
        let mut strategy = algorithm.build(&self.config.adaptation);
        let mut history = DownloadHistory::new();
        let mut initialized = HashSet::new();
        let mut current: Option<usize> = None;
        let mut consecutive_failures = 0u32;
        let mut stats = DownloadStats::default();

        let total = segment_limit
            .map_or(manifest.segment_count(), |limit| limit.min(manifest.segment_count()));
        info!("Playing {total} segments with {algorithm}");

        for position in 0..total {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = buffer.wait_for_room(manifest.segment_duration(position)) => {}
            }

            let decision = strategy.decide(&DecisionContext {
                manifest,
                position,
                buffer: buffer.snapshot(),
                history: &history,
                current,
            });
            let index = decision.representation;
            match current {
                Some(previous) if index > previous => stats.up_shifts += 1,
                Some(previous) if index < previous => stats.down_shifts += 1,
                _ => {}
            }
            current = Some(index);

            let representation = manifest.representation(index);
            if let Some(init_url) = &representation.initialization {
                if !initialized.contains(&index) {
                    let (result, _) = fetch_with_retry(fetcher, init_url, &policy, cancel).await;
                    match result {
                        Ok(body) => {
                            debug!("Initialization segment for {} ({} bytes)", representation.id, body.bytes);
                            stats.total_bytes += body.bytes;
                            initialized.insert(index);
                            (self.callback)(PlayerEvent::InitSegment {
                                epoch_time: epoch_time(),
                                representation_id: representation.id.clone(),
                                size: body.bytes,
                            });
                        }
                        Err(SegmentFetchError::Cancelled) => return Err(SessionError::Cancelled),
                        Err(e) => {
                            warn!("Initialization segment for {} failed: {e}", representation.id);
                            (self.callback)(PlayerEvent::Warning {
                                message: format!("initialization segment {init_url} failed: {e}"),
                            });
                        }
                    }
                }
            }

            let Some(segment) = manifest.segment(index, position) else {
                continue;
            };
            let record = fetch_segment(fetcher, segment.sequence_number, index, &segment.url, &policy, cancel).await;

            match &record.failure {
                None => {
                    consecutive_failures = 0;
                    if buffer.push(segment.sequence_number, segment.duration) {
                        debug!("Stall ended by segment {}", segment.sequence_number);
                    }
                    stats.total_bytes += record.bytes_received;
                    stats.segments_downloaded += 1;
                    stats.bitrate_sum += representation.bandwidth as f64;
                    let snapshot = buffer.snapshot();
                    (self.callback)(PlayerEvent::Playback(PlaybackEvent {
                        epoch_time: epoch_time(),
                        playback_time: snapshot.playback_position,
                        segment_number: segment.sequence_number,
                        segment_size: record.bytes_received,
                        duration: segment.duration,
                        bitrate: representation.bandwidth,
                        download_rate: record.throughput_bps,
                        representation_id: representation.id.clone(),
                        attempts: record.attempts,
                        buffered_seconds: snapshot.buffered_seconds,
                        adaptation: decision.state.clone(),
                    }));
                }
                Some(SegmentFetchError::Cancelled) => return Err(SessionError::Cancelled),
                Some(failure) => {
                    consecutive_failures += 1;
                    stats.segments_skipped += 1;
                    warn!(
                        "Skipping segment {} after {} attempts: {failure}",
                        segment.sequence_number, record.attempts
                    );
                    (self.callback)(PlayerEvent::SegmentSkipped {
                        epoch_time: epoch_time(),
                        segment_number: segment.sequence_number,
                        representation_id: representation.id.clone(),
                        attempts: record.attempts,
                        reason: failure.to_string(),
                    });
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return Err(SessionError::ConsecutiveFailures {
                            segment: segment.sequence_number,
                            failures: consecutive_failures,
                            last: failure.clone(),
                        });
                    }
                }
            }
            history.push(record);
        }
        Ok(stats)
    }
}

/// Drains the buffer by the wall-clock time elapsed between ticks and reports
/// the buffer state once per tick.
async fn run_clock(buffer: Arc<BufferModel>, tick: Duration, callback: EventCallback, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let now = Instant::now();
        let outcome = buffer.drain(now.duration_since(last).as_secs_f64());
        last = now;

        if outcome.stalled {
            callback(PlayerEvent::Stall {
                epoch_time: epoch_time(),
                playback_time: outcome.snapshot.playback_position,
                segment_number: buffer.last_played().map_or(1, |n| n + 1),
            });
        }
        callback(PlayerEvent::Buffer(BufferEvent::from(&outcome.snapshot)));
        if outcome.snapshot.state == PlaybackState::Ended {
            break;
        }
    }
}
