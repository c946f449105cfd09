pub mod abr;
pub mod buffer;
pub mod config;
pub mod error;
pub mod mpd;
pub mod player;
pub mod segment;

use std::sync::Arc;

use serde::Serialize;

use crate::abr::DecisionState;
use crate::buffer::{BufferSnapshot, PlaybackState};

pub use abr::Algorithm;
pub use config::{AdaptationConfig, FetcherConfig, PepConfig, PlayerConfig};
pub use error::{ConfigError, ManifestError, SegmentFetchError, SessionError};
pub use mpd::Manifest;
pub use player::{DashPlayer, SessionResult};

/// Receives every event a session produces, in emission order.
pub type EventCallback = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

/// Seconds since the Unix epoch, with millisecond precision.
pub fn epoch_time() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Events emitted by the player
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// One per playback clock tick.
    Buffer(BufferEvent),
    /// One per successfully downloaded media segment.
    Playback(PlaybackEvent),
    Stall {
        epoch_time: f64,
        playback_time: f64,
        /// Segment the player is waiting for.
        segment_number: u64,
    },
    InitSegment {
        epoch_time: f64,
        representation_id: String,
        size: u64,
    },
    SegmentSkipped {
        epoch_time: f64,
        segment_number: u64,
        representation_id: String,
        attempts: u32,
        reason: String,
    },
    Warning {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferEvent {
    pub epoch_time: f64,
    pub playback_time: f64,
    pub buffered_segments: usize,
    pub buffered_seconds: f64,
    pub state: PlaybackState,
}

impl From<&BufferSnapshot> for BufferEvent {
    fn from(snapshot: &BufferSnapshot) -> Self {
        Self {
            epoch_time: epoch_time(),
            playback_time: snapshot.playback_position,
            buffered_segments: snapshot.buffered_segments,
            buffered_seconds: snapshot.buffered_seconds,
            state: snapshot.state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackEvent {
    pub epoch_time: f64,
    pub playback_time: f64,
    pub segment_number: u64,
    /// Bytes received.
    pub segment_size: u64,
    /// Media duration of the segment in seconds.
    pub duration: f64,
    /// Advertised bandwidth of the chosen representation.
    pub bitrate: u64,
    /// Measured download rate in bits per second.
    pub download_rate: f64,
    pub representation_id: String,
    pub attempts: u32,
    /// Buffer level right after the segment was added.
    pub buffered_seconds: f64,
    pub adaptation: DecisionState,
}
