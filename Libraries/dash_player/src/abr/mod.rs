//! Rate adaptation: picks the representation of the next segment.
//!
//! Every strategy implements [`RateAdaptation`] and is chosen once per session
//! through [`Algorithm`]. A decision never fails; when nothing qualifies the
//! lowest tier is returned.

mod basic;
mod netflix;
mod sara;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub use basic::Basic;
pub use netflix::{Netflix, NetflixPhase};
pub use sara::Sara;

use crate::buffer::BufferSnapshot;
use crate::config::AdaptationConfig;
use crate::mpd::Manifest;
use crate::segment::DownloadHistory;

/// Everything a strategy may look at when choosing segment `position`.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub manifest: &'a Manifest,
    /// 0-based playback position of the segment being decided.
    pub position: usize,
    pub buffer: BufferSnapshot,
    pub history: &'a DownloadHistory,
    /// Representation chosen for the previous segment.
    pub current: Option<usize>,
}

/// Internal state of a strategy at decision time. Logged, never used for control.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum DecisionState {
    Basic {
        throughput_bps: Option<f64>,
        cap_bps: Option<f64>,
    },
    Sara {
        throughput_bps: Option<f64>,
        cap_bps: Option<f64>,
        /// Candidates turned down because their download would outlast the buffer.
        rejected: usize,
        estimated_download_seconds: Option<f64>,
    },
    Netflix {
        phase: NetflixPhase,
        buffered_seconds: f64,
        rate_map_index: usize,
        throughput_bps: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptationDecision {
    /// Index into the manifest's ascending representation list.
    pub representation: usize,
    pub representation_id: String,
    pub bandwidth: u64,
    pub state: DecisionState,
}

impl AdaptationDecision {
    fn new(manifest: &Manifest, representation: usize, state: DecisionState) -> Self {
        let chosen = manifest.representation(representation);
        Self {
            representation: representation.min(manifest.highest()),
            representation_id: chosen.id.clone(),
            bandwidth: chosen.bandwidth,
            state,
        }
    }
}

pub trait RateAdaptation: Send {
    fn algorithm(&self) -> Algorithm;

    /// Chooses the representation for `ctx.position`. Only called after the
    /// previous segment's record has been added to the history.
    fn decide(&mut self, ctx: &DecisionContext<'_>) -> AdaptationDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Basic,
    Sara,
    Netflix,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Basic, Algorithm::Sara, Algorithm::Netflix];

    pub fn build(self, config: &AdaptationConfig) -> Box<dyn RateAdaptation> {
        match self {
            Algorithm::Basic => Box::new(Basic::new(config.safety_factor)),
            Algorithm::Sara => Box::new(Sara::new(config)),
            Algorithm::Netflix => Box::new(Netflix::new(config)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Basic => "basic",
            Algorithm::Sara => "sara",
            Algorithm::Netflix => "netflix",
        })
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Algorithm::Basic),
            "sara" => Ok(Algorithm::Sara),
            "netflix" => Ok(Algorithm::Netflix),
            other => Err(format!("unknown adaptation algorithm: {other}")),
        }
    }
}

/// Highest representation whose bandwidth does not exceed `cap_bps`.
pub(crate) fn highest_within(manifest: &Manifest, cap_bps: f64) -> Option<usize> {
    manifest
        .representations()
        .iter()
        .rposition(|r| r.bandwidth as f64 <= cap_bps)
}
