use serde::Serialize;
use tracing::{debug, info};

use super::{highest_within, AdaptationDecision, Algorithm, DecisionContext, DecisionState, RateAdaptation};
use crate::config::AdaptationConfig;
use crate::mpd::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetflixPhase {
    /// Climb one tier at a time while downloads are much faster than playback.
    Startup,
    /// Follow the buffer rate map.
    Running,
}

/// Buffer-based adaptation after Huang et al., "A buffer-based approach to rate
/// adaptation" (SIGCOMM 2014).
#[derive(Debug, Clone)]
pub struct Netflix {
    reservoir: f64,
    cushion: f64,
    safety_factor: f64,
    startup_factor: f64,
    startup_exit: f64,
    phase: NetflixPhase,
}

impl Netflix {
    pub fn new(config: &AdaptationConfig) -> Self {
        Self {
            reservoir: config.netflix_reservoir_seconds,
            cushion: config.netflix_cushion_seconds,
            safety_factor: config.safety_factor,
            startup_factor: config.netflix_startup_factor,
            startup_exit: config.netflix_startup_exit_seconds,
            phase: NetflixPhase::Startup,
        }
    }

    pub fn phase(&self) -> NetflixPhase {
        self.phase
    }

    /// Tier the rate map assigns to `buffered` seconds. The lowest tier owns
    /// everything up to the reservoir and the highest everything from the
    /// cushion on. Intermediate tiers take evenly spaced markers in between.
    pub fn rate_map(&self, manifest: &Manifest, buffered: f64) -> usize {
        let highest = manifest.highest();
        if buffered <= self.reservoir {
            return manifest.lowest();
        }
        if buffered >= self.cushion {
            return highest;
        }
        let marker = (self.cushion - self.reservoir) / highest as f64;
        let passed = ((buffered - self.reservoir) / marker).ceil() as usize;
        passed.saturating_sub(1).min(highest)
    }

    fn running(&self, ctx: &DecisionContext<'_>, throughput: Option<f64>) -> usize {
        let manifest = ctx.manifest;
        let buffered = ctx.buffer.buffered_seconds;
        if buffered < self.reservoir {
            manifest.lowest()
        } else if buffered < self.cushion {
            let sustainable = throughput
                .map(|t| highest_within(manifest, t * self.safety_factor).unwrap_or(manifest.lowest()))
                .unwrap_or(manifest.highest());
            self.rate_map(manifest, buffered).min(sustainable)
        } else {
            throughput
                .map(|t| highest_within(manifest, t).unwrap_or(manifest.lowest()))
                .unwrap_or(manifest.highest())
        }
    }

    fn startup(&mut self, ctx: &DecisionContext<'_>, throughput: Option<f64>) -> usize {
        let manifest = ctx.manifest;
        let current = ctx.current.unwrap_or(manifest.lowest());
        let mut next = current;

        if let Some(rate) = throughput.filter(|t| *t > 0.0) {
            let segment_duration = manifest.segment_duration(ctx.position);
            let size_bits = manifest.representation(current).average_segment_size() * 8.0;
            // Net buffer gain while downloading a segment of the current tier.
            let gain = segment_duration - size_bits / rate;
            if gain > self.startup_factor * segment_duration && current < manifest.highest() {
                next = current + 1;
            }
        }

        let buffered = ctx.buffer.buffered_seconds;
        if buffered >= self.startup_exit {
            let mapped = self.rate_map(manifest, buffered);
            if mapped > next {
                info!("Netflix: leaving startup at {buffered:.2}s buffered");
                self.phase = NetflixPhase::Running;
                next = mapped;
            }
        }
        next
    }
}

impl RateAdaptation for Netflix {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Netflix
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> AdaptationDecision {
        let throughput = ctx.history.last_throughput();
        let phase = self.phase;
        let index = match phase {
            NetflixPhase::Startup => self.startup(ctx, throughput),
            NetflixPhase::Running => self.running(ctx, throughput),
        };
        let buffered = ctx.buffer.buffered_seconds;
        debug!("Netflix ({phase:?}): {buffered:.2}s buffered, throughput {throughput:?} -> tier {index}");
        AdaptationDecision::new(
            ctx.manifest,
            index,
            DecisionState::Netflix {
                phase,
                buffered_seconds: buffered,
                rate_map_index: self.rate_map(ctx.manifest, buffered),
                throughput_bps: throughput,
            },
        )
    }
}
