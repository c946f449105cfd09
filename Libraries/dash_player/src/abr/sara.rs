use tracing::debug;

use super::{AdaptationDecision, Algorithm, DecisionContext, DecisionState, RateAdaptation};
use crate::config::AdaptationConfig;
use crate::segment::DownloadHistory;

/// Segment-aware adaptation. Starts from the throughput cap like BASIC, then
/// walks down until the concrete next segment can arrive before the buffer
/// (plus a margin) runs out.
#[derive(Debug, Clone)]
pub struct Sara {
    safety_factor: f64,
    margin_seconds: f64,
    sample_count: usize,
}

impl Sara {
    pub fn new(config: &AdaptationConfig) -> Self {
        Self {
            safety_factor: config.safety_factor,
            margin_seconds: config.sara_margin_seconds,
            sample_count: config.sara_sample_count,
        }
    }
}

/// Harmonic mean of recent throughputs weighted by segment size, which is
/// total bits over total download time.
pub(crate) fn weighted_harmonic_mean(history: &DownloadHistory, samples: usize) -> Option<f64> {
    let (bits, seconds) = history
        .successful()
        .filter(|r| r.bytes_received > 0)
        .take(samples)
        .fold((0.0, 0.0), |(bits, seconds), r| {
            (bits + r.bytes_received as f64 * 8.0, seconds + r.duration_seconds.max(1e-6))
        });
    (seconds > 0.0).then(|| bits / seconds)
}

impl RateAdaptation for Sara {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Sara
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> AdaptationDecision {
        let manifest = ctx.manifest;
        let Some(throughput) = weighted_harmonic_mean(ctx.history, self.sample_count) else {
            return AdaptationDecision::new(
                manifest,
                manifest.lowest(),
                DecisionState::Sara {
                    throughput_bps: None,
                    cap_bps: None,
                    rejected: 0,
                    estimated_download_seconds: None,
                },
            );
        };

        let cap = throughput * self.safety_factor;
        let allowance = ctx.buffer.buffered_seconds + self.margin_seconds;
        let mut rejected = 0;
        let mut chosen = None;
        for index in (0..manifest.representations().len()).rev() {
            let representation = manifest.representation(index);
            if representation.bandwidth as f64 > cap {
                continue;
            }
            let size = manifest
                .segment(index, ctx.position)
                .map(|s| s.byte_size as f64)
                .unwrap_or_else(|| representation.average_segment_size());
            let estimate = size * 8.0 / throughput;
            if estimate <= allowance {
                chosen = Some((index, estimate));
                break;
            }
            rejected += 1;
        }

        let (index, estimate) = match chosen {
            Some((index, estimate)) => (index, Some(estimate)),
            None => (manifest.lowest(), None),
        };
        debug!(
            "SARA: throughput {throughput:.0} bps, allowance {allowance:.2}s, {rejected} rejected -> tier {index}"
        );
        AdaptationDecision::new(
            manifest,
            index,
            DecisionState::Sara {
                throughput_bps: Some(throughput),
                cap_bps: Some(cap),
                rejected,
                estimated_download_seconds: estimate,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::testing::{buffer, history_at, samples};
    use crate::mpd::{fixtures, Manifest, Representation, Segment};
    use crate::segment::record;

    #[test]
    fn harmonic_mean_weights_by_size() {
        let mut history = DownloadHistory::new();
        // 1 MB in 1 s and 0.1 MB in 1 s: 8.8 Mbit over 2 s
        history.push(record(1, 1_000_000, 1.0));
        history.push(record(2, 100_000, 1.0));
        let mean = weighted_harmonic_mean(&history, 5).unwrap_or_default();
        assert!((mean - 4_400_000.0).abs() < 1.0);
        assert_eq!(weighted_harmonic_mean(&DownloadHistory::new(), 5), None);
    }

    #[test]
    fn rejects_segments_that_outlast_the_buffer() {
        let manifest = fixtures::constant(&[500_000, 1_000_000, 2_000_000], 10, 4.0);
        let mut sara = Sara::new(&AdaptationConfig::default());
        let mut decide = |throughput, seconds| {
            sara.decide(&DecisionContext {
                manifest: &manifest,
                position: 2,
                buffer: buffer(seconds),
                history: &history_at(throughput),
                current: None,
            })
        };
        // The 2 Mbps segment (8 Mbit) takes 2 s at 4 Mbps.
        assert_eq!(decide(4_000_000.0, 5.0).bandwidth, 2_000_000);
        // 0.5 s of buffer plus 1 s margin only fits the 1 Mbps segment (1 s).
        assert_eq!(decide(4_000_000.0, 0.5).bandwidth, 1_000_000);
        // At 1.3 Mbps not even the 500 kbps segment fits; floor at the lowest tier.
        let floor = decide(1_300_000.0, 0.0);
        assert_eq!(floor.bandwidth, 500_000);
        assert!(matches!(floor.state, DecisionState::Sara { rejected: 2, estimated_download_seconds: None, .. }));
    }

    #[test]
    fn uses_the_size_of_the_specific_next_segment() {
        let sizes = [100_000u64, 2_000_000];
        let representations = vec![
            Representation {
                id: "low".into(),
                bandwidth: 300_000,
                initialization: None,
                segments: (1..=2)
                    .map(|n| Segment { sequence_number: n, url: format!("low/{n}"), byte_size: 50_000, duration: 2.0 })
                    .collect(),
            },
            Representation {
                id: "high".into(),
                bandwidth: 800_000,
                initialization: None,
                segments: sizes
                    .iter()
                    .zip(1..)
                    .map(|(&byte_size, n)| Segment { sequence_number: n, url: format!("high/{n}"), byte_size, duration: 2.0 })
                    .collect(),
            },
        ];
        let manifest = Manifest::new("http://cdn.test/v.mpd", 4.0, representations).unwrap();
        let history = history_at(2_000_000.0);
        let mut sara = Sara::new(&AdaptationConfig::default());
        let at = |position| DecisionContext {
            manifest: &manifest,
            position,
            buffer: buffer(2.0),
            history: &history,
            current: None,
        };
        assert_eq!(sara.decide(&at(0)).representation_id, "high");
        // The second high segment is 16 Mbit: 8 s at 2 Mbps.
        assert_eq!(sara.decide(&at(1)).representation_id, "low");
    }

    #[test]
    fn never_picks_a_segment_that_outlasts_the_buffer() {
        let manifest = fixtures::constant(&[250_000, 750_000, 1_500_000, 3_000_000, 6_000_000], 4, 4.0);
        let config = AdaptationConfig::default();
        let mut sara = Sara::new(&config);
        let draws = samples(11, 400);
        for pair in draws.chunks(2) {
            let throughput = 100_000.0 + pair[0] * 8_000_000.0;
            let buffered = pair[1] * 30.0;
            let history = history_at(throughput);
            let decision = sara.decide(&DecisionContext {
                manifest: &manifest,
                position: 0,
                buffer: buffer(buffered),
                history: &history,
                current: None,
            });
            let measured = weighted_harmonic_mean(&history, config.sara_sample_count).unwrap_or_default();
            let size = manifest.segment(decision.representation, 0).map(|s| s.byte_size).unwrap_or(0);
            let estimate = size as f64 * 8.0 / measured;
            assert!(
                estimate <= buffered + config.sara_margin_seconds || decision.representation == 0,
                "tier {} needs {estimate:.2}s with {buffered:.2}s buffered",
                decision.representation
            );
            assert!(decision.bandwidth as f64 <= measured * config.safety_factor || decision.representation == 0);
        }
    }
}
