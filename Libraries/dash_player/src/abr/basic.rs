use tracing::debug;

use super::{highest_within, AdaptationDecision, Algorithm, DecisionContext, DecisionState, RateAdaptation};

/// Throughput-only adaptation: the highest tier below the last sample scaled
/// by the safety factor.
#[derive(Debug, Clone)]
pub struct Basic {
    safety_factor: f64,
}

impl Basic {
    pub fn new(safety_factor: f64) -> Self {
        Self { safety_factor }
    }
}

impl RateAdaptation for Basic {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Basic
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> AdaptationDecision {
        let manifest = ctx.manifest;
        let throughput = ctx.history.last_throughput();
        let cap = throughput.map(|t| t * self.safety_factor);
        let index = cap
            .and_then(|cap| highest_within(manifest, cap))
            .unwrap_or(manifest.lowest());
        debug!("BASIC: throughput {throughput:?} cap {cap:?} -> tier {index}");
        AdaptationDecision::new(
            manifest,
            index,
            DecisionState::Basic {
                throughput_bps: throughput,
                cap_bps: cap,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::testing::{buffer, history_at, samples};
    use crate::mpd::fixtures;

    fn decide(throughput: Option<f64>) -> AdaptationDecision {
        let manifest = fixtures::constant(&[500_000, 1_000_000, 2_000_000], 10, 2.0);
        let history = throughput.map(history_at).unwrap_or_default();
        Basic::new(0.8).decide(&DecisionContext {
            manifest: &manifest,
            position: 1,
            buffer: buffer(4.0),
            history: &history,
            current: None,
        })
    }

    #[test]
    fn starts_at_the_lowest_tier() {
        assert_eq!(decide(None).bandwidth, 500_000);
    }

    #[test]
    fn safety_factor_keeps_below_the_measured_rate() {
        // 0.8 * 1.2 Mbps = 960 kbps, just short of the 1 Mbps tier
        assert_eq!(decide(Some(1_200_000.0)).bandwidth, 500_000);
        assert_eq!(decide(Some(1_250_000.0)).bandwidth, 1_000_000);
        assert_eq!(decide(Some(10_000_000.0)).bandwidth, 2_000_000);
    }

    #[test]
    fn falls_back_to_lowest_when_nothing_fits() {
        assert_eq!(decide(Some(100_000.0)).bandwidth, 500_000);
    }

    #[test]
    fn choice_is_the_maximum_tier_under_the_cap() {
        let manifest = fixtures::constant(&[250_000, 500_000, 1_000_000, 2_000_000, 4_000_000], 10, 2.0);
        let mut basic = Basic::new(0.85);
        for sample in samples(7, 200) {
            let throughput = 50_000.0 + sample * 6_000_000.0;
            let history = history_at(throughput);
            let decision = basic.decide(&DecisionContext {
                manifest: &manifest,
                position: 0,
                buffer: buffer(10.0),
                history: &history,
                current: None,
            });
            let cap = history.last_throughput().unwrap_or_default() * 0.85;
            let fitting: Vec<u64> = manifest.bitrates().into_iter().filter(|&b| b as f64 <= cap).collect();
            match fitting.last() {
                Some(&best) => assert_eq!(decision.bandwidth, best),
                None => assert_eq!(decision.bandwidth, 250_000),
            }
        }
    }
}
