use dash_player::PlayerEvent;
use metrics::{get_all_interfaces, Metrics, MetricsBuilder, MetricsError};
use tracing::info;

pub const SEGMENTS_DOWNLOADED_TOTAL: &str = "segments_downloaded_total";
pub const STALL_EVENTS_TOTAL: &str = "stall_events_total";
pub const SEGMENTS_SKIPPED_TOTAL: &str = "segments_skipped_total";
pub const BUFFER_LEVEL_SECONDS: &str = "buffer_level_seconds";
pub const SELECTED_BITRATE_BPS: &str = "selected_bitrate_bps";

fn builder() -> MetricsBuilder {
    MetricsBuilder::new()
        .add_label("mode", "client")
        .add_counter(SEGMENTS_DOWNLOADED_TOTAL, "Media segments downloaded")
        .add_counter(STALL_EVENTS_TOTAL, "Playback stalls")
        .add_counter(SEGMENTS_SKIPPED_TOTAL, "Segments skipped after exhausting retries")
        .add_gauge(BUFFER_LEVEL_SECONDS, "Buffered media in seconds")
        .add_gauge(SELECTED_BITRATE_BPS, "Advertised bitrate of the last downloaded segment")
}

/// Installs the process-wide metrics instance with the player's series.
pub fn create_metrics() -> Result<Metrics, MetricsError> {
    let interfaces = get_all_interfaces();
    info!("Tracking the following interfaces: {:?}", interfaces);

    let mut builder = builder();
    for interface in interfaces {
        builder = builder.track_interface(&interface);
    }
    builder.install()
}

pub fn record_event(metrics: &Metrics, event: &PlayerEvent) {
    match event {
        PlayerEvent::Buffer(buffer) => metrics.set_gauge(BUFFER_LEVEL_SECONDS, buffer.buffered_seconds),
        PlayerEvent::Playback(playback) => {
            metrics.inc_counter(SEGMENTS_DOWNLOADED_TOTAL, 1);
            metrics.set_gauge(SELECTED_BITRATE_BPS, playback.bitrate as f64);
            metrics.set_gauge(BUFFER_LEVEL_SECONDS, playback.buffered_seconds);
        }
        PlayerEvent::Stall { .. } => metrics.inc_counter(STALL_EVENTS_TOTAL, 1),
        PlayerEvent::SegmentSkipped { .. } => metrics.inc_counter(SEGMENTS_SKIPPED_TOTAL, 1),
        PlayerEvent::InitSegment { .. } | PlayerEvent::Warning { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stalls_and_skips_are_counted() {
        let metrics = builder().build().unwrap();
        record_event(
            &metrics,
            &PlayerEvent::Stall {
                epoch_time: 0.0,
                playback_time: 12.0,
                segment_number: 7,
            },
        );
        record_event(
            &metrics,
            &PlayerEvent::SegmentSkipped {
                epoch_time: 0.0,
                segment_number: 7,
                representation_id: "low".to_string(),
                attempts: 3,
                reason: "request timed out".to_string(),
            },
        );
        record_event(&metrics, &PlayerEvent::Warning { message: "ignored".to_string() });

        assert_eq!(metrics.counter_value(STALL_EVENTS_TOTAL), Some(1));
        assert_eq!(metrics.counter_value(SEGMENTS_SKIPPED_TOTAL), Some(1));
        assert_eq!(metrics.counter_value(SEGMENTS_DOWNLOADED_TOTAL), Some(0));
    }
}
