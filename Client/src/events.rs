use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use dash_player::{EventCallback, PlayerEvent};
use metrics::Metrics;
use tracing::{debug, info, warn};

use crate::utils::record_event;

/// JSON-lines file receiving every player event.
pub struct EventLog {
    writer: Mutex<LineWriter<File>>,
}

impl EventLog {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    pub fn append(&self, event: &PlayerEvent) -> io::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "event log lock poisoned"))?;
        writeln!(writer, "{line}")
    }
}

fn log_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::Playback(p) => info!(
            "Segment {} from {} ({} kbps): {} bytes at {:.0} kbps, buffer {:.1}s",
            p.segment_number,
            p.representation_id,
            p.bitrate / 1000,
            p.segment_size,
            p.download_rate / 1000.0,
            p.buffered_seconds
        ),
        PlayerEvent::Buffer(b) => debug!(
            "t={:.1}s buffer {:.1}s ({} segments) {:?}",
            b.playback_time, b.buffered_seconds, b.buffered_segments, b.state
        ),
        PlayerEvent::Stall {
            playback_time,
            segment_number,
            ..
        } => warn!("Stalled at {playback_time:.1}s waiting for segment {segment_number}"),
        PlayerEvent::InitSegment { representation_id, size, .. } => {
            debug!("Initialization segment of {representation_id}: {size} bytes")
        }
        PlayerEvent::SegmentSkipped { segment_number, reason, .. } => {
            debug!("Segment {segment_number} skipped: {reason}")
        }
        PlayerEvent::Warning { message } => warn!("{message}"),
    }
}

/// The client's event sink: logs through `tracing`, appends to the event log
/// and updates metrics, whichever of those are enabled.
pub fn event_callback(log: Option<Arc<EventLog>>, metrics: Option<Metrics>) -> EventCallback {
    Arc::new(move |event: PlayerEvent| {
        log_event(&event);
        if let Some(log) = &log {
            if let Err(e) = log.append(&event) {
                warn!("Failed to write event log: {e}");
            }
        }
        if let Some(metrics) = &metrics {
            record_event(metrics, &event);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_appended_as_json_lines() {
        let path = std::env::temp_dir().join(format!("dash-client-events-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let log = Arc::new(EventLog::open(&path).unwrap());
        let callback = event_callback(Some(log.clone()), None);

        callback(PlayerEvent::Stall {
            epoch_time: 1.5,
            playback_time: 8.0,
            segment_number: 5,
        });
        callback(PlayerEvent::Warning {
            message: "init segment failed".to_string(),
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "stall");
        assert_eq!(lines[0]["segment_number"], 5);
        assert_eq!(lines[1]["event"], "warning");
        std::fs::remove_file(&path).unwrap();
    }
}
