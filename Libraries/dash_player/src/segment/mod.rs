pub mod fetcher;

use circular_buffer::CircularBuffer;

use crate::error::SegmentFetchError;

/// Number of download records kept for the adaptation strategies.
pub const HISTORY_WINDOW: usize = 5;

/// Outcome of one segment fetch, including its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub sequence_number: u64,
    /// Index of the representation in the manifest's bandwidth order.
    pub representation: usize,
    pub url: String,
    pub bytes_received: u64,
    /// Wall-clock time of the successful attempt, or of the whole retry
    /// sequence when every attempt failed.
    pub duration_seconds: f64,
    pub throughput_bps: f64,
    pub attempts: u32,
    pub failure: Option<SegmentFetchError>,
}

impl DownloadRecord {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Bits per second for `bytes` transferred in `seconds`. Zero-length
/// intervals are clamped so a cached response does not yield infinity.
pub fn throughput(bytes: u64, seconds: f64) -> f64 {
    (bytes as f64 * 8.0) / seconds.max(1e-6)
}

/// The most recent [`HISTORY_WINDOW`] download records. Older records fall off.
#[derive(Debug)]
pub struct DownloadHistory {
    records: CircularBuffer<HISTORY_WINDOW, DownloadRecord>,
}

impl Default for DownloadHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadHistory {
    pub fn new() -> Self {
        Self { records: CircularBuffer::new() }
    }

    pub fn push(&mut self, record: DownloadRecord) {
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&DownloadRecord> {
        self.records.back()
    }

    /// Successful records, newest first.
    pub fn successful(&self) -> impl Iterator<Item = &DownloadRecord> {
        self.records.iter().rev().filter(|r| r.succeeded())
    }

    /// Throughput of the most recent successful download.
    pub fn last_throughput(&self) -> Option<f64> {
        self.successful().next().map(|r| r.throughput_bps)
    }
}

#[cfg(test)]
pub(crate) fn record(sequence_number: u64, bytes: u64, seconds: f64) -> DownloadRecord {
    DownloadRecord {
        sequence_number,
        representation: 0,
        url: format!("http://cdn.test/seg_{sequence_number}"),
        bytes_received: bytes,
        duration_seconds: seconds,
        throughput_bps: throughput(bytes, seconds),
        attempts: 1,
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_a_bounded_window() {
        let mut history = DownloadHistory::new();
        for i in 0..(HISTORY_WINDOW as u64 + 3) {
            history.push(record(i, 1000, 1.0));
        }
        assert_eq!(history.len(), HISTORY_WINDOW);
        assert_eq!(history.last().map(|r| r.sequence_number), Some(HISTORY_WINDOW as u64 + 2));
    }

    #[test]
    fn last_throughput_ignores_failures() {
        let mut history = DownloadHistory::new();
        history.push(record(1, 125_000, 1.0));
        history.push(DownloadRecord {
            failure: Some(SegmentFetchError::Timeout),
            ..record(2, 0, 5.0)
        });
        assert_eq!(history.last_throughput(), Some(1_000_000.0));
    }
}
