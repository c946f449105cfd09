//! Manifest model: the representations of one presentation and their ordered
//! segment lists. Built once per session and read-only afterwards.

pub mod parser;

use std::time::Duration;

use reqwest::Client;
use tracing::{info, instrument};

use crate::error::ManifestError;

/// One fetchable chunk of a representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Playback-order number, unique within its representation.
    pub sequence_number: u64,
    /// Absolute URL.
    pub url: String,
    /// Size in bytes. Exact when the manifest carries it, otherwise estimated
    /// from the representation bandwidth.
    pub byte_size: u64,
    /// Nominal media duration in seconds.
    pub duration: f64,
}

/// One bitrate tier of the content.
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub id: String,
    /// Advertised bitrate in bits per second.
    pub bandwidth: u64,
    /// Absolute URL of the initialization segment, if the manifest names one.
    pub initialization: Option<String>,
    pub segments: Vec<Segment>,
}

impl Representation {
    pub fn average_segment_size(&self) -> f64 {
        if self.segments.is_empty() {
            return 0.0;
        }
        self.segments.iter().map(|s| s.byte_size as f64).sum::<f64>() / self.segments.len() as f64
    }
}

/// Immutable description of a presentation. Representations are sorted by
/// ascending bandwidth, so index 0 is always the lowest tier.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub url: String,
    /// Total presentation length in seconds.
    pub playback_duration: f64,
    pub min_buffer_time: Option<f64>,
    representations: Vec<Representation>,
}

impl Manifest {
    pub fn new(
        url: impl Into<String>,
        playback_duration: f64,
        mut representations: Vec<Representation>,
    ) -> Result<Self, ManifestError> {
        representations.retain(|r| !r.segments.is_empty());
        if representations.is_empty() {
            return Err(ManifestError::Empty);
        }
        representations.sort_by_key(|r| r.bandwidth);
        Ok(Self {
            url: url.into(),
            playback_duration,
            min_buffer_time: None,
            representations,
        })
    }

    pub fn with_min_buffer_time(mut self, seconds: Option<f64>) -> Self {
        self.min_buffer_time = seconds;
        self
    }

    pub fn representations(&self) -> &[Representation] {
        &self.representations
    }

    pub fn representation(&self, index: usize) -> &Representation {
        &self.representations[index.min(self.representations.len() - 1)]
    }

    pub fn lowest(&self) -> usize {
        0
    }

    pub fn highest(&self) -> usize {
        self.representations.len() - 1
    }

    pub fn bitrates(&self) -> Vec<u64> {
        self.representations.iter().map(|r| r.bandwidth).collect()
    }

    /// Number of segment positions playable at every tier.
    pub fn segment_count(&self) -> usize {
        self.representations
            .iter()
            .map(|r| r.segments.len())
            .min()
            .unwrap_or(0)
    }

    /// The segment at playback `position` (0-based) of representation `index`.
    pub fn segment(&self, index: usize, position: usize) -> Option<&Segment> {
        self.representations.get(index)?.segments.get(position)
    }

    /// Longest nominal duration of the segment at `position` across tiers.
    pub fn segment_duration(&self, position: usize) -> f64 {
        self.representations
            .iter()
            .filter_map(|r| r.segments.get(position))
            .map(|s| s.duration)
            .fold(0.0, f64::max)
    }
}

/// Downloads and parses the MPD at `url`. Any failure is fatal to the session.
#[instrument(skip_all, fields(url = %url))]
pub async fn load(client: &Client, url: &str, timeout: Duration) -> Result<Manifest, ManifestError> {
    let fetch_error = |e: reqwest::Error| ManifestError::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    };
    let response = client.get(url).timeout(timeout).send().await.map_err(fetch_error)?;
    if !response.status().is_success() {
        return Err(ManifestError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    let text = response.text().await.map_err(fetch_error)?;
    let manifest = parser::parse_mpd(&text, url)?;
    info!(
        "Loaded manifest with {} representations and {} segments",
        manifest.representations().len(),
        manifest.segment_count()
    );
    Ok(manifest)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A manifest with evenly sized segments at every tier.
    pub fn constant(bitrates: &[u64], segments: usize, duration: f64) -> Manifest {
        let representations = bitrates
            .iter()
            .map(|&bandwidth| Representation {
                id: format!("{}k", bandwidth / 1000),
                bandwidth,
                initialization: None,
                segments: (0..segments)
                    .map(|i| Segment {
                        sequence_number: i as u64 + 1,
                        url: format!("http://cdn.test/{}k/seg_{}.m4s", bandwidth / 1000, i + 1),
                        byte_size: (bandwidth as f64 * duration / 8.0) as u64,
                        duration,
                    })
                    .collect(),
            })
            .collect();
        Manifest::new("http://cdn.test/manifest.mpd", segments as f64 * duration, representations)
            .expect("fixture manifest")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representations_are_sorted_by_bandwidth() {
        let manifest = fixtures::constant(&[2_000_000, 500_000, 1_000_000], 3, 2.0);
        assert_eq!(manifest.bitrates(), vec![500_000, 1_000_000, 2_000_000]);
        assert_eq!(manifest.highest(), 2);
        assert_eq!(manifest.segment_count(), 3);
    }

    #[test]
    fn empty_manifest_is_rejected() {
        let result = Manifest::new("http://cdn.test/a.mpd", 0.0, vec![]);
        assert!(matches!(result, Err(ManifestError::Empty)));
    }
}
