use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dash_player::segment::fetcher::HttpFetcher;
use dash_player::{mpd, Algorithm, DashPlayer, EventCallback, Manifest, SessionError, SessionResult};
use rand::Rng;
use tracing::{error, info, instrument, warn};

use crate::args::Args;
use crate::error::ClientError;

pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches and parses the manifest, through the PEP when one is in use.
#[instrument(skip_all)]
pub async fn load_manifest(args: &Args) -> Result<Manifest, ClientError> {
    let config = args.player_config(None);
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let manifest = mpd::load(fetcher.client(), &args.manifest, MANIFEST_TIMEOUT).await?;
    info!(
        "The DASH media has {} video representations and {} segments",
        manifest.representations().len(),
        manifest.segment_count()
    );
    Ok(manifest)
}

/// One line per representation, lowest bitrate first.
pub fn describe_representations(manifest: &Manifest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<24} {:>12} {:>10}", "id", "bitrate", "segments");
    for representation in manifest.representations() {
        let _ = writeln!(
            out,
            "{:<24} {:>12} {:>10}",
            representation.id,
            representation.bandwidth,
            representation.segments.len()
        );
    }
    out
}

/// A fresh `TEMP_<random>` directory name below `base`.
pub fn artifact_dir(base: &Path) -> PathBuf {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    base.join(format!("TEMP_{suffix:06}"))
}

pub fn summary(result: &SessionResult) -> String {
    format!(
        "{}: {} segments played, {} stalls ({:.1}s), {} skipped, {} bytes, average {:.0} kbps, {} up / {} down shifts in {:.1}s",
        result.algorithm,
        result.segments_played,
        result.stall_events,
        result.stall_duration_seconds,
        result.segments_skipped,
        result.total_bytes,
        result.average_bitrate / 1000.0,
        result.up_shifts,
        result.down_shifts,
        result.elapsed_seconds
    )
}

pub fn comparison_table(results: &[SessionResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:>8} {:>7} {:>9} {:>8} {:>12} {:>13} {:>7}",
        "algo", "played", "stalls", "stall_s", "skipped", "bytes", "avg_kbps", "shifts"
    );
    for r in results {
        let _ = writeln!(
            out,
            "{:<8} {:>8} {:>7} {:>9.1} {:>8} {:>12} {:>13.0} {:>7}",
            r.algorithm.to_string(),
            r.segments_played,
            r.stall_events,
            r.stall_duration_seconds,
            r.segments_skipped,
            r.total_bytes,
            r.average_bitrate / 1000.0,
            r.up_shifts + r.down_shifts
        );
    }
    out
}

/// Runs every requested algorithm in turn over the same manifest. Stops at
/// the first fatal session error.
pub async fn play(args: &Args, manifest: &Manifest, callback: EventCallback) -> Result<Vec<SessionResult>, ClientError> {
    let mut results = Vec::new();
    for algorithm in args.playback.algorithms() {
        let artifacts = args.download.then(|| artifact_dir(Path::new(".")));
        if let Some(dir) = &artifacts {
            info!("Keeping segments of the {algorithm} session in {}", dir.display());
        }
        let player = DashPlayer::new(args.player_config(artifacts), callback.clone())?;

        let outcome = tokio::select! {
            outcome = player.run(manifest, algorithm, args.segment_limit, args.use_pep) => outcome,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping playback");
                player.stop();
                Err(SessionError::Cancelled)
            }
        };
        let result = outcome.map_err(|source| {
            error!("{algorithm} playback failed: {source}");
            ClientError::Session { algorithm, source }
        })?;
        info!("{}", summary(&result));
        results.push(result);
    }
    Ok(results)
}

/// Entry point of the binary once logging is set up.
pub async fn run(args: &Args, callback: EventCallback) -> Result<(), ClientError> {
    let manifest = load_manifest(args).await?;
    if args.list {
        print!("{}", describe_representations(&manifest));
        return Ok(());
    }

    let results = play(args, &manifest, callback).await?;
    if results.len() > 1 {
        print!("{}", comparison_table(&results));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dash_player::mpd::{Representation, Segment};

    fn manifest(bitrates: &[u64], segments: u64) -> Manifest {
        let representations = bitrates
            .iter()
            .map(|&bandwidth| Representation {
                id: format!("{}k", bandwidth / 1000),
                bandwidth,
                initialization: None,
                segments: (1..=segments)
                    .map(|n| Segment {
                        sequence_number: n,
                        url: format!("http://cdn.test/{bandwidth}/{n}.m4s"),
                        byte_size: bandwidth / 4,
                        duration: 2.0,
                    })
                    .collect(),
            })
            .collect();
        Manifest::new("http://cdn.test/manifest.mpd", segments as f64 * 2.0, representations).unwrap()
    }

    fn result(algorithm: Algorithm, played: u64, stalls: u32) -> SessionResult {
        SessionResult {
            algorithm,
            segments_played: played,
            stall_events: stalls,
            total_bytes: 1_250_000,
            segments_downloaded: played,
            segments_skipped: 0,
            up_shifts: 2,
            down_shifts: 1,
            average_bitrate: 1_500_000.0,
            stall_duration_seconds: 0.0,
            elapsed_seconds: 20.0,
        }
    }

    #[test]
    fn lists_every_representation() {
        let manifest = manifest(&[500_000, 1_000_000, 2_000_000], 10);
        let listing = describe_representations(&manifest);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("500000"));
        assert!(lines[3].contains("2000000"));
        assert!(lines[3].trim_end().ends_with("10"));
    }

    #[test]
    fn artifact_directories_are_temp_prefixed() {
        let dir = artifact_dir(Path::new("/tmp/out"));
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert!(dir.starts_with("/tmp/out"));
        assert!(name.starts_with("TEMP_"));
        assert_eq!(name.len(), "TEMP_".len() + 6);
    }

    #[test]
    fn comparison_table_has_a_row_per_algorithm() {
        let results = vec![
            result(Algorithm::Basic, 10, 0),
            result(Algorithm::Sara, 10, 1),
            result(Algorithm::Netflix, 9, 2),
        ];
        let table = comparison_table(&results);
        let rows: Vec<&str> = table.lines().collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[1].starts_with("basic"));
        assert!(rows[3].starts_with("netflix"));
        assert!(summary(&results[2]).contains("2 stalls"));
    }
}
