use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use dash_client::args::Args;
use dash_client::error::ClientError;
use dash_client::events::{event_callback, EventLog};
use dash_client::session::{describe_representations, load_manifest, play};
use dash_player::{Algorithm, SessionError};
use tokio::net::TcpListener;

const MANIFEST: &str = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" mediaPresentationDuration="PT1S" minBufferTime="PT1S">
  <Period>
    <BaseURL>media/</BaseURL>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate media="$RepresentationID$_$Number$.m4s" startNumber="1" duration="500" timescale="1000"/>
      <Representation id="360p" bandwidth="400000"/>
      <Representation id="720p" bandwidth="1600000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

async fn media(Path(name): Path<String>) -> Result<Vec<u8>, StatusCode> {
    match name.split('_').next() {
        Some("360p") => Ok(vec![1u8; 25_000]),
        Some("720p") => Ok(vec![2u8; 100_000]),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn serve() -> SocketAddr {
    let app = Router::new()
        .route("/manifest.mpd", get(|| async { MANIFEST }))
        .route("/media/:name", get(media));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn args(addr: SocketAddr, path: &str, extra: &[&str]) -> Args {
    let manifest = format!("http://{addr}/{path}");
    let mut argv = vec!["dash-client", "-m", manifest.as_str(), "--initial-buffer", "0.5"];
    argv.extend_from_slice(extra);
    Args::parse_from(argv)
}

#[tokio::test]
async fn list_mode_describes_the_manifest() {
    let addr = serve().await;
    let manifest = load_manifest(&args(addr, "manifest.mpd", &["-l"])).await.unwrap();
    let listing = describe_representations(&manifest);
    assert!(listing.contains("360p"));
    assert!(listing.contains("1600000"));
}

#[tokio::test]
async fn manifest_failures_name_the_stage() {
    let addr = serve().await;
    let error = load_manifest(&args(addr, "missing.mpd", &[])).await.unwrap_err();
    assert!(matches!(error, ClientError::Manifest(_)));
    assert!(error.to_string().starts_with("manifest load failed"));
}

#[tokio::test]
async fn all_mode_plays_every_algorithm_and_logs_events() {
    let addr = serve().await;
    let log_path = std::env::temp_dir().join(format!("dash-client-session-{}.jsonl", std::process::id()));
    let _ = std::fs::remove_file(&log_path);

    let args = args(addr, "manifest.mpd", &["-p", "all"]);
    let manifest = load_manifest(&args).await.unwrap();
    let log = Arc::new(EventLog::open(&log_path).unwrap());
    let results = play(&args, &manifest, event_callback(Some(log), None)).await.unwrap();

    let algorithms: Vec<Algorithm> = results.iter().map(|r| r.algorithm).collect();
    assert_eq!(algorithms, Algorithm::ALL.to_vec());
    for result in &results {
        assert_eq!(result.segments_played, 2);
        assert_eq!(result.segments_skipped, 0);
        assert!(result.total_bytes >= 50_000);
    }

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let playback_events = contents
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .filter(|event| event["event"] == "playback")
        .count();
    assert_eq!(playback_events, 6);
    std::fs::remove_file(&log_path).unwrap();
}

#[tokio::test]
async fn pep_without_a_listening_proxy_fails_the_session() {
    let addr = serve().await;
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port().to_string()
    };
    let args = args(
        addr,
        "manifest.mpd",
        &["--use-pep", "--pep-host", "127.0.0.1", "--pep-port", &closed, "--max-retries", "0", "--max-consecutive-failures", "2"],
    );
    let manifest = {
        let direct = Args { use_pep: false, ..args.clone() };
        load_manifest(&direct).await.unwrap()
    };

    let error = play(&args, &manifest, event_callback(None, None)).await.unwrap_err();
    assert!(matches!(
        error,
        ClientError::Session {
            algorithm: Algorithm::Basic,
            source: SessionError::ConsecutiveFailures { .. }
        }
    ));
}
