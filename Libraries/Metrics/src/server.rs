use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{get_metrics, Metrics, MetricsError};

/// Handler function for the /metrics endpoint.
pub async fn metrics_handler(State(metrics): State<Metrics>) -> Result<String, StatusCode> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metrics.registry().gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        // We allow cross-origin requests from any origin
        .layer(CorsLayer::permissive())
        .with_state(metrics)
}

/// Serve the installed instance on `0.0.0.0:port` until the task is dropped.
pub async fn start_server(port: u16) -> Result<(), MetricsError> {
    let metrics = get_metrics()?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics available on http://{addr}/metrics");
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
