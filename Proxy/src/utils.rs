use std::sync::Arc;

use metrics::{get_all_interfaces, Metrics, MetricsBuilder, MetricsError};
use tracing::{debug, info};

use crate::event::{ProxyEvent, ProxyEventCallback};

pub const CONNECTIONS_TOTAL: &str = "connections_total";
pub const CONNECTIONS_ACTIVE: &str = "connections_active";
pub const CONNECTION_ERRORS_TOTAL: &str = "connection_errors_total";
pub const BYTES_CLIENT_TO_TARGET_TOTAL: &str = "bytes_client_to_target_total";
pub const BYTES_TARGET_TO_CLIENT_TOTAL: &str = "bytes_target_to_client_total";

/// Installs the process-wide metrics instance with the proxy's counters.
pub fn create_metrics() -> Result<Metrics, MetricsError> {
    let interfaces = get_all_interfaces();
    info!("Tracking the following interfaces: {:?}", interfaces);

    let mut builder = MetricsBuilder::new()
        .add_label("mode", "proxy")
        .add_counter(CONNECTIONS_TOTAL, "Accepted client connections")
        .add_gauge(CONNECTIONS_ACTIVE, "Connections currently relaying")
        .add_counter(CONNECTION_ERRORS_TOTAL, "Connections that ended with an error")
        .add_counter(BYTES_CLIENT_TO_TARGET_TOTAL, "Bytes relayed from clients to targets")
        .add_counter(BYTES_TARGET_TO_CLIENT_TOTAL, "Bytes relayed from targets to clients");
    for interface in interfaces {
        builder = builder.track_interface(&interface);
    }
    builder.install()
}

/// Updates `metrics` from the proxy event stream.
pub fn record_event(metrics: &Metrics, event: &ProxyEvent) {
    match event {
        ProxyEvent::Accepted { .. } => {
            metrics.inc_counter(CONNECTIONS_TOTAL, 1);
            metrics.add_gauge(CONNECTIONS_ACTIVE, 1.0);
        }
        ProxyEvent::Established { .. } => {}
        ProxyEvent::Closed {
            client_to_target,
            target_to_client,
            ..
        } => {
            metrics.add_gauge(CONNECTIONS_ACTIVE, -1.0);
            metrics.inc_counter(BYTES_CLIENT_TO_TARGET_TOTAL, *client_to_target);
            metrics.inc_counter(BYTES_TARGET_TO_CLIENT_TOTAL, *target_to_client);
        }
        ProxyEvent::Error {
            client_to_target,
            target_to_client,
            ..
        } => {
            metrics.add_gauge(CONNECTIONS_ACTIVE, -1.0);
            metrics.inc_counter(CONNECTION_ERRORS_TOTAL, 1);
            metrics.inc_counter(BYTES_CLIENT_TO_TARGET_TOTAL, *client_to_target);
            metrics.inc_counter(BYTES_TARGET_TO_CLIENT_TOTAL, *target_to_client);
        }
    }
}

/// Event sink of the binary: every event is logged as JSON, and counted
/// when metrics are enabled.
pub fn event_callback(metrics: Option<Metrics>) -> ProxyEventCallback {
    Arc::new(move |event: ProxyEvent| {
        match serde_json::to_string(&event) {
            Ok(json) => debug!("{json}"),
            Err(e) => debug!("Unserializable event {event:?}: {e}"),
        }
        if let Some(metrics) = &metrics {
            record_event(metrics, &event);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_metrics() -> Metrics {
        MetricsBuilder::new()
            .add_counter(CONNECTIONS_TOTAL, "")
            .add_gauge(CONNECTIONS_ACTIVE, "")
            .add_counter(CONNECTION_ERRORS_TOTAL, "")
            .add_counter(BYTES_CLIENT_TO_TARGET_TOTAL, "")
            .add_counter(BYTES_TARGET_TO_CLIENT_TOTAL, "")
            .build()
            .unwrap()
    }

    #[test]
    fn lifecycle_events_update_counters() {
        let metrics = proxy_metrics();
        let callback = event_callback(Some(metrics.clone()));
        let peer = "127.0.0.1:5000".parse().unwrap();

        callback(ProxyEvent::Accepted { connection_id: 1, peer });
        callback(ProxyEvent::Accepted { connection_id: 2, peer });
        callback(ProxyEvent::Closed {
            connection_id: 1,
            client_to_target: 300,
            target_to_client: 7000,
            duration_seconds: 1.0,
            transfer_rate_bps: 58_400.0,
        });
        callback(ProxyEvent::Error {
            connection_id: 2,
            error: "relay client->target failed: Connection reset by peer".to_string(),
            client_to_target: 40,
            target_to_client: 500,
            duration_seconds: 0.5,
            transfer_rate_bps: 8640.0,
        });

        assert_eq!(metrics.counter_value(CONNECTIONS_TOTAL), Some(2));
        assert_eq!(metrics.gauge_value(CONNECTIONS_ACTIVE), Some(0.0));
        assert_eq!(metrics.counter_value(CONNECTION_ERRORS_TOTAL), Some(1));
        // Bytes relayed before a reset still count.
        assert_eq!(metrics.counter_value(BYTES_CLIENT_TO_TARGET_TOTAL), Some(340));
        assert_eq!(metrics.counter_value(BYTES_TARGET_TO_CLIENT_TOTAL), Some(7500));
    }
}
