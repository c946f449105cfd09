use std::time::Duration;

use sysinfo::Networks;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::Metrics;

/// Get a list of all available network interfaces on the system.
pub fn get_all_interfaces() -> Vec<String> {
    let networks = Networks::new_with_refreshed_list();
    networks.keys().cloned().collect()
}

/// Refreshes the host gauges of `metrics` every `period` until aborted.
pub fn spawn_update_loop(metrics: Metrics, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            metrics.update();
            debug!("Metrics updated");
        }
    })
}
