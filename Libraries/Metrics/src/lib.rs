mod metrics;
mod server;
mod utils;

pub use metrics::{get_metrics, Metrics, MetricsBuilder, MetricsError};
pub use server::{metrics_handler, router, start_server};
pub use utils::{get_all_interfaces, spawn_update_loop};
