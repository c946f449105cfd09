use std::sync::Arc;
use std::time::Duration;

use dash_client::args::{get_log_level_filter, parse_args};
use dash_client::events::{event_callback, EventLog};
use dash_client::session;
use dash_client::utils::create_metrics;
use metrics::{spawn_update_loop, start_server};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // Build the FmtSubscriber layer
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(get_log_level_filter(&args));

    // Initialize console tracing if enabled
    #[cfg(feature = "console-tracing")]
    let subscriber = {
        let console_layer = console_subscriber::ConsoleLayer::builder()
            .retention(Duration::from_secs(60))
            .server_addr(([127, 0, 0, 1], 5555))
            .spawn();
        tracing_subscriber::registry()
            .with(console_layer)
            .with(fmt_layer)
    };

    #[cfg(not(feature = "console-tracing"))]
    let subscriber = {
        tracing_subscriber::registry()
            .with(fmt_layer)
    };

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting DASH client (headless)");
    info!("{:?}", args);

    let metrics = match args.metrics_port {
        Some(port) => {
            let metrics = create_metrics()?;
            spawn_update_loop(metrics.clone(), Duration::from_secs(1));
            tokio::spawn(async move {
                if let Err(e) = start_server(port).await {
                    error!("Metrics server stopped: {e}");
                }
            });
            Some(metrics)
        }
        None => None,
    };
    let event_log = match &args.event_log {
        Some(path) => Some(Arc::new(EventLog::open(path)?)),
        None => None,
    };

    if let Err(e) = session::run(&args, event_callback(event_log, metrics)).await {
        error!("{e}");
        return Err(e.into());
    }
    Ok(())
}
