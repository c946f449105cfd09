use std::time::Duration;

use metrics::{spawn_update_loop, start_server};
use pep_proxy::args::{get_log_level_filter, parse_args};
use pep_proxy::utils::{create_metrics, event_callback};
use pep_proxy::ProxyServer;
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
            .server_addr(([127, 0, 0, 1], 5557))
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

    info!("Starting PEP proxy");
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

    let server = ProxyServer::bind(args.proxy_config())?.with_callback(event_callback(metrics));
    let cancel = server.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing all connections");
            cancel.cancel();
        }
    });

    let stats = server.stats();
    server.run().await?;
    info!("{:?}", stats.snapshot());
    Ok(())
}
