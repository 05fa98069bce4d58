//! Tumbler: an HTTP dice service with end-to-end telemetry.
//!
//! # Usage
//!
//! ```bash
//! tumbler --port 5000 --log-level info
//! ```
//!
//! Environment variables can also be used:
//! - `APP_SERVICE_NAME`: Service name attached to all telemetry
//! - `TRACE_ENDPOINT`: OTLP trace collector endpoint
//! - `APP_HOST_NAME`: Host to bind to
//! - `APP_PORT`: Port to listen on
//! - `APP_LOG_FILE`: File sink for the correlated request log
//! - `RUST_LOG`: Diagnostics log level (trace, debug, info, warn, error)

use std::sync::Arc;

use tokio::sync::watch;

use tumbler::config::Config;
use tumbler::server::run_server;
use tumbler::telemetry::{logging, Telemetry};

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Tumbler v{} - HTTP Dice Service

  Configuration:
    Address:        {}:{}
    Service Name:   {}
    Trace Endpoint: {}
    Request Log:    {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.host,
        config.port,
        config.service_name,
        config.trace_endpoint,
        config.log_file.display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize diagnostics logging
    logging::init_tracing(&config.log_level);

    // Assemble the telemetry pipeline (OTLP export, metrics, request log)
    let telemetry = Arc::new(Telemetry::init(&config)?);

    // Print startup banner
    print_banner(&config);

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn signal handler task
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        // Wait for SIGTERM or SIGINT (Ctrl+C)
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("failed to listen for ctrl+c");
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        // Signal shutdown
        let _ = shutdown_tx_clone.send(true);
    });

    // Run the server
    run_server(config, Arc::clone(&telemetry), shutdown_rx).await?;

    // Final bounded flush of any queued spans
    telemetry.shutdown().await;

    tracing::info!("Tumbler shutdown complete");
    Ok(())
}
