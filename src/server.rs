//! HTTP server setup and lifecycle.
//!
//! Configures the axum server with:
//! - Dice roll and metrics scrape endpoints
//! - Graceful shutdown support
//! - Health check endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Config;
use crate::service;
use crate::telemetry::{Counter, Telemetry};

/// Error type for server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server state shared across handlers.
pub struct AppState {
    pub telemetry: Arc<Telemetry>,
    pub request_counter: Counter,
}

impl AppState {
    /// Create handler state, registering the request counter on the meter.
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        let request_counter =
            telemetry
                .meter
                .create_counter("request_counter", "Number of requests", "1");
        Self {
            telemetry,
            request_counter,
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rolldice", get(service::roll::roll_dice))
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(get_health))
        .with_state(state)
}

/// Run the Tumbler HTTP server.
///
/// # Arguments
///
/// * `config` - Server configuration
/// * `telemetry` - The assembled telemetry pipeline
/// * `shutdown_rx` - Receiver for shutdown signal
///
/// # Returns
///
/// Returns when the server has shut down.
pub async fn run_server(
    config: Config,
    telemetry: Arc<Telemetry>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let state = Arc::new(AppState::new(telemetry));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Starting Tumbler HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, stopping server");
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Scrape endpoint: current metric state in exposition text format.
///
/// Collection never fails the request; a failing instrument is omitted and
/// the rest are served.
async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.telemetry.meter.collect(),
    )
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    service: String,
    version: &'static str,
}

async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        service: state.telemetry.resource.service_name().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
