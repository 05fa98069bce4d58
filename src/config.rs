//! Service configuration from CLI arguments and environment variables.
//!
//! Every knob has a documented default; values that fail to parse (for
//! example a non-numeric `APP_PORT`) abort startup with a clap error rather
//! than limping along with a guess.

use clap::Parser;
use std::path::PathBuf;

/// Tumbler configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "tumbler", version, about = "HTTP dice service with end-to-end telemetry")]
pub struct Config {
    /// Service name attached to all emitted telemetry.
    #[arg(long, env = "APP_SERVICE_NAME", default_value = "tumbler")]
    pub service_name: String,

    /// OTLP trace collector endpoint.
    #[arg(long, env = "TRACE_ENDPOINT", default_value = "http://localhost:4317")]
    pub trace_endpoint: String,

    /// Host to bind the HTTP server to.
    #[arg(long, env = "APP_HOST_NAME", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "APP_PORT", default_value_t = 5000)]
    pub port: u16,

    /// File sink for the correlated request log.
    #[arg(long, env = "APP_LOG_FILE", default_value = "log/tumbler.log")]
    pub log_file: PathBuf,

    /// Log level for internal diagnostics (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
