//! Telemetry infrastructure.
//!
//! Provides:
//! - Explicit-context tracing with batched OTLP export
//! - Pull-based metrics with scrape-time callbacks
//! - Request logs correlated by trace context
//! - Per-core CPU time sampling

pub mod cpu;
pub mod logging;
pub mod metrics;
pub mod resource;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod trace;

pub use logging::RequestLog;
pub use metrics::{Counter, Meter, Observation, ScrapeContext};
pub use resource::Resource;
pub use trace::{BatchConfig, ScopedSpan, TraceContext, Tracer};

use std::sync::Mutex;
use std::time::Duration;

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::export::trace::SpanExporter;
use thiserror::Error;

use crate::config::Config;

/// Error type for telemetry pipeline construction.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to build the span exporter: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),

    #[error("failed to open log sink: {0}")]
    LogSink(#[from] std::io::Error),
}

/// The assembled telemetry pipeline.
///
/// Constructed once at startup and passed by `Arc` to everything that emits
/// telemetry; there is no hidden global state, so tests can run any number
/// of isolated instances side by side.
pub struct Telemetry {
    pub resource: Resource,
    pub tracer: Tracer,
    pub meter: Meter,
    pub log: RequestLog,
    worker: Mutex<Option<trace::TracerWorker>>,
}

impl Telemetry {
    /// Build the pipeline from configuration: OTLP span export to the
    /// configured collector, console + file log sinks, and the CPU time
    /// sampler registered on the meter.
    ///
    /// Must be called within a tokio runtime.
    pub fn init(config: &Config) -> Result<Self, TelemetryInitError> {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(config.trace_endpoint.clone())
            .with_timeout(Duration::from_secs(5))
            .build_span_exporter()?;

        let resource = Resource::new(config.service_name.clone());
        let log =
            RequestLog::with_console_and_file(config.service_name.clone(), &config.log_file)?;

        let telemetry =
            Self::with_parts(resource, Box::new(exporter), log, BatchConfig::default());
        cpu::register(&telemetry.meter, "/proc/stat");
        Ok(telemetry)
    }

    /// Assemble the pipeline from explicit parts.
    ///
    /// This is the seam tests use to swap in capturing exporters and sinks.
    pub fn with_parts(
        resource: Resource,
        exporter: Box<dyn SpanExporter>,
        log: RequestLog,
        batch: BatchConfig,
    ) -> Self {
        let (tracer, worker) = Tracer::spawn(exporter, &resource, batch);
        Self {
            resource,
            tracer,
            meter: Meter::new(),
            log,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stop the batching worker, flushing queued spans within the configured
    /// shutdown bound. Spans not flushed in time are dropped. Idempotent.
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
    }
}
