//! Correlated request logging and diagnostics setup.
//!
//! [`RequestLog`] is the request-path logger: every record is enriched with
//! the active trace/span identifiers read from the same [`TraceContext`]
//! that scoped spans activate on, then written synchronously to every
//! configured sink. Internal diagnostics (export failures, scrape errors)
//! go through `tracing` instead and land on stderr, keeping the two record
//! streams separable.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use opentelemetry::trace::{SpanId, TraceId};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::trace::TraceContext;

/// Initialize the diagnostics subscriber.
///
/// Honors `RUST_LOG` when set, otherwise falls back to the configured level
/// for this crate.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,tumbler={log_level}")));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}

/// One enriched log record, built at emission time and discarded after the
/// sinks have seen it.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: OffsetDateTime,
    pub level: Level,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
    pub service_name: String,
    pub message: String,
}

impl LogRecord {
    /// Render the single-line sink format.
    ///
    /// The trace fields are always present: with no active span the all-zero
    /// sentinel identifiers are substituted, so the format never breaks.
    pub fn render(&self) -> String {
        let timestamp = self
            .timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| "-".to_string());
        format!(
            "{timestamp} {level} [trace_id={trace_id} span_id={span_id} resource.service.name={service} trace_sampled={sampled}] - {message}",
            level = self.level,
            trace_id = self.trace_id,
            span_id = self.span_id,
            service = self.service_name,
            sampled = self.sampled,
            message = self.message,
        )
    }
}

/// A destination for rendered log records.
pub type LogSink = Box<dyn Write + Send>;

struct RequestLogInner {
    service_name: String,
    max_level: Level,
    sinks: Vec<Mutex<LogSink>>,
}

/// Trace-correlated request logger fanning out to multiple sinks.
///
/// Cheap to clone; all clones share the same sinks.
#[derive(Clone)]
pub struct RequestLog {
    inner: Arc<RequestLogInner>,
}

impl RequestLog {
    /// Create a logger writing to the given sinks, filtering below INFO.
    pub fn new(service_name: impl Into<String>, sinks: Vec<LogSink>) -> Self {
        Self::with_level(service_name, sinks, Level::INFO)
    }

    /// Create a logger with an explicit level threshold.
    pub fn with_level(
        service_name: impl Into<String>,
        sinks: Vec<LogSink>,
        max_level: Level,
    ) -> Self {
        Self {
            inner: Arc::new(RequestLogInner {
                service_name: service_name.into(),
                max_level,
                sinks: sinks.into_iter().map(Mutex::new).collect(),
            }),
        }
    }

    /// Create a logger with the standard sinks: stdout plus an append-only
    /// file at `path` (parent directories are created as needed).
    pub fn with_console_and_file(
        service_name: impl Into<String>,
        path: &Path,
    ) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(
            service_name,
            vec![Box::new(io::stdout()), Box::new(file)],
        ))
    }

    pub fn error(&self, ctx: &TraceContext, message: impl AsRef<str>) {
        self.emit(ctx, Level::ERROR, message.as_ref());
    }

    pub fn warn(&self, ctx: &TraceContext, message: impl AsRef<str>) {
        self.emit(ctx, Level::WARN, message.as_ref());
    }

    pub fn info(&self, ctx: &TraceContext, message: impl AsRef<str>) {
        self.emit(ctx, Level::INFO, message.as_ref());
    }

    pub fn debug(&self, ctx: &TraceContext, message: impl AsRef<str>) {
        self.emit(ctx, Level::DEBUG, message.as_ref());
    }

    /// Build the enriched record for the context's current span and write it
    /// to every sink.
    pub fn emit(&self, ctx: &TraceContext, level: Level, message: &str) {
        if level > self.inner.max_level {
            return;
        }
        let record = self.make_record(ctx, level, message);
        self.write_record(&record);
    }

    fn make_record(&self, ctx: &TraceContext, level: Level, message: &str) -> LogRecord {
        let (trace_id, span_id, sampled) = match ctx.current_span_context() {
            Some(span) => (span.trace_id(), span.span_id(), span.is_sampled()),
            None => (TraceId::INVALID, SpanId::INVALID, false),
        };
        LogRecord {
            timestamp: OffsetDateTime::now_utc(),
            level,
            trace_id,
            span_id,
            sampled,
            service_name: self.inner.service_name.clone(),
            message: message.to_string(),
        }
    }

    /// Write to all sinks; a failure on one sink never suppresses the others.
    fn write_record(&self, record: &LogRecord) {
        let line = record.render();
        for (index, sink) in self.inner.sinks.iter().enumerate() {
            let mut sink = sink.lock().unwrap();
            let result = writeln!(sink, "{line}").and_then(|()| sink.flush());
            if let Err(error) = result {
                tracing::warn!(sink = index, %error, "failed to write log record to sink");
            }
        }
    }
}
