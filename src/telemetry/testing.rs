//! Test support: a span exporter that captures batches in memory.
//!
//! Small local replica of the SDK's in-memory test exporter so test builds
//! do not need the SDK `testing` feature and the extra runtimes it pulls in.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use opentelemetry::trace::{TraceError, TraceResult};
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};

/// Captures exported spans for assertions; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanExporter {
    /// Snapshot of the spans exported so far, in export order.
    pub fn get_finished_spans(&self) -> TraceResult<Vec<SpanData>> {
        self.spans
            .lock()
            .map(|guard| guard.clone())
            .map_err(|err| TraceError::from(err.to_string()))
    }

    /// Clear the captured spans.
    pub fn reset(&self) {
        if let Ok(mut guard) = self.spans.lock() {
            guard.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, mut batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let result = self
            .spans
            .lock()
            .map(|mut guard| guard.append(&mut batch))
            .map_err(|err| TraceError::from(err.to_string()));
        Box::pin(async move { result })
    }
}
