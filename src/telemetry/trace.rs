//! Trace provider: explicit-context spans with batched export.
//!
//! Spans are activated on a [`TraceContext`] handle created per logical
//! execution (one per request), never on a process-global or thread-local
//! slot, so concurrent requests cannot observe each other's current span.
//! Ended spans are frozen into [`SpanData`] and queued on a shared buffer;
//! a background worker drains the buffer on a timer or when a batch fills
//! and hands it to the configured exporter. The request path never waits on
//! the export network call.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use opentelemetry::trace::{
    Event, SpanContext, SpanId, SpanKind, Status, TraceFlags, TraceId, TraceState,
};
use opentelemetry::{InstrumentationLibrary, Key, KeyValue, Value};
use opentelemetry_sdk::export::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::trace::{SpanEvents, SpanLinks};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::resource::Resource;

/// Tuning for the span batching pipeline.
///
/// Defaults follow the usual OTLP batch processor settings.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum spans held in the queue; spans beyond this are dropped.
    pub max_queue_size: usize,
    /// Batch size that triggers an early flush, and the chunk size used
    /// per export call.
    pub max_batch_size: usize,
    /// Interval between time-based flushes.
    pub scheduled_delay: Duration,
    /// Bound on the final flush during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

struct TracerInner {
    buffer: Mutex<Vec<SpanData>>,
    notify: Notify,
    dropped: AtomicU64,
    config: BatchConfig,
    scope: InstrumentationLibrary,
}

/// Handle to the span pipeline.
///
/// Cheap to clone; all clones feed the same buffer and worker.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

/// Owns the background flush task; joined on shutdown.
pub struct TracerWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Tracer {
    /// Spawn the batching worker and return the tracer handle plus the
    /// worker handle used to stop it.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(
        mut exporter: Box<dyn SpanExporter>,
        resource: &Resource,
        config: BatchConfig,
    ) -> (Self, TracerWorker) {
        exporter.set_resource(&resource.to_otel());

        let inner = Arc::new(TracerInner {
            buffer: Mutex::new(Vec::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            config,
            scope: InstrumentationLibrary::builder(env!("CARGO_PKG_NAME"))
                .with_version(env!("CARGO_PKG_VERSION"))
                .build(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker_inner = Arc::clone(&inner);
        let handle = tokio::spawn(run_worker(worker_inner, exporter, shutdown_rx));

        (Self { inner }, TracerWorker { shutdown_tx, handle })
    }

    /// Create a fresh execution context with no active span.
    pub fn context(&self) -> TraceContext {
        TraceContext {
            tracer: self.clone(),
            stack: Mutex::new(Vec::new()),
        }
    }

    /// Number of spans waiting in the batch buffer.
    pub fn queued_spans(&self) -> usize {
        self.inner.buffer.lock().unwrap().len()
    }

    /// Number of spans dropped because the queue was full.
    pub fn dropped_spans(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn submit(&self, span: SpanData) {
        let should_notify = {
            let mut buffer = self.inner.buffer.lock().unwrap();
            if buffer.len() >= self.inner.config.max_queue_size {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(name = %span.name, "span queue full, dropping span");
                return;
            }
            buffer.push(span);
            buffer.len() >= self.inner.config.max_batch_size
        };
        if should_notify {
            self.inner.notify.notify_one();
        }
    }
}

impl TracerWorker {
    /// Signal the worker and wait for its final flush.
    ///
    /// The flush itself is bounded by [`BatchConfig::shutdown_timeout`];
    /// anything not exported in time is dropped.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

async fn run_worker(
    inner: Arc<TracerInner>,
    mut exporter: Box<dyn SpanExporter>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(inner.config.scheduled_delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush(&inner, &mut exporter).await;
            }
            _ = inner.notify.notified() => {
                let ready = inner.buffer.lock().unwrap().len() >= inner.config.max_batch_size;
                if ready {
                    flush(&inner, &mut exporter).await;
                }
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }

    if tokio::time::timeout(inner.config.shutdown_timeout, flush(&inner, &mut exporter))
        .await
        .is_err()
    {
        tracing::warn!("span export did not finish before the shutdown deadline");
    }
    exporter.shutdown();
}

/// Drain the buffer and export it. The lock is released before the
/// (possibly slow) export call so producers are never blocked by it.
async fn flush(inner: &TracerInner, exporter: &mut Box<dyn SpanExporter>) {
    let mut batch = {
        let mut buffer = inner.buffer.lock().unwrap();
        std::mem::take(&mut *buffer)
    };
    if batch.is_empty() {
        return;
    }

    while !batch.is_empty() {
        let take = batch.len().min(inner.config.max_batch_size);
        let chunk: Vec<SpanData> = batch.drain(..take).collect();
        let count = chunk.len();
        if let Err(error) = exporter.export(chunk).await {
            tracing::warn!(%error, count, "failed to export span batch");
        }
    }
}

/// One active span on a context's stack.
struct ActiveSpan {
    context: SpanContext,
    parent_span_id: SpanId,
    kind: SpanKind,
    name: Cow<'static, str>,
    start_time: SystemTime,
    attributes: Vec<KeyValue>,
    events: Vec<Event>,
    status: Status,
}

impl ActiveSpan {
    fn into_span_data(self, end_time: SystemTime, scope: InstrumentationLibrary) -> SpanData {
        let mut events = SpanEvents::default();
        events.events = self.events;
        SpanData {
            span_context: self.context,
            parent_span_id: self.parent_span_id,
            span_kind: self.kind,
            name: self.name,
            start_time: self.start_time,
            end_time,
            attributes: self.attributes,
            dropped_attributes_count: 0,
            events,
            links: SpanLinks::default(),
            status: self.status,
            instrumentation_lib: scope,
        }
    }
}

/// Per-execution span activation state.
///
/// One context is created per logical execution (request, task, test) and
/// threaded through the call path. The span stack underneath is guarded by
/// a short mutex so a context may be shared across awaits within its own
/// execution.
pub struct TraceContext {
    tracer: Tracer,
    stack: Mutex<Vec<ActiveSpan>>,
}

impl TraceContext {
    /// Start a span, parented to the current span (or a new root), and make
    /// it current until the returned guard is dropped. The previous current
    /// span is restored on every exit path.
    pub fn start_span(&self, name: impl Into<Cow<'static, str>>) -> ScopedSpan<'_> {
        let mut stack = self.stack.lock().unwrap();
        let (trace_id, parent_span_id, kind) = match stack.last() {
            Some(parent) => (
                parent.context.trace_id(),
                parent.context.span_id(),
                SpanKind::Internal,
            ),
            None => (random_trace_id(), SpanId::INVALID, SpanKind::Server),
        };

        let context = SpanContext::new(
            trace_id,
            random_span_id(),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        stack.push(ActiveSpan {
            context: context.clone(),
            parent_span_id,
            kind,
            name: name.into(),
            start_time: SystemTime::now(),
            attributes: Vec::new(),
            events: Vec::new(),
            status: Status::Ok,
        });

        ScopedSpan { ctx: self, context }
    }

    /// Set an attribute on the current span. No-op when no span is active.
    pub fn set_attribute(&self, key: impl Into<Key>, value: impl Into<Value>) {
        if let Some(top) = self.stack.lock().unwrap().last_mut() {
            top.attributes.push(KeyValue::new(key, value));
        }
    }

    /// Add a timestamped event to the current span, stamped now. No-op when
    /// no span is active.
    pub fn add_event(&self, name: impl Into<Cow<'static, str>>) {
        self.add_event_at(name, SystemTime::now());
    }

    /// Add an event with an explicit timestamp. No-op when no span is active.
    pub fn add_event_at(&self, name: impl Into<Cow<'static, str>>, timestamp: SystemTime) {
        if let Some(top) = self.stack.lock().unwrap().last_mut() {
            top.events.push(Event::new(name, timestamp, Vec::new(), 0));
        }
    }

    /// Mark the current span errored. No-op when no span is active.
    pub fn set_error(&self, description: impl Into<Cow<'static, str>>) {
        if let Some(top) = self.stack.lock().unwrap().last_mut() {
            top.status = Status::error(description.into());
        }
    }

    /// The propagatable identity of the current span, if one is active.
    ///
    /// Read-only: used by the log correlator, never mutated through here.
    pub fn current_span_context(&self) -> Option<SpanContext> {
        self.stack.lock().unwrap().last().map(|s| s.context.clone())
    }
}

/// Guard for an active span scope.
///
/// Dropping the guard ends the span: it is stamped with an end timestamp,
/// frozen, and queued for export. Guards close in LIFO order by Rust
/// scoping, matching the stack discipline underneath.
pub struct ScopedSpan<'a> {
    ctx: &'a TraceContext,
    context: SpanContext,
}

impl ScopedSpan<'_> {
    /// This span's propagatable identity.
    pub fn span_context(&self) -> &SpanContext {
        &self.context
    }
}

impl Drop for ScopedSpan<'_> {
    fn drop(&mut self) {
        let finished = {
            let mut stack = self.ctx.stack.lock().unwrap();
            match stack.pop() {
                Some(top) if top.context.span_id() == self.context.span_id() => Some(top),
                Some(other) => {
                    // Out-of-order drop; leave the stack untouched.
                    stack.push(other);
                    None
                }
                None => None,
            }
        };
        if let Some(span) = finished {
            let scope = self.ctx.tracer.inner.scope.clone();
            self.ctx
                .tracer
                .submit(span.into_span_data(SystemTime::now(), scope));
        }
    }
}

fn random_trace_id() -> TraceId {
    TraceId::from_bytes(Uuid::new_v4().into_bytes())
}

fn random_span_id() -> SpanId {
    let bytes = Uuid::new_v4().into_bytes();
    let mut id = [0u8; 8];
    id.copy_from_slice(&bytes[..8]);
    SpanId::from_bytes(id)
}
