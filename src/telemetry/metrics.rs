//! Pull-based metrics: named instruments collected on scrape.
//!
//! Two instrument kinds exist. A [`Counter`] holds a running total bumped by
//! atomic adds from any number of callers. An observable counter holds no
//! value at all; it stores a callback invoked once per scrape to produce
//! labeled [`Observation`]s. [`Meter::collect`] renders every registered
//! instrument, in registration order, as Prometheus exposition text.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use thiserror::Error;

/// Error type for metric collection.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to read metric source: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed stat line: {0:?}")]
    Malformed(String),

    #[error("duplicate label set emitted for instrument {instrument}")]
    DuplicateLabels { instrument: String },
}

/// Context passed to observable-counter callbacks at scrape time.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeContext {
    /// When this scrape started.
    pub timestamp: SystemTime,
}

/// A single labeled data point produced by an observable counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub value: u64,
    pub labels: Vec<(String, String)>,
}

impl Observation {
    /// Create an observation with no labels.
    pub fn new(value: u64) -> Self {
        Self {
            value,
            labels: Vec::new(),
        }
    }

    /// Attach a label. Label order is preserved in the rendered output.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

type ObservableCallback =
    Arc<dyn Fn(&ScrapeContext) -> Result<Vec<Observation>, MetricsError> + Send + Sync>;

#[derive(Debug, Clone)]
struct Descriptor {
    name: String,
    rendered: String,
    description: String,
    #[allow(dead_code)]
    unit: String,
}

impl Descriptor {
    fn new(name: &str, description: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            rendered: sanitize_metric_name(name),
            description: description.to_string(),
            unit: unit.to_string(),
        }
    }
}

#[derive(Clone)]
enum Instrument {
    Counter {
        descriptor: Descriptor,
        value: Arc<AtomicU64>,
    },
    Observable {
        descriptor: Descriptor,
        callback: ObservableCallback,
    },
}

/// Monotonic counter handle.
///
/// Clones share the same total; `add` is a single atomic instruction, safe
/// under arbitrary concurrent callers. The unsigned delta makes the
/// non-negativity contract a type invariant.
#[derive(Clone)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Add a non-negative delta to the running total.
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// The current running total.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

struct MeterInner {
    instruments: Mutex<Vec<Instrument>>,
    scrape_failures: AtomicU64,
}

/// Instrument registry and scrape entry point.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct Meter {
    inner: Arc<MeterInner>,
}

impl Meter {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MeterInner {
                instruments: Mutex::new(Vec::new()),
                scrape_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Register a monotonic counter and return its handle.
    pub fn create_counter(&self, name: &str, description: &str, unit: &str) -> Counter {
        let value = Arc::new(AtomicU64::new(0));
        self.inner
            .instruments
            .lock()
            .unwrap()
            .push(Instrument::Counter {
                descriptor: Descriptor::new(name, description, unit),
                value: Arc::clone(&value),
            });
        Counter { value }
    }

    /// Register an observable counter.
    ///
    /// The callback runs once per scrape, never on a timer, so it must be a
    /// pure read of external state. A callback that fails only takes its own
    /// instrument out of that scrape.
    pub fn create_observable_counter<F>(&self, name: &str, callback: F, unit: &str, description: &str)
    where
        F: Fn(&ScrapeContext) -> Result<Vec<Observation>, MetricsError> + Send + Sync + 'static,
    {
        self.inner
            .instruments
            .lock()
            .unwrap()
            .push(Instrument::Observable {
                descriptor: Descriptor::new(name, description, unit),
                callback: Arc::new(callback),
            });
    }

    /// Render every registered instrument as Prometheus exposition text.
    ///
    /// Instruments are enumerated exactly once, in registration order, so
    /// repeated scrapes of unchanged state produce identical output. A
    /// failing callback is logged, counted, and omitted; it never fails the
    /// scrape and never touches other instruments.
    pub fn collect(&self) -> String {
        let cx = ScrapeContext {
            timestamp: SystemTime::now(),
        };
        // Snapshot the registry so slow callbacks from concurrent scrapes
        // never contend on the registration lock.
        let instruments: Vec<Instrument> = self.inner.instruments.lock().unwrap().clone();

        let mut out = String::new();
        for instrument in &instruments {
            match instrument {
                Instrument::Counter { descriptor, value } => {
                    render_header(&mut out, descriptor);
                    let _ = writeln!(out, "{} {}", descriptor.rendered, value.load(Ordering::Relaxed));
                }
                Instrument::Observable {
                    descriptor,
                    callback,
                } => match callback.as_ref()(&cx)
                    .and_then(|obs| check_unique_labels(descriptor, obs))
                {
                    Ok(observations) => {
                        render_header(&mut out, descriptor);
                        for observation in &observations {
                            render_observation(&mut out, descriptor, observation);
                        }
                    }
                    Err(error) => {
                        self.inner.scrape_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            instrument = %descriptor.name,
                            %error,
                            "metric callback failed; instrument omitted from this scrape"
                        );
                    }
                },
            }
        }
        out
    }

    /// Number of callback failures recorded across all scrapes.
    pub fn scrape_failures(&self) -> u64 {
        self.inner.scrape_failures.load(Ordering::Relaxed)
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject callback output that repeats a label set within one scrape.
fn check_unique_labels(
    descriptor: &Descriptor,
    observations: Vec<Observation>,
) -> Result<Vec<Observation>, MetricsError> {
    let mut seen = HashSet::new();
    for observation in &observations {
        let mut key = observation.labels.clone();
        key.sort();
        if !seen.insert(key) {
            return Err(MetricsError::DuplicateLabels {
                instrument: descriptor.name.clone(),
            });
        }
    }
    Ok(observations)
}

fn render_header(out: &mut String, descriptor: &Descriptor) {
    if !descriptor.description.is_empty() {
        let _ = writeln!(out, "# HELP {} {}", descriptor.rendered, descriptor.description);
    }
    let _ = writeln!(out, "# TYPE {} counter", descriptor.rendered);
}

fn render_observation(out: &mut String, descriptor: &Descriptor, observation: &Observation) {
    if observation.labels.is_empty() {
        let _ = writeln!(out, "{} {}", descriptor.rendered, observation.value);
        return;
    }
    let labels = observation
        .labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",");
    let _ = writeln!(out, "{}{{{labels}}} {}", descriptor.rendered, observation.value);
}

/// Replace characters that are invalid in an exposition metric name.
fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
