//! Test utilities and server harness for Tumbler tests.
//!
//! Provides:
//! - In-process test server setup with capturing telemetry
//! - A buffer-backed log sink
//! - Polling helper for async assertions

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tumbler::server::{router, AppState};
use tumbler::telemetry::testing::InMemorySpanExporter;
use tumbler::telemetry::{BatchConfig, RequestLog, Resource, Telemetry};

/// Log sink backed by a shared buffer, for asserting on emitted records.
#[derive(Clone, Default)]
pub struct BufferSink(Arc<Mutex<Vec<u8>>>);

impl BufferSink {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).expect("log output is utf-8")
    }
}

impl Write for BufferSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Build an isolated telemetry pipeline around a capturing exporter.
///
/// Uses a short flush interval so tests can observe exported spans quickly.
pub fn test_telemetry(exporter: InMemorySpanExporter, log_sink: BufferSink) -> Telemetry {
    let batch = BatchConfig {
        scheduled_delay: Duration::from_millis(20),
        ..BatchConfig::default()
    };
    Telemetry::with_parts(
        Resource::new("tumbler-test"),
        Box::new(exporter),
        RequestLog::new("tumbler-test", vec![Box::new(log_sink)]),
        batch,
    )
}

/// In-process HTTP server over an isolated telemetry pipeline.
pub struct TestServer {
    pub addr: SocketAddr,
    pub telemetry: Arc<Telemetry>,
    pub state: Arc<AppState>,
    pub exporter: InMemorySpanExporter,
    pub log_sink: BufferSink,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server on an ephemeral local port.
    pub async fn start() -> Self {
        tumbler::telemetry::logging::init_test_tracing();

        let exporter = InMemorySpanExporter::default();
        let log_sink = BufferSink::default();
        let telemetry = Arc::new(test_telemetry(exporter.clone(), log_sink.clone()));

        let state = Arc::new(AppState::new(Arc::clone(&telemetry)));
        let app = router(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().expect("listener has no local addr");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .expect("test server failed");
        });

        Self {
            addr,
            telemetry,
            state,
            exporter,
            log_sink,
            shutdown_tx,
            handle,
        }
    }

    /// Absolute URL for a path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the server and flush the telemetry pipeline.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        self.telemetry.shutdown().await;
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Arguments
///
/// * `timeout` - Maximum time to wait
/// * `condition` - Closure that returns true when condition is met
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
