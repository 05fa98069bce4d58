//! Tumbler: an HTTP dice service built around its own telemetry pipeline.
//!
//! The interesting part of this crate is [`telemetry`]: explicit-context
//! distributed tracing with batched OTLP export, a pull-based metrics
//! registry with scrape-time callbacks, and a request log whose records are
//! correlated with the active trace. The dice endpoints in [`service`] exist
//! to exercise that pipeline.

pub mod config;
pub mod server;
pub mod service;
pub mod telemetry;

pub use config::Config;
pub use telemetry::Telemetry;
