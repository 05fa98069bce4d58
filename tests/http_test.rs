//! End-to-end tests over the HTTP surface.
//!
//! Tests:
//! - Request counter increments exactly once per business call
//! - Status code tracks the declared valid range
//! - Scrape and health endpoints
//! - Request log records carry trace identifiers

mod common;

use std::time::Duration;

/// Each /rolldice call increments the request counter by exactly one,
/// whatever the outcome of the roll.
#[tokio::test]
async fn test_rolldice_increments_counter_once_per_call() {
    let server = common::TestServer::start().await;
    let client = reqwest::Client::new();

    for expected in 1..=5u64 {
        let response = client
            .get(server.url("/rolldice"))
            .send()
            .await
            .expect("request failed");
        assert!(
            response.status().as_u16() == 200 || response.status().as_u16() == 500,
            "unexpected status {}",
            response.status()
        );
        assert_eq!(server.state.request_counter.value(), expected);
    }

    server.shutdown().await;
}

/// The response is a server error if and only if the roll falls outside the
/// checked range; successful responses carry the roll itself.
#[tokio::test]
async fn test_rolldice_status_tracks_valid_range() {
    let server = common::TestServer::start().await;
    let client = reqwest::Client::new();

    for _ in 0..40 {
        let response = client
            .get(server.url("/rolldice"))
            .send()
            .await
            .expect("request failed");
        let status = response.status().as_u16();
        let body = response.text().await.expect("body");

        if status == 200 {
            let value: i64 = body.parse().expect("roll body is numeric");
            assert!((0..=6).contains(&value), "accepted out-of-range roll {value}");
        } else {
            assert_eq!(status, 500);
            assert_eq!(body, "Something went wrong!");
        }
    }

    server.shutdown().await;
}

/// The scrape endpoint serves the exposition text with current totals.
#[tokio::test]
async fn test_metrics_endpoint_serves_exposition_text() {
    let server = common::TestServer::start().await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        client
            .get(server.url("/rolldice"))
            .send()
            .await
            .expect("request failed");
    }

    let response = client
        .get(server.url("/metrics"))
        .send()
        .await
        .expect("scrape failed");
    assert_eq!(response.status().as_u16(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"), "got {content_type}");

    let body = response.text().await.expect("body");
    assert!(body.contains("# TYPE request_counter counter"));
    assert!(body.contains("request_counter 2"));

    server.shutdown().await;
}

/// The health endpoint reports the service identity.
#[tokio::test]
async fn test_healthz_reports_service() {
    let server = common::TestServer::start().await;

    let response = reqwest::get(server.url("/healthz")).await.expect("health failed");
    assert_eq!(response.status().as_u16(), 200);
    let payload: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["service"], "tumbler-test");

    server.shutdown().await;
}

/// Request log lines carry real trace identifiers while a span is active.
#[tokio::test]
async fn test_request_log_carries_trace_ids() {
    let server = common::TestServer::start().await;

    reqwest::get(server.url("/rolldice"))
        .await
        .expect("request failed");

    let log = server.log_sink.contents();
    let line = log
        .lines()
        .find(|line| line.contains("roll_dice: received a request on /rolldice"))
        .expect("request log line missing");

    assert!(line.contains("resource.service.name=tumbler-test"));
    let trace_id = line
        .split("trace_id=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .expect("trace_id field missing");
    assert_eq!(trace_id.len(), 32);
    assert_ne!(trace_id, "0".repeat(32), "in-span record must not use the sentinel");
    assert!(line.contains("trace_sampled=true"));

    server.shutdown().await;
}

/// Spans produced by a request reach the exporter as one trace tree.
#[tokio::test]
async fn test_request_spans_form_one_trace() {
    let server = common::TestServer::start().await;

    reqwest::get(server.url("/rolldice"))
        .await
        .expect("request failed");

    let exporter = server.exporter.clone();
    let exported = common::wait_for(Duration::from_secs(2), || {
        exporter.get_finished_spans().unwrap().len() == 3
    })
    .await;
    assert!(exported, "expected the request, roll, and job spans");

    let spans = server.exporter.get_finished_spans().unwrap();
    let request = spans
        .iter()
        .find(|s| s.name == "GET /rolldice")
        .expect("request span");
    for name in ["do_roll", "do_important_job"] {
        let child = spans.iter().find(|s| s.name == name).expect("child span");
        assert_eq!(
            child.span_context.trace_id(),
            request.span_context.trace_id()
        );
        assert_eq!(child.parent_span_id, request.span_context.span_id());
    }

    server.shutdown().await;
}
