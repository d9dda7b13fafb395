//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): admitted/rejected requests by outcome
//! - `gateway_rejections_total` (counter): rejections by stage and error code
//! - `gateway_rate_limited_total` (counter): blocks by limiter dimension
//! - `gateway_audit_entries_total` (counter): access decisions by success
//! - `gateway_admission_duration_seconds` (histogram): pipeline latency
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter serves its own HTTP listener

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Prometheus metrics endpoint started");
        }
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus recorder"),
    }
}

fn describe() {
    ::metrics::describe_counter!("gateway_requests_total", "Requests by admission outcome");
    ::metrics::describe_counter!("gateway_rejections_total", "Rejections by stage and code");
    ::metrics::describe_counter!("gateway_rate_limited_total", "Rate limit blocks by dimension");
    ::metrics::describe_counter!("gateway_audit_entries_total", "Access control decisions");
    ::metrics::describe_histogram!(
        "gateway_admission_duration_seconds",
        "Time spent in the admission pipeline"
    );
}

/// Final outcome of a request and how long the pipeline took.
pub fn record_request(outcome: &'static str, start: Instant) {
    ::metrics::counter!("gateway_requests_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("gateway_admission_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rejection(stage: &'static str, code: &'static str) {
    ::metrics::counter!("gateway_rejections_total", "stage" => stage, "code" => code).increment(1);
}

pub fn record_rate_limited(dimension: &'static str) {
    ::metrics::counter!("gateway_rate_limited_total", "dimension" => dimension).increment(1);
}

pub fn record_audit_entry(success: bool) {
    let success = if success { "true" } else { "false" };
    ::metrics::counter!("gateway_audit_entries_total", "success" => success).increment(1);
}
