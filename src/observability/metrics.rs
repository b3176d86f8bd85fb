//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (filter executions, traversals, stream events)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_filter_executions_total` (counter): filter visits by filter, type, status
//! - `gateway_filter_duration_seconds` (histogram): time spent in `apply`
//! - `gateway_traversals_total` (counter): finished chain traversals by type, outcome
//! - `gateway_stream_events_total` (counter): stream frames and messages by direction, kind
//! - `gateway_streams_refused_total` (counter): streams reset past the per-connection limit
//! - `gateway_body_release_failures_total` (counter): flow-control credit that could not be returned
//! - `gateway_active_streams` (gauge): open streams across all connections
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels are static strings or filter names; no per-request cardinality

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// One visit of the runner to a filter.
pub fn record_filter_execution(filter: &str, filter_type: &'static str, status: &'static str, start: Instant) {
    ::metrics::counter!(
        "gateway_filter_executions_total",
        "filter" => filter.to_string(),
        "type" => filter_type,
        "status" => status
    )
    .increment(1);
    ::metrics::histogram!(
        "gateway_filter_duration_seconds",
        "filter" => filter.to_string(),
        "type" => filter_type
    )
    .record(start.elapsed().as_secs_f64());
}

/// A chain traversal reached a terminal state.
pub fn record_traversal(filter_type: &'static str, outcome: &'static str) {
    ::metrics::counter!(
        "gateway_traversals_total",
        "type" => filter_type,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_stream_event(direction: &'static str, kind: &'static str) {
    ::metrics::counter!(
        "gateway_stream_events_total",
        "direction" => direction,
        "kind" => kind
    )
    .increment(1);
}

pub fn record_stream_refused() {
    ::metrics::counter!("gateway_streams_refused_total").increment(1);
}

pub fn record_release_failure() {
    ::metrics::counter!("gateway_body_release_failures_total").increment(1);
}

pub fn record_active_streams(count: usize) {
    ::metrics::gauge!("gateway_active_streams").set(count as f64);
}
