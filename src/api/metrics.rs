//! Metric names, recording helpers and the optional Prometheus exporter.
//!
//! Recording goes through the `metrics` facade. Without an installed
//! recorder every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

// Metric names as constants for consistency
pub const BACKEND_REQUESTS_TOTAL: &str = "medscreen_backend_requests_total";
pub const BACKEND_REQUEST_DURATION_SECONDS: &str = "medscreen_backend_request_duration_seconds";
pub const AUTH_OUTCOMES_TOTAL: &str = "medscreen_auth_outcomes_total";
pub const SCANS_DROPPED_TOTAL: &str = "medscreen_scans_dropped_total";
pub const READER_FAILURES_TOTAL: &str = "medscreen_reader_failures_total";

/// Serve Prometheus metrics on `listen` and register descriptions.
///
/// Must be called from within the tokio runtime, once.
pub fn install_exporter(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    describe_metrics();
    tracing::info!(%listen, "Prometheus exporter listening");
    Ok(())
}

/// Register metric descriptions with whatever recorder is installed.
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(
        BACKEND_REQUESTS_TOTAL,
        "Backend calls by endpoint and outcome"
    );
    describe_histogram!(
        BACKEND_REQUEST_DURATION_SECONDS,
        "Backend call latency in seconds"
    );
    describe_counter!(
        AUTH_OUTCOMES_TOTAL,
        "Resolved credentials by result kind"
    );
    describe_counter!(
        SCANS_DROPPED_TOTAL,
        "Credentials dropped because the scan gate was not idle"
    );
    describe_counter!(
        READER_FAILURES_TOTAL,
        "Reader start attempts that reported missing hardware"
    );
}

/// Record one backend round trip.
///
/// `outcome` is the status code for answered calls, or `transport`/`timeout`.
pub fn record_backend_request(endpoint: &'static str, outcome: String, elapsed: Duration) {
    counter!(BACKEND_REQUESTS_TOTAL, "endpoint" => endpoint, "outcome" => outcome).increment(1);
    histogram!(BACKEND_REQUEST_DURATION_SECONDS, "endpoint" => endpoint)
        .record(elapsed.as_secs_f64());
}

pub fn record_auth_outcome(kind: &'static str) {
    counter!(AUTH_OUTCOMES_TOTAL, "kind" => kind).increment(1);
}

/// Record a scan dropped by the gate (`processing`, `cooldown`, `closed`).
pub fn record_scan_dropped(reason: &'static str) {
    counter!(SCANS_DROPPED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_reader_failure() {
    counter!(READER_FAILURES_TOTAL).increment(1);
}
