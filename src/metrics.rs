//! Capture metrics
//!
//! Thin wrappers over the `metrics` facade so call sites stay one line and the
//! metric names live in one place. Without an installed recorder every call is
//! a no-op.

use crate::{RenderStrategy, SnapshotError};
use metrics::{counter, describe_counter, describe_histogram, histogram, increment_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

pub const CAPTURES_TOTAL: &str = "snapshot_captures_total";
pub const FAILURES_TOTAL: &str = "snapshot_failures_total";
pub const FALLBACKS_TOTAL: &str = "snapshot_fallbacks_total";
pub const CAPTURE_SECONDS: &str = "snapshot_capture_seconds";
pub const HISTORY_APPENDED_TOTAL: &str = "history_entries_appended_total";
pub const HISTORY_DROPPED_TOTAL: &str = "history_entries_dropped_total";

/// Install the Prometheus recorder and its scrape endpoint on `port`.
pub fn install_prometheus_exporter(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    info!("Prometheus metrics available on http://{}/metrics", addr);
    Ok(())
}

fn describe_metrics() {
    describe_counter!(CAPTURES_TOTAL, "Capture attempts by strategy and outcome");
    describe_counter!(FAILURES_TOTAL, "Failed captures by error kind");
    describe_counter!(FALLBACKS_TOTAL, "HTTP captures that fell back to the browser");
    describe_histogram!(CAPTURE_SECONDS, "Wall time of a single strategy attempt");
    describe_counter!(HISTORY_APPENDED_TOTAL, "Entries written to the history log");
    describe_counter!(HISTORY_DROPPED_TOTAL, "Entries lost because the history append failed");
}

/// One strategy attempt finished.
pub fn record_attempt(strategy: RenderStrategy, result: &Result<String, SnapshotError>, elapsed: Duration) {
    let outcome = if result.is_ok() { "success" } else { "failure" };
    increment_counter!(CAPTURES_TOTAL, "strategy" => strategy.as_str(), "outcome" => outcome);
    histogram!(CAPTURE_SECONDS, elapsed.as_secs_f64(), "strategy" => strategy.as_str());
}

/// A capture failed for good.
pub fn record_failure(error: &SnapshotError) {
    increment_counter!(FAILURES_TOTAL, "kind" => error.kind());
}

pub fn record_fallback() {
    increment_counter!(FALLBACKS_TOTAL);
}

pub fn record_history_appended(count: usize) {
    counter!(HISTORY_APPENDED_TOTAL, count as u64);
}

pub fn record_history_dropped(count: usize) {
    counter!(HISTORY_DROPPED_TOTAL, count as u64);
}
