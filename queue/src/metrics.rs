//! Prometheus metrics for the purchase queue.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `purchase_queue_admissions_total{path}` - Slots granted (`direct` or `promotion`)
//! - `purchase_queue_joins_waiting_total` - Buyers placed in a wait line
//! - `purchase_queue_departures_total{status}` - Slots or entries released
//! - `purchase_queue_slots_expired_total` - Reservations reclaimed after lapsing
//! - `purchase_queue_waiters_timed_out_total` - Waiters dropped after the queue timeout
//! - `purchase_queue_audit_write_failures_total` - Transitions the audit store refused
//! - `purchase_queue_store_errors_total{operation}` - Failed Redis operations
//! - `purchase_queue_postgres_errors_total` - Failed `PostgreSQL` statements
//! - `purchase_queue_stream_dropped_ticks_total` - Snapshots dropped for slow subscribers
//! - `purchase_queue_sweeps_total` - Background and on-demand sweeps
//!
//! ## Gauges
//! - `purchase_queue_stream_subscribers` - Open stats streams
//!
//! ## Histograms
//! - `purchase_queue_http_request_duration_seconds{method,status}` - Request latency

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and describe every metric.
///
/// The returned handle renders the text exposition for `/metrics`.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed.
pub fn install() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    tracing::info!("Queue metrics registered");
    Ok(handle)
}

/// Register all metric descriptions.
fn register_metrics() {
    // Admission
    describe_counter!(
        "purchase_queue_admissions_total",
        "Slots granted, by path (direct, promotion)"
    );
    describe_counter!(
        "purchase_queue_joins_waiting_total",
        "Buyers placed in a wait line"
    );
    describe_counter!(
        "purchase_queue_departures_total",
        "Slots or wait-line entries released, by status"
    );
    describe_counter!(
        "purchase_queue_slots_expired_total",
        "Reservations reclaimed after their window lapsed"
    );
    describe_counter!(
        "purchase_queue_waiters_timed_out_total",
        "Waiters dropped after the queue timeout"
    );
    describe_counter!("purchase_queue_sweeps_total", "Queue sweeps run");

    // Stores
    describe_counter!(
        "purchase_queue_store_errors_total",
        "Failed fast-store operations, by operation"
    );
    describe_counter!(
        "purchase_queue_postgres_errors_total",
        "Failed audit-store statements"
    );
    describe_counter!(
        "purchase_queue_audit_write_failures_total",
        "Status transitions that could not be recorded"
    );

    // Streams
    describe_gauge!(
        "purchase_queue_stream_subscribers",
        "Open stats stream subscriptions"
    );
    describe_counter!(
        "purchase_queue_stream_dropped_ticks_total",
        "Snapshots dropped because a subscriber was lagging"
    );

    // HTTP
    describe_histogram!(
        "purchase_queue_http_request_duration_seconds",
        "HTTP request latency"
    );
}
