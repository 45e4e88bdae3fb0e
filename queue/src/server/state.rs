//! Application state for the purchase queue HTTP server.

use crate::manager::QueueManager;
use crate::stats::StatsPublisher;
use crate::sweeper::QueueSweeper;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Admission decisions and audit recording.
    pub manager: Arc<QueueManager>,
    /// Snapshot streams for SSE subscribers.
    pub stats: StatsPublisher,
    /// On-demand sweeps for the worker endpoint.
    pub sweeper: Arc<QueueSweeper>,
    /// Prometheus renderer; `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create the state around a manager, deriving the publisher and sweeper
    /// with default settings.
    #[must_use]
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self {
            stats: StatsPublisher::from_controller(manager.controller()),
            sweeper: Arc::new(QueueSweeper::new(manager.clone())),
            manager,
            metrics: None,
        }
    }

    /// Replace the stats publisher.
    #[must_use]
    pub fn with_stats(mut self, stats: StatsPublisher) -> Self {
        self.stats = stats;
        self
    }

    /// Replace the sweeper.
    #[must_use]
    pub fn with_sweeper(mut self, sweeper: Arc<QueueSweeper>) -> Self {
        self.sweeper = sweeper;
        self
    }

    /// Serve metrics from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
