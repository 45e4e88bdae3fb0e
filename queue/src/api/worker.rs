//! On-demand sweep.
//!
//! - POST /api/queue/worker - Sweep every configured, enabled event now
//!
//! The same sweep also runs in the background on a fixed interval; this
//! endpoint lets an external scheduler trigger one immediately.

use crate::server::state::AppState;
use crate::sweeper::SweepReport;
use axum::{Json, extract::State};
use purchase_queue_web::AppError;
use std::time::Instant;

/// Run one sweep and return its report.
///
/// # Errors
///
/// 503 when the configured events cannot be listed.
pub async fn run_worker(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let started = Instant::now();
    let report = state.sweeper.sweep_once().await?;
    tracing::info!(
        queues = report.processed_queues,
        promoted = report.total_processed,
        expired = report.total_expired,
        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Worker sweep finished"
    );
    Ok(Json(report))
}
