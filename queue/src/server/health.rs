//! Health, readiness and metrics endpoints.

use super::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use purchase_queue_web::handlers::health::Readiness;

pub use purchase_queue_web::handlers::health_check;

/// Readiness: 200 while the fast store answers, 503 otherwise.
///
/// ```bash
/// curl http://localhost:8080/ready
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    purchase_queue_web::handlers::readiness_check(state.manager.controller().store().as_ref()).await
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
