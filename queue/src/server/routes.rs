//! Router configuration for the purchase queue.

use super::health::{health_check, metrics, readiness_check};
use super::state::AppState;
use crate::api::{config, queue, stream, worker};
use axum::{
    Router,
    routing::{get, post, put},
};
use purchase_queue_web::correlation_id_layer;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`, `/ready`, `/metrics`
/// - `/api/queue/*` queue, stream, worker and config endpoints
///
/// Every request gets a correlation id span and a `tower-http` trace.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/queue/join", post(queue::join_queue))
        .route("/queue/leave", post(queue::leave_queue))
        .route("/queue/complete", post(queue::complete_purchase))
        .route("/queue/process", post(queue::process_queue))
        .route("/queue/status", get(queue::queue_status))
        .route("/queue/stream", get(stream::queue_stream))
        .route("/queue/worker", post(worker::run_worker).get(worker::run_worker))
        .route(
            "/queue/config/:event_id",
            put(config::put_config)
                .get(config::get_config)
                .delete(config::delete_config),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
