//! Axum integration for the purchase queue.
//!
//! This crate holds the HTTP plumbing that is independent of queue routes:
//!
//! - [`AppError`]: maps [`purchase_queue_core::QueueError`] onto status codes
//!   and a `{code, message}` JSON body
//! - [`ApiJson`] / [`ApiQuery`]: extractors that reject with [`AppError`]
//! - [`middleware::correlation_id_layer`]: correlation ids, request spans,
//!   latency metrics
//! - [`handlers::health`]: liveness and fast-store readiness
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract** the body or query; malformed input is rejected as [`AppError`]
//! 3. **Validate** raw JSON fields into typed ids (400 on failure)
//! 4. **Delegate** to the queue manager
//! 5. **Map** the result or error to an HTTP response
//!
//! # Example
//!
//! ```ignore
//! use purchase_queue_web::{AppError, correlation_id_layer};
//! use axum::{Router, routing::get, Json};
//!
//! async fn status(State(state): State<AppState>) -> Result<Json<QueueStatus>, AppError> {
//!     Ok(Json(state.manager.get_queue_status(&event_id, None).await?))
//! }
//!
//! let app = Router::new()
//!     .route("/api/queue/status", get(status))
//!     .layer(correlation_id_layer())
//!     .with_state(app_state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extract::{ApiJson, ApiQuery};
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
