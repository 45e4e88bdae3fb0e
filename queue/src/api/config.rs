//! Queue configuration endpoints.
//!
//! - PUT /api/queue/config/:eventId - Create or replace
//! - GET /api/queue/config/:eventId - Read
//! - DELETE /api/queue/config/:eventId - Remove (the event becomes ungated)

use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use purchase_queue_core::{
    EventId, QueueConfig,
    types::{DEFAULT_QUEUE_TIMEOUT_SECONDS, DEFAULT_RESERVATION_SECONDS},
};
use purchase_queue_web::{ApiJson, AppError};
use serde::Deserialize;

/// Body of PUT. The event id comes from the path.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRequest {
    /// Slot ceiling, at least 1.
    pub max_concurrent_buyers: Option<u32>,
    /// Reservation window.
    pub reservation_time_seconds: Option<u64>,
    /// Wait limit, 0 for none.
    pub queue_timeout_seconds: Option<u64>,
    /// Whether admission control is on.
    pub queue_enabled: Option<bool>,
}

impl ConfigRequest {
    fn into_config(self, event_id: EventId) -> Result<QueueConfig, AppError> {
        let max = self
            .max_concurrent_buyers
            .ok_or_else(|| AppError::bad_request("maxConcurrentBuyers is required"))?;
        Ok(QueueConfig::new(event_id, max)
            .with_reservation_seconds(
                self.reservation_time_seconds
                    .unwrap_or(DEFAULT_RESERVATION_SECONDS),
            )
            .with_queue_timeout_seconds(
                self.queue_timeout_seconds
                    .unwrap_or(DEFAULT_QUEUE_TIMEOUT_SECONDS),
            )
            .with_enabled(self.queue_enabled.unwrap_or(true)))
    }
}

/// Create or replace an event's config.
///
/// ```bash
/// curl -X PUT http://localhost:8080/api/queue/config/concert-42 \
///   -H 'content-type: application/json' \
///   -d '{"maxConcurrentBuyers":50,"reservationTimeSeconds":300}'
/// ```
///
/// # Errors
///
/// 400 for an invalid config, 503 when the store is down.
pub async fn put_config(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    ApiJson(request): ApiJson<ConfigRequest>,
) -> Result<Json<QueueConfig>, AppError> {
    let event_id = EventId::parse(event_id)?;
    let config = request.into_config(event_id)?;
    state.manager.save_config(&config).await?;
    Ok(Json(config))
}

/// Read an event's config.
///
/// # Errors
///
/// 404 when the event has no config.
pub async fn get_config(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<QueueConfig>, AppError> {
    let event_id = EventId::parse(event_id)?;
    state
        .manager
        .load_config(&event_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Queue config", &event_id))
}

/// Delete an event's config.
///
/// # Errors
///
/// 404 when the event had no config.
pub async fn delete_config(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let event_id = EventId::parse(event_id)?;
    if state.manager.delete_config(&event_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Queue config", &event_id))
    }
}
