//! Queue endpoints.
//!
//! - POST /api/queue/join - Join an event's queue
//! - POST /api/queue/leave - Leave it
//! - POST /api/queue/complete - Finish checkout and free the slot
//! - POST /api/queue/process - Reclaim and promote on demand
//! - GET /api/queue/status - Read-only status

use super::{event_id, optional_user_id, user_id};
use crate::server::state::AppState;
use axum::{Json, extract::State};
use purchase_queue_core::{ProcessOutcome, QueuePosition, QueueStatus};
use purchase_queue_web::{ApiJson, ApiQuery, AppError};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of join and leave.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequest {
    /// Event to queue for.
    pub event_id: Option<String>,
    /// Buyer.
    pub user_id: Option<String>,
}

/// Response to join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    /// 1-based rank, 0 when admitted.
    pub position: u64,
    /// Whether the buyer may check out now.
    pub can_enter: bool,
    /// Human-readable placement.
    pub message: String,
    /// Rough wait estimate.
    pub estimated_wait_seconds: u64,
}

impl From<QueuePosition> for JoinResponse {
    fn from(position: QueuePosition) -> Self {
        let message = if position.can_enter {
            "You can now proceed to checkout".to_string()
        } else {
            format!("You are in position {} in the queue", position.position)
        };
        Self {
            position: position.position,
            can_enter: position.can_enter,
            message,
            estimated_wait_seconds: position.estimated_wait_seconds,
        }
    }
}

/// Body of complete.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// Event.
    pub event_id: Option<String>,
    /// Buyer.
    pub user_id: Option<String>,
    /// Whether checkout succeeded; defaults to true.
    pub success: Option<bool>,
}

/// Body of process.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    /// Event.
    pub event_id: Option<String>,
    /// Slot ceiling; the event's configured limit when omitted.
    pub max_concurrent: Option<u32>,
}

/// Query of status.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    /// Event.
    pub event_id: Option<String>,
    /// Buyer to personalise for.
    pub user_id: Option<String>,
}

/// `{"success": ...}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Outcome flag.
    pub success: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Join the queue.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/queue/join \
///   -H 'content-type: application/json' \
///   -d '{"eventId":"concert-42","userId":"u1"}'
/// ```
///
/// Response:
/// ```json
/// {"position":3,"canEnter":false,"message":"You are in position 3 in the queue","estimatedWaitSeconds":360}
/// ```
///
/// # Errors
///
/// 400 for missing ids, 503 when the fast store is down.
pub async fn join_queue(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<QueueRequest>,
) -> Result<Json<JoinResponse>, AppError> {
    let event_id = event_id(request.event_id)?;
    let user_id = user_id(request.user_id)?;
    let position = state.manager.join_queue(&event_id, &user_id).await?.into_value();
    Ok(Json(JoinResponse::from(position)))
}

/// Leave the queue; always `{"success": true}` once the store answered.
///
/// # Errors
///
/// 400 for missing ids, 503 when the fast store is down.
pub async fn leave_queue(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<QueueRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let event_id = event_id(request.event_id)?;
    let user_id = user_id(request.user_id)?;
    state.manager.leave_queue(&event_id, &user_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Finish checkout. `success` in the response says whether a slot was held.
///
/// # Errors
///
/// 400 for missing ids, 503 when the fast store is down.
pub async fn complete_purchase(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CompleteRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let event_id = event_id(request.event_id)?;
    let user_id = user_id(request.user_id)?;
    let held = state
        .manager
        .complete_purchase(&event_id, &user_id, request.success.unwrap_or(true))
        .await?
        .into_value();
    Ok(Json(SuccessResponse { success: held }))
}

/// Reclaim expired slots and promote waiters for one event.
///
/// # Errors
///
/// 400 for a missing id or a zero ceiling, 404 when no ceiling is given and
/// the event has no config, 503 when the fast store is down.
pub async fn process_queue(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ProcessRequest>,
) -> Result<Json<ProcessOutcome>, AppError> {
    let event_id = event_id(request.event_id)?;
    let max_concurrent = match request.max_concurrent {
        Some(max) => max,
        None => state
            .manager
            .load_config(&event_id)
            .await?
            .map(|config| config.max_concurrent_buyers)
            .ok_or_else(|| AppError::not_found("Queue config", &event_id))?,
    };
    let outcome = state
        .manager
        .process_queue(&event_id, max_concurrent)
        .await?
        .into_value();
    Ok(Json(outcome))
}

/// Read-only status, personalised when `userId` is given.
///
/// ```bash
/// curl 'http://localhost:8080/api/queue/status?eventId=concert-42&userId=u1'
/// ```
///
/// # Errors
///
/// 400 for a missing event id, 503 when the fast store is down.
pub async fn queue_status(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<StatusQuery>,
) -> Result<Json<QueueStatus>, AppError> {
    let event_id = event_id(query.event_id)?;
    let user_id = optional_user_id(query.user_id)?;
    let status = state
        .manager
        .get_queue_status(&event_id, user_id.as_ref())
        .await?;
    Ok(Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_messages() {
        let admitted = JoinResponse::from(QueuePosition::admitted());
        assert_eq!(admitted.message, "You can now proceed to checkout");

        let waiting = JoinResponse::from(QueuePosition::waiting(3, 120));
        assert_eq!(waiting.message, "You are in position 3 in the queue");
        assert_eq!(waiting.estimated_wait_seconds, 360);
    }
}
