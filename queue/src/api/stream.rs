//! Server-sent stats stream.
//!
//! `GET /api/queue/stream?eventId=...` answers `text/event-stream` with one
//! `data: {"queueLength":..,"activeBuyers":..}` frame per tick. The ticker
//! lives as long as the response body: when the client disconnects axum
//! drops the stream, which drops the subscription and stops the task.

use super::event_id;
use crate::server::state::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use purchase_queue_web::{ApiQuery, AppError};
use serde::Deserialize;

/// Query of the stream endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    /// Event to watch.
    pub event_id: Option<String>,
}

/// Stream queue stats.
///
/// ```bash
/// curl -N 'http://localhost:8080/api/queue/stream?eventId=concert-42'
/// ```
///
/// # Errors
///
/// 400 for a missing event id.
pub async fn queue_stream(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let event_id = event_id(query.event_id)?;
    tracing::info!(event_id = %event_id, "Opening stats stream");

    let events = state
        .stats
        .subscribe(event_id)
        .map(|snapshot| Event::default().json_data(snapshot));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
