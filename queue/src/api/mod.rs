//! HTTP API handlers.
//!
//! Request bodies carry raw optional strings; they are turned into typed ids
//! here, at the boundary, so a missing or malformed id is a 400 before any
//! store is touched.

pub mod config;
pub mod queue;
pub mod stream;
pub mod worker;

use purchase_queue_core::{EventId, UserId};
use purchase_queue_web::AppError;

fn require(value: Option<String>, field: &str) -> Result<String, AppError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::bad_request(format!("{field} is required"))),
    }
}

/// Parse a required `eventId`.
pub(crate) fn event_id(value: Option<String>) -> Result<EventId, AppError> {
    Ok(EventId::parse(require(value, "eventId")?)?)
}

/// Parse a required `userId`.
pub(crate) fn user_id(value: Option<String>) -> Result<UserId, AppError> {
    Ok(UserId::parse(require(value, "userId")?)?)
}

/// Parse an optional `userId`; blank counts as absent.
pub(crate) fn optional_user_id(value: Option<String>) -> Result<Option<UserId>, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| UserId::parse(v).map_err(AppError::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_missing_ids_are_bad_requests() {
        let Err(err) = event_id(None) else {
            unreachable!("missing id never parses");
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "[BAD_REQUEST] eventId is required");

        let Err(err) = user_id(Some("  ".into())) else {
            unreachable!("blank id never parses");
        };
        assert_eq!(err.to_string(), "[BAD_REQUEST] userId is required");
    }

    #[test]
    fn test_malformed_id_is_bad_request() {
        let Err(err) = event_id(Some("concert {1}".into())) else {
            unreachable!("braces are rejected");
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_optional_user() {
        assert!(matches!(optional_user_id(None), Ok(None)));
        assert!(matches!(optional_user_id(Some(String::new())), Ok(None)));
        assert!(matches!(optional_user_id(Some("u1".into())), Ok(Some(_))));
    }
}
