//! Error types for queue operations.

use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Error taxonomy for the admission path and the reporting path.
///
/// A missing queue configuration and a completion for a buyer without a slot
/// are not errors: they surface as `None` and `false` respectively.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Missing or malformed input, rejected before touching any store.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The fast store could not be reached or rejected the operation.
    ///
    /// Fatal for admission decisions: there is no safe fallback ordering, so
    /// callers must fail closed and retry with backoff.
    #[error("Fast store unavailable: {0}")]
    StoreUnavailable(String),

    /// The fast store returned data that could not be interpreted.
    #[error("Corrupt queue state: {0}")]
    CorruptState(String),

    /// The durable audit write failed after the admission decision was made.
    #[error("Durable write failed: {0}")]
    DurableWriteFailed(String),
}

impl QueueError {
    /// Whether the caller made a mistake (as opposed to an infrastructure failure).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::DurableWriteFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueueError::StoreUnavailable("connection refused".into());
        assert_eq!(err.to_string(), "Fast store unavailable: connection refused");
    }

    #[test]
    fn test_classification() {
        assert!(QueueError::InvalidArgument("eventId".into()).is_client_error());
        assert!(!QueueError::InvalidArgument("eventId".into()).is_retryable());
        assert!(QueueError::StoreUnavailable("down".into()).is_retryable());
        assert!(!QueueError::CorruptState("score".into()).is_retryable());
    }
}
