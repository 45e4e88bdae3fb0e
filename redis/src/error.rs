//! Mapping of `Redis` errors onto the queue error taxonomy.

use purchase_queue_core::QueueError;
use redis::{ErrorKind, RedisError};

/// Build a `map_err` adapter that tags the error with what was attempted.
///
/// Replies of the wrong shape are `CorruptState`; everything else means the
/// store could not serve the request.
pub(crate) fn store_error(context: &'static str) -> impl Fn(RedisError) -> QueueError {
    move |e| {
        if e.kind() == ErrorKind::TypeError {
            tracing::error!(error = %e, context, "Unexpected Redis reply");
            QueueError::CorruptState(format!("Failed to {context}: {e}"))
        } else {
            tracing::warn!(error = %e, context, "Redis request failed");
            QueueError::StoreUnavailable(format!("Failed to {context}: {e}"))
        }
    }
}
