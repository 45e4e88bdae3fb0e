//! Identifiers, statuses and value types exchanged by the queue components.
//!
//! Identifiers are embedded in fast-store keys (`queue:{eventId}:...`), so
//! parsing rejects anything that would break the key layout: empty strings,
//! whitespace, control characters and the hash-tag braces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum identifier length in bytes.
pub const MAX_ID_LEN: usize = 128;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: {reason}")]
pub struct ParseIdError {
    kind: &'static str,
    reason: &'static str,
}

impl ParseIdError {
    /// Which identifier failed to parse (`eventId` or `userId`).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }
}

fn validate_id(kind: &'static str, s: &str) -> Result<(), ParseIdError> {
    let reason = if s.is_empty() {
        "cannot be empty"
    } else if s.len() > MAX_ID_LEN {
        "exceeds 128 bytes"
    } else if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "contains whitespace or control characters"
    } else if s.contains(['{', '}']) {
        "contains braces"
    } else {
        return Ok(());
    };
    Err(ParseIdError { kind, reason })
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Wrap a string without validation (trusted, application-controlled input).
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Validate and wrap untrusted input.
            ///
            /// # Errors
            ///
            /// Returns [`ParseIdError`] if the input is empty, too long, or
            /// contains whitespace, control characters or braces.
            pub fn parse(s: impl Into<String>) -> Result<Self, ParseIdError> {
                let s = s.into();
                validate_id($kind, &s)?;
                Ok(Self(s))
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert into the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of the event whose tickets are being sold.
    EventId,
    "eventId"
);

string_id!(
    /// Identifier of a buyer.
    UserId,
    "userId"
);

/// Lifecycle status of a buyer's queue entry.
///
/// `Waiting` and `Active` are open; the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// In the wait line.
    Waiting,
    /// Holding a checkout slot.
    Active,
    /// Checkout finished successfully.
    Completed,
    /// Left the line or cancelled checkout.
    Abandoned,
    /// Reservation lapsed or waited past the queue timeout.
    Expired,
}

impl EntryStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::Expired => "expired",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether no further transition can follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned | Self::Expired)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default reservation window for an admitted buyer.
pub const DEFAULT_RESERVATION_SECONDS: u64 = 300;

/// Default maximum time a buyer may stay in the wait line.
pub const DEFAULT_QUEUE_TIMEOUT_SECONDS: u64 = 3600;

/// Upper bound for the reservation window and the queue timeout (7 days).
pub const MAX_WINDOW_SECONDS: u64 = 7 * 24 * 60 * 60;

const fn default_reservation_seconds() -> u64 {
    DEFAULT_RESERVATION_SECONDS
}

const fn default_queue_timeout_seconds() -> u64 {
    DEFAULT_QUEUE_TIMEOUT_SECONDS
}

const fn default_enabled() -> bool {
    true
}

/// Per-event admission configuration.
///
/// Written by the configuration endpoint, read-only for the admission
/// controller. An event without a config has unlimited capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Event this config applies to.
    pub event_id: EventId,
    /// Concurrency ceiling for checkout slots.
    pub max_concurrent_buyers: u32,
    /// How long an admitted buyer keeps their slot.
    #[serde(default = "default_reservation_seconds")]
    pub reservation_time_seconds: u64,
    /// How long a buyer may wait before being dropped (0 disables the timeout).
    #[serde(default = "default_queue_timeout_seconds")]
    pub queue_timeout_seconds: u64,
    /// When false every buyer is admitted immediately.
    #[serde(default = "default_enabled")]
    pub queue_enabled: bool,
}

impl QueueConfig {
    /// Enabled config with default windows.
    #[must_use]
    pub const fn new(event_id: EventId, max_concurrent_buyers: u32) -> Self {
        Self {
            event_id,
            max_concurrent_buyers,
            reservation_time_seconds: DEFAULT_RESERVATION_SECONDS,
            queue_timeout_seconds: DEFAULT_QUEUE_TIMEOUT_SECONDS,
            queue_enabled: true,
        }
    }

    /// Set the reservation window.
    #[must_use]
    pub const fn with_reservation_seconds(mut self, seconds: u64) -> Self {
        self.reservation_time_seconds = seconds;
        self
    }

    /// Set the queue timeout (0 disables it).
    #[must_use]
    pub const fn with_queue_timeout_seconds(mut self, seconds: u64) -> Self {
        self.queue_timeout_seconds = seconds;
        self
    }

    /// Enable or disable admission control.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.queue_enabled = enabled;
        self
    }

    /// Check the config before it is stored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::InvalidArgument`] when
    /// `max_concurrent_buyers` or `reservation_time_seconds` is zero, or when
    /// either window exceeds [`MAX_WINDOW_SECONDS`].
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_concurrent_buyers == 0 {
            return Err(crate::QueueError::InvalidArgument(
                "maxConcurrentBuyers must be at least 1".to_string(),
            ));
        }
        if self.reservation_time_seconds == 0 {
            return Err(crate::QueueError::InvalidArgument(
                "reservationTimeSeconds must be at least 1".to_string(),
            ));
        }
        if self.reservation_time_seconds > MAX_WINDOW_SECONDS {
            return Err(crate::QueueError::InvalidArgument(format!(
                "reservationTimeSeconds must be at most {MAX_WINDOW_SECONDS}"
            )));
        }
        if self.queue_timeout_seconds > MAX_WINDOW_SECONDS {
            return Err(crate::QueueError::InvalidArgument(format!(
                "queueTimeoutSeconds must be at most {MAX_WINDOW_SECONDS}"
            )));
        }
        Ok(())
    }
}

/// Result of joining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePosition {
    /// 1-based rank in the wait line, 0 when admitted.
    pub position: u64,
    /// Whether the buyer may proceed to checkout now.
    pub can_enter: bool,
    /// Rough wait estimate derived from the position.
    pub estimated_wait_seconds: u64,
}

impl QueuePosition {
    /// Position of an admitted buyer.
    #[must_use]
    pub const fn admitted() -> Self {
        Self {
            position: 0,
            can_enter: true,
            estimated_wait_seconds: 0,
        }
    }

    /// Position of a waiting buyer.
    #[must_use]
    pub const fn waiting(position: u64, avg_seconds_per_buyer: u64) -> Self {
        Self {
            position,
            can_enter: false,
            estimated_wait_seconds: position.saturating_mul(avg_seconds_per_buyer),
        }
    }
}

/// Read-only view of an event's queue, optionally personalised for one buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Buyers in the wait line.
    pub queue_length: u64,
    /// Buyers holding an unexpired slot.
    pub active_buyers: u64,
    /// Whether the given buyer may check out.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub can_enter: Option<bool>,
    /// The given buyer's rank (0 when not waiting).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub position: Option<u64>,
    /// Wait estimate for the given buyer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub estimated_wait_seconds: Option<u64>,
}

/// Counts pushed to stream subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Buyers in the wait line.
    pub queue_length: u64,
    /// Buyers holding an unexpired slot.
    pub active_buyers: u64,
}

/// Result of a process-queue pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    /// Number of buyers promoted.
    pub processed: usize,
    /// Buyers promoted into a slot, in FIFO order.
    pub new_active_users: Vec<UserId>,
    /// Buyers whose reservation lapsed.
    pub expired_users: Vec<UserId>,
    /// Buyers dropped from the wait line after the queue timeout.
    pub timed_out_users: Vec<UserId>,
}
