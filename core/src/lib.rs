//! # Purchase Queue Core
//!
//! Domain types and abstractions for the purchase queue: the admission-control
//! gate that decides which buyers may enter checkout for an event.
//!
//! ## Core Concepts
//!
//! - **Slot**: permission for one buyer to proceed to checkout, bounded by
//!   `max_concurrent_buyers`
//! - **Wait line**: FIFO ordering of buyers not yet admitted, ordered by a
//!   per-event join sequence (never by wall clock)
//! - **Reservation window**: how long an admitted buyer's slot stays valid
//! - **Promotion**: moving a buyer from the wait line into a free slot
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │  AdmissionStore      │     │  AuditStore          │
//! │  (fast, atomic,      │     │  (durable, reporting)│
//! │   authoritative)     │     │                      │
//! └──────────┬───────────┘     └──────────┬───────────┘
//!            │ implemented by              │ implemented by
//!            ▼                             ▼
//!   Redis (Lua scripts)            PostgreSQL
//!   InMemory (EventLine)           InMemory
//! ```
//!
//! [`line::EventLine`] is the reference state machine: the in-memory store
//! runs it under a mutex and the Redis scripts mirror it step for step.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod error;
pub mod line;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{QueueError, Result};
pub use types::{
    EntryStatus, EventId, ParseIdError, ProcessOutcome, QueueConfig, QueuePosition, QueueSnapshot,
    QueueStatus, UserId,
};

/// Environment module - injected dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability.
    ///
    /// Reservation expiry and queue timeout are evaluated against this clock,
    /// so tests can move time forward without sleeping.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
