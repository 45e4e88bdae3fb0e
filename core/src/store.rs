//! Fast-store abstraction for admission decisions.
//!
//! The [`AdmissionStore`] is the single source of truth for wait-line order
//! and slot occupancy. Every mutating method is one atomic step in the
//! backing store: housekeeping (reclaiming lapsed slots, dropping timed-out
//! waiters), the operation itself and the FIFO promotion pass either all
//! happen or none do. Callers never read-modify-write queue state.
//!
//! # Design
//!
//! Like the other repository traits in this workspace, methods return
//! explicit `Pin<Box<dyn Future>>` so the traits stay dyn-compatible and can
//! be injected as `Arc<dyn AdmissionStore>`.

use crate::{
    DateTime, EventId, QueueConfig, Result, UserId, Utc,
    types::{DEFAULT_RESERVATION_SECONDS, MAX_WINDOW_SECONDS, QueueSnapshot},
};
use chrono::TimeDelta;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// The limits an atomic store operation enforces, resolved from a [`QueueConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Slot ceiling; `None` admits everyone.
    pub limit: Option<u32>,
    /// Reservation window granted on admission.
    pub reservation: TimeDelta,
    /// Maximum wait before a waiter is dropped; `None` waits forever.
    pub queue_timeout: Option<TimeDelta>,
}

impl AdmissionPolicy {
    /// Unlimited capacity with the default reservation window.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            limit: None,
            reservation: seconds(DEFAULT_RESERVATION_SECONDS),
            queue_timeout: None,
        }
    }

    /// Resolve the policy for an event.
    ///
    /// A missing config means unlimited capacity. A disabled queue admits
    /// everyone but keeps the configured reservation window.
    #[must_use]
    pub fn from_config(config: Option<&QueueConfig>) -> Self {
        let Some(config) = config else {
            return Self::unlimited();
        };
        let reservation = seconds(config.reservation_time_seconds);
        if !config.queue_enabled {
            return Self {
                limit: None,
                reservation,
                queue_timeout: None,
            };
        }
        Self {
            limit: Some(config.max_concurrent_buyers),
            reservation,
            queue_timeout: (config.queue_timeout_seconds > 0)
                .then(|| seconds(config.queue_timeout_seconds)),
        }
    }

    /// Cap the slot ceiling at `ceiling` (never raises a configured limit).
    #[must_use]
    pub fn with_ceiling(mut self, ceiling: u32) -> Self {
        self.limit = Some(self.limit.map_or(ceiling, |limit| limit.min(ceiling)));
        self
    }

    /// Whether `active` occupied slots leave room for one more.
    #[must_use]
    pub fn has_capacity(&self, active: usize) -> bool {
        self.limit
            .is_none_or(|limit| active < usize::try_from(limit).unwrap_or(usize::MAX))
    }

    /// When a slot granted at `now` lapses.
    #[must_use]
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.reservation)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Waiters who joined at or before this instant have timed out.
    #[must_use]
    pub fn timeout_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.queue_timeout.map(|timeout| {
            now.checked_sub_signed(timeout)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }
}

/// Windows are capped at [`MAX_WINDOW_SECONDS`] so a config stored before
/// validation tightened still yields a usable policy.
fn seconds(secs: u64) -> TimeDelta {
    let capped = i64::try_from(secs.min(MAX_WINDOW_SECONDS)).unwrap_or(i64::MAX);
    TimeDelta::try_seconds(capped).unwrap_or(TimeDelta::MAX)
}

/// Side effects of the housekeeping and promotion steps of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Housekeeping {
    /// Slots reclaimed because their reservation lapsed.
    pub expired: Vec<UserId>,
    /// Waiters dropped after the queue timeout.
    pub timed_out: Vec<UserId>,
    /// Waiters promoted into a slot, in FIFO order.
    pub promoted: Vec<UserId>,
}

impl Housekeeping {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.timed_out.is_empty() && self.promoted.is_empty()
    }
}

/// Where a joining buyer ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Holds a slot.
    Admitted {
        /// When the reservation lapses.
        expires_at: DateTime<Utc>,
        /// True when this call granted the slot.
        newly: bool,
    },
    /// In the wait line.
    Waiting {
        /// 1-based rank.
        position: u64,
        /// True when this call appended the buyer.
        newly: bool,
    },
}

/// Result of [`AdmissionStore::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Placement of the joining buyer.
    pub placement: Placement,
    /// Side effects on other buyers.
    pub housekeeping: Housekeeping,
}

/// What a leave removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// An active slot.
    Active,
    /// A wait-line entry.
    Waiting,
    /// Nothing; the buyer was not queued.
    Absent,
}

/// Result of [`AdmissionStore::leave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// What was removed.
    pub released: Released,
    /// Side effects on other buyers.
    pub housekeeping: Housekeeping,
}

/// Result of [`AdmissionStore::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteOutcome {
    /// Whether the buyer held an unexpired slot.
    pub held: bool,
    /// Side effects on other buyers.
    pub housekeeping: Housekeeping,
}

/// A buyer's standing in a read-only status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStanding {
    /// Holds an unexpired slot.
    Active {
        /// When the reservation lapses.
        expires_at: DateTime<Utc>,
    },
    /// In the wait line at this 1-based rank.
    Waiting {
        /// 1-based rank.
        position: u64,
    },
    /// Neither waiting nor holding a live slot.
    Absent,
}

/// Read-only counts for an event, plus the standing of one buyer if asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusView {
    /// Entries in the wait line.
    pub queue_length: u64,
    /// Unexpired slots.
    pub active_buyers: u64,
    /// Standing of the requested buyer.
    pub user: Option<UserStanding>,
}

impl StatusView {
    /// Counts without the personal part.
    #[must_use]
    pub const fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queue_length: self.queue_length,
            active_buyers: self.active_buyers,
        }
    }
}

/// Atomic admission operations over the fast store.
///
/// `now` is passed in rather than read inside the store so every replica
/// evaluates expiry against the caller's injected clock.
pub trait AdmissionStore: Send + Sync {
    /// Admit the buyer if capacity allows, otherwise append them to the wait
    /// line. Idempotent for buyers already waiting or active; an active
    /// buyer's reservation is not extended.
    ///
    /// Waiters are promoted into free capacity before a newcomer is
    /// considered, so a newcomer never overtakes the line.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::StoreUnavailable`] if the store cannot be
    /// reached, [`crate::QueueError::CorruptState`] on unreadable replies.
    fn join<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, JoinOutcome>;

    /// Remove the buyer from the slot set or the wait line, then promote.
    /// A buyer who is not queued is a no-op.
    ///
    /// # Errors
    ///
    /// Same as [`AdmissionStore::join`].
    fn leave<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, ReleaseOutcome>;

    /// Release the buyer's slot after checkout, then promote.
    ///
    /// # Errors
    ///
    /// Same as [`AdmissionStore::join`].
    fn complete<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, CompleteOutcome>;

    /// Reclaim lapsed slots, drop timed-out waiters, promote up to the limit.
    ///
    /// # Errors
    ///
    /// Same as [`AdmissionStore::join`].
    fn process<'a>(
        &'a self,
        event_id: &'a EventId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Housekeeping>;

    /// Read counts and optionally one buyer's standing. Never mutates.
    ///
    /// # Errors
    ///
    /// Same as [`AdmissionStore::join`].
    fn status<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: Option<&'a UserId>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, StatusView>;

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::StoreUnavailable`] if it is not.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Storage for per-event [`QueueConfig`]s.
pub trait ConfigRepository: Send + Sync {
    /// Load an event's config, `None` if the event has none.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::StoreUnavailable`] or
    /// [`crate::QueueError::CorruptState`].
    fn load_config<'a>(&'a self, event_id: &'a EventId)
    -> StoreFuture<'a, Option<QueueConfig>>;

    /// Create or replace an event's config. Callers validate first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::StoreUnavailable`].
    fn save_config<'a>(&'a self, config: &'a QueueConfig) -> StoreFuture<'a, ()>;

    /// Delete an event's config; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::StoreUnavailable`].
    fn delete_config<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, bool>;

    /// All events that have a config, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::StoreUnavailable`] or
    /// [`crate::QueueError::CorruptState`].
    fn configured_events(&self) -> StoreFuture<'_, Vec<EventId>>;
}
