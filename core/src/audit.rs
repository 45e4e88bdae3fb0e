//! Durable audit trail of buyer status transitions.
//!
//! The audit store is the reporting side of the queue. It is written after
//! the fast store has already decided, so a failure here never changes an
//! admission outcome; implementations report it as
//! [`QueueError::DurableWriteFailed`](crate::QueueError::DurableWriteFailed).

use crate::{DateTime, EntryStatus, EventId, UserId, Utc, store::StoreFuture};
use serde::{Deserialize, Serialize};

/// One status change to record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTransition {
    /// Event the entry belongs to.
    pub event_id: EventId,
    /// Buyer the entry belongs to.
    pub user_id: UserId,
    /// New status.
    pub status: EntryStatus,
    /// Wait-line rank at the time of the transition, when known.
    pub position: Option<u64>,
    /// When the transition was decided.
    pub at: DateTime<Utc>,
}

/// A row of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Event the entry belongs to.
    pub event_id: EventId,
    /// Buyer the entry belongs to.
    pub user_id: UserId,
    /// Latest status.
    pub status: EntryStatus,
    /// Last known wait-line rank.
    pub position: Option<u64>,
    /// When the buyer joined.
    pub joined_at: DateTime<Utc>,
    /// When the buyer got a slot.
    pub admitted_at: Option<DateTime<Utc>>,
    /// When the entry reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Open a new entry from its first transition.
    #[must_use]
    pub fn open(transition: &AuditTransition) -> Self {
        let mut entry = Self {
            event_id: transition.event_id.clone(),
            user_id: transition.user_id.clone(),
            status: transition.status,
            position: transition.position,
            joined_at: transition.at,
            admitted_at: None,
            finished_at: None,
        };
        entry.stamp(transition);
        entry
    }

    /// Time of the latest transition applied to this entry.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.finished_at.or(self.admitted_at).unwrap_or(self.joined_at)
    }

    /// Whether the entry still represents a queued buyer.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Apply a later transition to this entry.
    pub fn apply(&mut self, transition: &AuditTransition) {
        self.status = transition.status;
        if transition.position.is_some() {
            self.position = transition.position;
        }
        self.stamp(transition);
    }

    fn stamp(&mut self, transition: &AuditTransition) {
        match transition.status {
            EntryStatus::Waiting => {}
            EntryStatus::Active => self.admitted_at = Some(transition.at),
            EntryStatus::Completed | EntryStatus::Abandoned | EntryStatus::Expired => {
                self.finished_at = Some(transition.at);
            }
        }
    }
}

/// Durable store for the audit trail.
///
/// At most one open (`waiting` or `active`) entry exists per
/// `(event_id, user_id)`:
///
/// - `Waiting` opens an entry unless one is already open
/// - `Active` updates the open entry or opens a new one
/// - terminal statuses close the open entry; with none open they record a
///   closed entry of their own
///
/// Concurrent requests may persist their transitions out of order, so
/// transitions are applied by their `at` time:
///
/// - an update older than the open entry's latest transition is dropped
/// - an opening older than a closed entry's `finished_at` is dropped
/// - a terminal status is dropped when the buyer already has an entry
///   finished at or after it
pub trait AuditStore: Send + Sync {
    /// Record one transition.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::DurableWriteFailed`] if the write fails.
    fn record<'a>(&'a self, transition: &'a AuditTransition) -> StoreFuture<'a, ()>;

    /// All entries of an event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::QueueError::DurableWriteFailed`] if the read fails.
    fn entries<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, Vec<AuditEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn transition(status: EntryStatus, secs: i64) -> AuditTransition {
        AuditTransition {
            event_id: EventId::new("e1"),
            user_id: UserId::new("u1"),
            status,
            position: None,
            at: Utc.timestamp_opt(1_735_689_600 + secs, 0).single().unwrap_or_default(),
        }
    }

    #[test]
    fn test_entry_lifecycle_stamps() {
        let mut waiting = transition(EntryStatus::Waiting, 0);
        waiting.position = Some(3);
        let mut entry = AuditEntry::open(&waiting);
        assert!(entry.is_open());
        assert_eq!(entry.position, Some(3));
        assert_eq!(entry.admitted_at, None);

        let active = transition(EntryStatus::Active, 10);
        entry.apply(&active);
        assert_eq!(entry.admitted_at, Some(active.at));
        assert_eq!(entry.position, Some(3));

        let done = transition(EntryStatus::Completed, 20);
        entry.apply(&done);
        assert!(!entry.is_open());
        assert_eq!(entry.finished_at, Some(done.at));
        assert_eq!(entry.joined_at, waiting.at);
        assert_eq!(entry.updated_at(), done.at);
    }

    #[test]
    fn test_terminal_first_transition_is_closed() {
        let left = transition(EntryStatus::Abandoned, 5);
        let entry = AuditEntry::open(&left);
        assert!(!entry.is_open());
        assert_eq!(entry.joined_at, left.at);
        assert_eq!(entry.finished_at, Some(left.at));
    }
}
