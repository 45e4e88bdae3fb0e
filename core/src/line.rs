//! Pure per-event queue state machine.
//!
//! [`EventLine`] holds one event's wait line and slot set and implements the
//! same steps the fast-store scripts run atomically:
//!
//! 1. **Reclaim**: slots with `expires_at <= now` are removed (expired).
//! 2. **Timeout**: waiters who joined at or before `now - queue_timeout` are
//!    dropped.
//! 3. The operation's own mutation.
//! 4. **Promote**: waiters move into free slots in join-sequence order.
//!
//! `join` promotes before it decides about the joining buyer, so a newcomer
//! only takes a free slot when nobody is waiting.
//!
//! No I/O, no clock: callers pass `now`. The in-memory store wraps this type
//! in a mutex, which gives each operation the same atomicity as a script.

use crate::{
    DateTime, UserId, Utc,
    store::{
        AdmissionPolicy, CompleteOutcome, Housekeeping, JoinOutcome, Placement, ReleaseOutcome,
        Released, StatusView, UserStanding,
    },
};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Waiter {
    user_id: UserId,
    joined_at: DateTime<Utc>,
}

/// Wait line and slot set of one event.
#[derive(Debug, Clone, Default)]
pub struct EventLine {
    next_seq: u64,
    waiting: BTreeMap<u64, Waiter>,
    sequence_of: HashMap<UserId, u64>,
    active: HashMap<UserId, DateTime<Utc>>,
}

impl EventLine {
    /// An empty line.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of waiters, including any not yet dropped by a timeout.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.waiting.len()
    }

    /// Number of slots held, including lapsed ones not yet reclaimed.
    #[must_use]
    pub fn occupied_slots(&self) -> usize {
        self.active.len()
    }

    /// Number of slots whose reservation is still running at `now`.
    #[must_use]
    pub fn live_slots(&self, now: DateTime<Utc>) -> usize {
        self.active.values().filter(|expires| **expires > now).count()
    }

    /// Whether the line holds nobody.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.active.is_empty()
    }

    /// Waiters in FIFO order.
    pub fn waiters(&self) -> impl Iterator<Item = &UserId> {
        self.waiting.values().map(|w| &w.user_id)
    }

    /// Slot holders with their expiry, in no particular order.
    pub fn slot_holders(&self) -> impl Iterator<Item = (&UserId, DateTime<Utc>)> {
        self.active.iter().map(|(user, expires)| (user, *expires))
    }

    /// 1-based rank of a waiter.
    #[must_use]
    pub fn position_of(&self, user_id: &UserId) -> Option<u64> {
        let seq = *self.sequence_of.get(user_id)?;
        let ahead = self.waiting.range(..seq).count();
        Some(u64::try_from(ahead).unwrap_or(u64::MAX).saturating_add(1))
    }

    /// Admit or enqueue a buyer.
    pub fn join(
        &mut self,
        user_id: &UserId,
        policy: &AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> JoinOutcome {
        let mut housekeeping = self.tidy(policy, now);
        housekeeping.promoted = self.promote(policy, now);

        let placement = if let Some(expires_at) = self.active.get(user_id) {
            Placement::Admitted {
                expires_at: *expires_at,
                newly: false,
            }
        } else if let Some(position) = self.position_of(user_id) {
            Placement::Waiting {
                position,
                newly: false,
            }
        } else if policy.has_capacity(self.active.len()) {
            let expires_at = policy.expires_at(now);
            self.active.insert(user_id.clone(), expires_at);
            Placement::Admitted {
                expires_at,
                newly: true,
            }
        } else {
            self.enqueue(user_id, now);
            Placement::Waiting {
                position: u64::try_from(self.waiting.len()).unwrap_or(u64::MAX),
                newly: true,
            }
        };

        JoinOutcome {
            placement,
            housekeeping,
        }
    }

    /// Remove a buyer from wherever they are, then promote.
    pub fn leave(
        &mut self,
        user_id: &UserId,
        policy: &AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> ReleaseOutcome {
        let mut housekeeping = self.tidy(policy, now);

        let released = if self.active.remove(user_id).is_some() {
            Released::Active
        } else if self.dequeue(user_id) {
            Released::Waiting
        } else {
            Released::Absent
        };

        housekeeping.promoted = self.promote(policy, now);
        ReleaseOutcome {
            released,
            housekeeping,
        }
    }

    /// Release a buyer's slot after checkout, then promote.
    ///
    /// A lapsed slot is reclaimed as expired first, so it does not count as held.
    pub fn complete(
        &mut self,
        user_id: &UserId,
        policy: &AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> CompleteOutcome {
        let mut housekeeping = self.tidy(policy, now);
        let held = self.active.remove(user_id).is_some();
        housekeeping.promoted = self.promote(policy, now);
        CompleteOutcome { held, housekeeping }
    }

    /// Housekeeping plus promotion, nothing else.
    pub fn process(&mut self, policy: &AdmissionPolicy, now: DateTime<Utc>) -> Housekeeping {
        let mut housekeeping = self.tidy(policy, now);
        housekeeping.promoted = self.promote(policy, now);
        housekeeping
    }

    /// Read-only view at `now`.
    #[must_use]
    pub fn status(&self, user_id: Option<&UserId>, now: DateTime<Utc>) -> StatusView {
        let user = user_id.map(|user_id| match self.active.get(user_id) {
            Some(expires_at) if *expires_at > now => UserStanding::Active {
                expires_at: *expires_at,
            },
            _ => self
                .position_of(user_id)
                .map_or(UserStanding::Absent, |position| UserStanding::Waiting {
                    position,
                }),
        });
        StatusView {
            queue_length: u64::try_from(self.waiting.len()).unwrap_or(u64::MAX),
            active_buyers: u64::try_from(self.live_slots(now)).unwrap_or(u64::MAX),
            user,
        }
    }

    fn tidy(&mut self, policy: &AdmissionPolicy, now: DateTime<Utc>) -> Housekeeping {
        let mut expired: Vec<(DateTime<Utc>, UserId)> = self
            .active
            .iter()
            .filter(|(_, expires)| **expires <= now)
            .map(|(user, expires)| (*expires, user.clone()))
            .collect();
        expired.sort();
        for (_, user) in &expired {
            self.active.remove(user);
        }

        let mut timed_out = Vec::new();
        if let Some(cutoff) = policy.timeout_cutoff(now) {
            let stale: Vec<u64> = self
                .waiting
                .iter()
                .filter(|(_, waiter)| waiter.joined_at <= cutoff)
                .map(|(seq, _)| *seq)
                .collect();
            for seq in stale {
                if let Some(waiter) = self.waiting.remove(&seq) {
                    self.sequence_of.remove(&waiter.user_id);
                    timed_out.push(waiter.user_id);
                }
            }
        }

        Housekeeping {
            expired: expired.into_iter().map(|(_, user)| user).collect(),
            timed_out,
            promoted: Vec::new(),
        }
    }

    fn promote(&mut self, policy: &AdmissionPolicy, now: DateTime<Utc>) -> Vec<UserId> {
        let mut promoted = Vec::new();
        while policy.has_capacity(self.active.len()) {
            let Some((_, waiter)) = self.waiting.pop_first() else {
                break;
            };
            self.sequence_of.remove(&waiter.user_id);
            self.active
                .insert(waiter.user_id.clone(), policy.expires_at(now));
            promoted.push(waiter.user_id);
        }
        promoted
    }

    fn enqueue(&mut self, user_id: &UserId, now: DateTime<Utc>) {
        self.next_seq += 1;
        self.waiting.insert(
            self.next_seq,
            Waiter {
                user_id: user_id.clone(),
                joined_at: now,
            },
        );
        self.sequence_of.insert(user_id.clone(), self.next_seq);
    }

    fn dequeue(&mut self, user_id: &UserId) -> bool {
        self.sequence_of
            .remove(user_id)
            .and_then(|seq| self.waiting.remove(&seq))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventId, QueueConfig};
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn policy(limit: u32) -> AdmissionPolicy {
        AdmissionPolicy::from_config(Some(
            &QueueConfig::new(EventId::new("e1"), limit).with_reservation_seconds(300),
        ))
    }

    fn user(name: &str) -> UserId {
        UserId::new(name)
    }

    #[test]
    fn test_admits_until_full_then_queues() {
        let mut line = EventLine::new();
        let p = policy(2);

        let first = line.join(&user("u1"), &p, t0());
        assert!(matches!(
            first.placement,
            Placement::Admitted { newly: true, .. }
        ));
        line.join(&user("u2"), &p, t0());
        let third = line.join(&user("u3"), &p, t0());
        assert_eq!(
            third.placement,
            Placement::Waiting {
                position: 1,
                newly: true
            }
        );
        let fourth = line.join(&user("u4"), &p, t0());
        assert_eq!(
            fourth.placement,
            Placement::Waiting {
                position: 2,
                newly: true
            }
        );
        assert_eq!(line.occupied_slots(), 2);
        assert_eq!(line.queue_length(), 2);
    }

    #[test]
    fn test_rejoin_is_idempotent_and_keeps_reservation() {
        let mut line = EventLine::new();
        let p = policy(1);
        let first = line.join(&user("u1"), &p, t0());
        let later = t0() + TimeDelta::seconds(100);
        let again = line.join(&user("u1"), &p, later);

        let (Placement::Admitted { expires_at: a, .. }, Placement::Admitted { expires_at: b, newly }) =
            (first.placement, again.placement)
        else {
            unreachable!("both joins admit u1");
        };
        assert_eq!(a, b);
        assert!(!newly);

        line.join(&user("u2"), &p, t0());
        let rejoin = line.join(&user("u2"), &p, t0());
        assert_eq!(
            rejoin.placement,
            Placement::Waiting {
                position: 1,
                newly: false
            }
        );
        assert_eq!(line.queue_length(), 1);
    }

    #[test]
    fn test_complete_promotes_next_waiter() {
        let mut line = EventLine::new();
        let p = policy(2);
        for name in ["u1", "u2", "u3"] {
            line.join(&user(name), &p, t0());
        }

        let done = line.complete(&user("u1"), &p, t0());
        assert!(done.held);
        assert_eq!(done.housekeeping.promoted, vec![user("u3")]);

        let view = line.status(Some(&user("u3")), t0());
        assert!(matches!(view.user, Some(UserStanding::Active { .. })));
        assert_eq!(view.queue_length, 0);
        assert_eq!(view.active_buyers, 2);
    }

    #[test]
    fn test_complete_without_slot_is_false() {
        let mut line = EventLine::new();
        let p = policy(1);
        line.join(&user("u1"), &p, t0());
        line.join(&user("u2"), &p, t0());

        assert!(!line.complete(&user("u2"), &p, t0()).held);
        assert!(!line.complete(&user("ghost"), &p, t0()).held);
        assert_eq!(line.queue_length(), 1);
    }

    #[test]
    fn test_lapsed_slot_is_reclaimed_not_completed() {
        let mut line = EventLine::new();
        let p = policy(1);
        line.join(&user("u1"), &p, t0());
        line.join(&user("u2"), &p, t0());

        let late = t0() + TimeDelta::seconds(300);
        let done = line.complete(&user("u1"), &p, late);
        assert!(!done.held);
        assert_eq!(done.housekeeping.expired, vec![user("u1")]);
        assert_eq!(done.housekeeping.promoted, vec![user("u2")]);
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut line = EventLine::new();
        let p = policy(1);
        line.join(&user("u1"), &p, t0());
        line.join(&user("u2"), &p, t0());

        let absent = line.leave(&user("nobody"), &p, t0());
        assert_eq!(absent.released, Released::Absent);
        assert!(absent.housekeeping.is_empty());
        assert_eq!((line.occupied_slots(), line.queue_length()), (1, 1));

        assert_eq!(line.leave(&user("u2"), &p, t0()).released, Released::Waiting);
        assert_eq!(line.leave(&user("u2"), &p, t0()).released, Released::Absent);
    }

    #[test]
    fn test_leave_active_promotes() {
        let mut line = EventLine::new();
        let p = policy(1);
        line.join(&user("u1"), &p, t0());
        line.join(&user("u2"), &p, t0());
        let out = line.leave(&user("u1"), &p, t0());
        assert_eq!(out.released, Released::Active);
        assert_eq!(out.housekeeping.promoted, vec![user("u2")]);
    }

    #[test]
    fn test_newcomer_cannot_overtake_waiters() {
        let mut line = EventLine::new();
        let p = policy(1);
        line.join(&user("u1"), &p, t0());
        line.join(&user("u2"), &p, t0());

        // u1's slot lapses; the next join must promote u2 first.
        let late = t0() + TimeDelta::seconds(301);
        let out = line.join(&user("u3"), &p, late);
        assert_eq!(out.housekeeping.expired, vec![user("u1")]);
        assert_eq!(out.housekeeping.promoted, vec![user("u2")]);
        assert_eq!(
            out.placement,
            Placement::Waiting {
                position: 1,
                newly: true
            }
        );
    }

    #[test]
    fn test_process_respects_ceiling() {
        let mut line = EventLine::new();
        let unlimited = AdmissionPolicy::unlimited();
        let p = policy(1);
        line.join(&user("u1"), &p, t0());
        for name in ["u2", "u3", "u4"] {
            line.join(&user(name), &p, t0());
        }
        assert_eq!(line.queue_length(), 3);

        let out = line.process(&unlimited.with_ceiling(3), t0());
        assert_eq!(out.promoted, vec![user("u2"), user("u3")]);
        assert_eq!(line.occupied_slots(), 3);
    }

    #[test]
    fn test_queue_timeout_drops_waiters() {
        let mut line = EventLine::new();
        let p = AdmissionPolicy::from_config(Some(
            &QueueConfig::new(EventId::new("e1"), 1)
                .with_reservation_seconds(10_000)
                .with_queue_timeout_seconds(60),
        ));
        line.join(&user("u1"), &p, t0());
        line.join(&user("u2"), &p, t0());
        line.join(&user("u3"), &p, t0() + TimeDelta::seconds(30));

        let out = line.process(&p, t0() + TimeDelta::seconds(60));
        assert_eq!(out.timed_out, vec![user("u2")]);
        assert_eq!(line.position_of(&user("u3")), Some(1));
    }

    #[test]
    fn test_status_is_read_only() {
        let mut line = EventLine::new();
        let p = policy(1);
        line.join(&user("u1"), &p, t0());
        line.join(&user("u2"), &p, t0());

        let late = t0() + TimeDelta::seconds(400);
        let view = line.status(Some(&user("u1")), late);
        assert_eq!(view.active_buyers, 0);
        assert_eq!(view.user, Some(UserStanding::Absent));
        // Nothing was reclaimed or promoted.
        assert_eq!(line.occupied_slots(), 1);
        assert_eq!(line.position_of(&user("u2")), Some(1));
    }
}
