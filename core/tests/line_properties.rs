//! Property tests for the per-event line state machine.
//!
//! Random interleavings of join / leave / complete / process with time moving
//! forward must keep the queue invariants at every observable point.

#![allow(clippy::unwrap_used)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use purchase_queue_core::{
    EventId, QueueConfig, UserId,
    line::EventLine,
    store::{AdmissionPolicy, Placement, Released},
};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
enum Op {
    Join(u8),
    Leave(u8),
    Complete(u8),
    Process,
    Advance(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..8).prop_map(Op::Join),
        1 => (0u8..8).prop_map(Op::Leave),
        1 => (0u8..8).prop_map(Op::Complete),
        1 => Just(Op::Process),
        1 => (0u16..200).prop_map(Op::Advance),
    ]
}

fn user(n: u8) -> UserId {
    UserId::new(format!("u{n}"))
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap()
}

fn policy(limit: u32, timeout: u64) -> AdmissionPolicy {
    AdmissionPolicy::from_config(Some(
        &QueueConfig::new(EventId::new("e1"), limit)
            .with_reservation_seconds(120)
            .with_queue_timeout_seconds(timeout),
    ))
}

fn assert_no_duplicates(line: &EventLine) {
    let waiters: Vec<&UserId> = line.waiters().collect();
    let unique: HashSet<&UserId> = waiters.iter().copied().collect();
    assert_eq!(waiters.len(), unique.len(), "user waiting twice");
    for (holder, _) in line.slot_holders() {
        assert!(!unique.contains(holder), "{holder} both waiting and active");
    }
}

proptest! {
    /// Slot count never exceeds the limit and nobody is queued twice.
    #[test]
    fn prop_capacity_and_uniqueness(
        limit in 1u32..4,
        timeout in prop_oneof![Just(0u64), 60u64..600],
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let p = policy(limit, timeout);
        let mut line = EventLine::new();
        let mut now = start();

        for op in ops {
            match op {
                Op::Join(n) => { line.join(&user(n), &p, now); }
                Op::Leave(n) => { line.leave(&user(n), &p, now); }
                Op::Complete(n) => { line.complete(&user(n), &p, now); }
                Op::Process => { line.process(&p, now); }
                Op::Advance(secs) => now += TimeDelta::seconds(i64::from(secs)),
            }
            prop_assert!(line.occupied_slots() <= limit as usize);
            prop_assert!(line.live_slots(now) <= limit as usize);
            assert_no_duplicates(&line);
        }
    }

    /// Waiters are promoted in the order they joined.
    #[test]
    fn prop_fifo_promotion(
        limit in 1u32..4,
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let p = policy(limit, 0);
        let mut line = EventLine::new();
        let mut now = start();
        let mut joined_seq: HashMap<UserId, usize> = HashMap::new();
        let mut counter = 0usize;
        let mut last_promoted_seq: Option<usize> = None;

        for op in ops {
            let promoted = match op {
                Op::Join(n) => {
                    let out = line.join(&user(n), &p, now);
                    let promoted = out.housekeeping.promoted;
                    check_order(&promoted, &joined_seq, &mut last_promoted_seq)?;
                    if let Placement::Waiting { newly: true, .. } = out.placement {
                        counter += 1;
                        joined_seq.insert(user(n), counter);
                    }
                    continue;
                }
                Op::Leave(n) => line.leave(&user(n), &p, now).housekeeping.promoted,
                Op::Complete(n) => line.complete(&user(n), &p, now).housekeeping.promoted,
                Op::Process => line.process(&p, now).promoted,
                Op::Advance(secs) => {
                    now += TimeDelta::seconds(i64::from(secs));
                    Vec::new()
                }
            };
            check_order(&promoted, &joined_seq, &mut last_promoted_seq)?;
        }
    }

    /// Leaving when absent changes nothing beyond the housekeeping any
    /// operation at that instant would do.
    #[test]
    fn prop_leave_absent_is_noop(
        limit in 1u32..4,
        ops in prop::collection::vec(op_strategy(), 0..40),
        advance in 0i64..400,
    ) {
        let p = policy(limit, 0);
        let mut line = EventLine::new();
        for op in ops {
            if let Op::Join(n) = op {
                line.join(&user(n), &p, start());
            }
        }
        let now = start() + TimeDelta::seconds(advance);

        let mut reference = line.clone();
        reference.process(&p, now);

        let out = line.leave(&UserId::new("stranger"), &p, now);
        prop_assert_eq!(out.released, Released::Absent);
        prop_assert_eq!(line.occupied_slots(), reference.occupied_slots());
        prop_assert_eq!(line.queue_length(), reference.queue_length());
    }

    /// After a process pass no lapsed slot remains.
    #[test]
    fn prop_process_reclaims_lapsed_slots(
        limit in 1u32..4,
        joins in prop::collection::vec((0u8..8, 0i64..300), 1..30),
        at in 0i64..600,
    ) {
        let p = policy(limit, 0);
        let mut line = EventLine::new();
        let mut sorted = joins;
        sorted.sort_by_key(|(_, offset)| *offset);
        for (n, offset) in sorted {
            line.join(&user(n), &p, start() + TimeDelta::seconds(offset));
        }

        let now = start() + TimeDelta::seconds(at);
        line.process(&p, now);
        for (holder, expires_at) in line.slot_holders() {
            prop_assert!(expires_at > now, "{} still holds a lapsed slot", holder);
        }
    }
}

fn check_order(
    promoted: &[UserId],
    joined_seq: &HashMap<UserId, usize>,
    last: &mut Option<usize>,
) -> Result<(), TestCaseError> {
    for user_id in promoted {
        let seq = joined_seq.get(user_id).copied().unwrap_or_default();
        if let Some(prev) = *last {
            prop_assert!(seq > prev, "{} promoted out of join order", user_id);
        }
        *last = Some(seq);
    }
    Ok(())
}

#[test]
fn concurrent_join_race_on_last_slot() {
    // Two joins serialised by the store's atomic step on an empty line with
    // one slot: exactly one is admitted, the other waits at position 1.
    let p = policy(1, 0);
    let mut line = EventLine::new();
    let a = line.join(&user(1), &p, start());
    let b = line.join(&user(2), &p, start());

    assert!(matches!(a.placement, Placement::Admitted { newly: true, .. }));
    assert_eq!(
        b.placement,
        Placement::Waiting {
            position: 1,
            newly: true
        }
    );
}
