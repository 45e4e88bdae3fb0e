//! End-to-end admission scenarios over the in-memory stores.
//!
//! These run the manager, controller and audit recording together with a
//! manual clock, the way the server wires them against Redis and
//! `PostgreSQL`.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use chrono::TimeDelta;
use purchase_queue::{AdmissionController, QueueManager, QueueSweeper};
use purchase_queue_core::{
    EntryStatus, EventId, QueueConfig, QueuePosition, UserId, audit::AuditStore,
    environment::Clock,
};
use purchase_queue_testing::{
    InMemoryAdmissionStore, InMemoryAuditStore, InMemoryConfigRepository, ManualClock,
};
use std::sync::Arc;

struct Harness {
    manager: Arc<QueueManager>,
    store: Arc<InMemoryAdmissionStore>,
    audit: Arc<InMemoryAuditStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(configs: impl IntoIterator<Item = QueueConfig>) -> Self {
        let store = Arc::new(InMemoryAdmissionStore::new());
        let configs = Arc::new(InMemoryConfigRepository::with_configs(configs));
        let audit = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(ManualClock::default());
        let controller = AdmissionController::new(store.clone(), configs.clone(), clock.clone());
        Self {
            manager: Arc::new(QueueManager::new(controller, configs, audit.clone())),
            store,
            audit,
            clock,
        }
    }

    async fn join(&self, event: &EventId, user: &str) -> QueuePosition {
        self.manager
            .join_queue(event, &UserId::new(user))
            .await
            .expect("join")
            .into_value()
    }
}

fn concert() -> EventId {
    EventId::new("concert-42")
}

#[tokio::test]
async fn test_complete_purchase_promotes_waiter() {
    let h = Harness::new([QueueConfig::new(concert(), 2).with_reservation_seconds(300)]);

    assert!(h.join(&concert(), "u1").await.can_enter);
    assert!(h.join(&concert(), "u2").await.can_enter);
    let u3 = h.join(&concert(), "u3").await;
    assert_eq!(u3.position, 1);
    assert!(!u3.can_enter);

    let held = h
        .manager
        .complete_purchase(&concert(), &UserId::new("u1"), true)
        .await
        .unwrap()
        .into_value();
    assert!(held);

    let status = h
        .manager
        .get_queue_status(&concert(), Some(&UserId::new("u3")))
        .await
        .unwrap();
    assert_eq!(status.can_enter, Some(true));
    assert_eq!(status.position, Some(0));
    assert_eq!(status.active_buyers, 2);
    assert_eq!(status.queue_length, 0);

    let entries = h.audit.entries(&concert()).await.unwrap();
    let u1 = entries.iter().find(|e| e.user_id.as_str() == "u1").unwrap();
    let u3 = entries.iter().find(|e| e.user_id.as_str() == "u3").unwrap();
    assert_eq!(u1.status, EntryStatus::Completed);
    assert_eq!(u3.status, EntryStatus::Active);
    assert!(u3.admitted_at.is_some());
}

#[tokio::test]
async fn test_fifo_promotion_order() {
    let h = Harness::new([QueueConfig::new(concert(), 1)]);
    h.join(&concert(), "holder").await;
    for (i, user) in ["a", "b", "c", "d"].iter().enumerate() {
        assert_eq!(h.join(&concert(), user).await.position, i as u64 + 1);
    }

    let mut admitted = Vec::new();
    let mut current = "holder".to_string();
    for _ in 0..4 {
        let audited = h
            .manager
            .complete_purchase(&concert(), &UserId::new(current.as_str()), true)
            .await
            .unwrap();
        assert!(audited.value);
        let line = h.store.line(&concert()).unwrap();
        let (next, _) = line.slot_holders().next().expect("one slot holder");
        current = next.to_string();
        admitted.push(current.clone());
    }
    assert_eq!(admitted, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_waiting_buyer_leaves_before_promotion() {
    let h = Harness::new([QueueConfig::new(concert(), 1)]);
    h.join(&concert(), "u1").await;
    h.join(&concert(), "u2").await;
    h.join(&concert(), "u3").await;

    h.manager
        .leave_queue(&concert(), &UserId::new("u2"))
        .await
        .unwrap();
    assert_eq!(h.join(&concert(), "u3").await.position, 1);

    // Leaving again is a no-op.
    let again = h
        .manager
        .leave_queue(&concert(), &UserId::new("u2"))
        .await
        .unwrap();
    assert!(again.is_clean());
    assert_eq!(h.store.line(&concert()).unwrap().queue_length(), 1);
}

#[tokio::test]
async fn test_reservation_lapse_reclaimed_by_sweeper() {
    let h = Harness::new([QueueConfig::new(concert(), 1).with_reservation_seconds(120)]);
    h.join(&concert(), "u1").await;
    h.join(&concert(), "u2").await;

    h.clock.advance(TimeDelta::seconds(121));
    // Lapsed slots no longer count, even before anyone reclaims them.
    let status = h.manager.get_queue_status(&concert(), None).await.unwrap();
    assert_eq!(status.active_buyers, 0);
    assert_eq!(status.queue_length, 1);

    let report = QueueSweeper::new(h.manager.clone()).sweep_once().await.unwrap();
    assert_eq!(report.total_expired, 1);
    assert_eq!(report.total_processed, 1);

    let status = h
        .manager
        .get_queue_status(&concert(), Some(&UserId::new("u2")))
        .await
        .unwrap();
    assert_eq!(status.can_enter, Some(true));

    let late = h
        .manager
        .complete_purchase(&concert(), &UserId::new("u1"), true)
        .await
        .unwrap();
    assert!(!late.value);
}

#[tokio::test]
async fn test_waiter_times_out() {
    let h = Harness::new([QueueConfig::new(concert(), 1)
        .with_reservation_seconds(7200)
        .with_queue_timeout_seconds(600)]);
    h.join(&concert(), "u1").await;
    h.join(&concert(), "u2").await;

    h.clock.advance(TimeDelta::seconds(600));
    let outcome = h
        .manager
        .process_queue(&concert(), 1)
        .await
        .unwrap()
        .into_value();
    assert_eq!(outcome.timed_out_users, vec![UserId::new("u2")]);
    assert!(outcome.new_active_users.is_empty());

    let entries = h.audit.entries(&concert()).await.unwrap();
    let u2 = entries.iter().find(|e| e.user_id.as_str() == "u2").unwrap();
    assert_eq!(u2.status, EntryStatus::Expired);
}

#[tokio::test]
async fn test_disabled_queue_admits_everyone() {
    let h = Harness::new([QueueConfig::new(concert(), 1).with_enabled(false)]);
    for user in ["u1", "u2", "u3"] {
        assert_eq!(h.join(&concert(), user).await, QueuePosition::admitted());
    }
    let status = h.manager.get_queue_status(&concert(), None).await.unwrap();
    assert_eq!(status.active_buyers, 3);
}

#[tokio::test]
async fn test_enabling_queue_later_keeps_existing_slots() {
    let h = Harness::new([]);
    for user in ["u1", "u2", "u3"] {
        h.join(&concert(), user).await;
    }
    h.manager
        .save_config(&QueueConfig::new(concert(), 2))
        .await
        .unwrap();

    // Over the new limit: nobody is evicted, the newcomer waits.
    let newcomer = h.join(&concert(), "u4").await;
    assert_eq!(newcomer.position, 1);
    assert_eq!(h.store.line(&concert()).unwrap().occupied_slots(), 3);

    h.manager
        .leave_queue(&concert(), &UserId::new("u1"))
        .await
        .unwrap();
    // Still at the limit after one departure.
    assert_eq!(h.join(&concert(), "u4").await.position, 1);

    h.manager
        .leave_queue(&concert(), &UserId::new("u2"))
        .await
        .unwrap();
    assert!(h.join(&concert(), "u4").await.can_enter);
}

#[tokio::test]
async fn test_unvalidated_oversized_windows_are_capped() {
    // Written straight to the repository, as a config saved before the
    // window limit existed would be.
    let h = Harness::new([QueueConfig::new(concert(), 1)
        .with_reservation_seconds(10_000_000_000_000_000)
        .with_queue_timeout_seconds(u64::MAX)]);
    assert!(h.join(&concert(), "u1").await.can_enter);
    assert_eq!(h.join(&concert(), "u2").await.position, 1);

    let expires_at = h
        .store
        .line(&concert())
        .unwrap()
        .slot_holders()
        .map(|(_, expires)| expires)
        .next()
        .unwrap();
    assert_eq!(expires_at - h.clock.now(), TimeDelta::days(7));

    let report = QueueSweeper::new(h.manager.clone()).sweep_once().await.unwrap();
    assert_eq!(report.processed_queues, 1);
    assert!(report.results.iter().all(|r| r.error.is_none()));

    h.clock.advance(TimeDelta::days(7));
    let report = QueueSweeper::new(h.manager.clone()).sweep_once().await.unwrap();
    assert_eq!(report.total_expired, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_join_race() {
    for _ in 0..50 {
        let h = Harness::new([QueueConfig::new(concert(), 1)]);
        let a = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.join_queue(&concert(), &UserId::new("a")).await })
        };
        let b = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.join_queue(&concert(), &UserId::new("b")).await })
        };
        let a = a.await.unwrap().unwrap().into_value();
        let b = b.await.unwrap().unwrap().into_value();

        assert!(a.can_enter ^ b.can_enter, "exactly one buyer is admitted");
        let queued = if a.can_enter { b } else { a };
        assert_eq!(queued.position, 1);
    }
}
