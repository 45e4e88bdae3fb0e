//! Concurrent traffic against one event.
//!
//! Many tasks join, leave, complete and process at once on a multi-threaded
//! runtime. A watcher samples the line throughout and checks the slot
//! ceiling and single-entry rules at every observation.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use purchase_queue::{AdmissionController, QueueManager};
use purchase_queue_core::{EventId, QueueConfig, UserId};
use purchase_queue_testing::{
    InMemoryAdmissionStore, InMemoryAuditStore, InMemoryConfigRepository, ManualClock,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const LIMIT: u32 = 5;
const BUYERS: usize = 200;

fn event() -> EventId {
    EventId::new("drop-2025")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_ceiling_holds_under_concurrent_traffic() {
    let store = Arc::new(InMemoryAdmissionStore::new());
    let configs = Arc::new(InMemoryConfigRepository::with_configs([QueueConfig::new(
        event(),
        LIMIT,
    )]));
    let controller = AdmissionController::new(
        store.clone(),
        configs.clone(),
        Arc::new(ManualClock::default()),
    );
    let manager = Arc::new(QueueManager::new(
        controller,
        configs,
        Arc::new(InMemoryAuditStore::new()),
    ));

    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let store = store.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut observations = 0_u32;
            loop {
                let line = store.line(&event()).unwrap();
                assert!(line.occupied_slots() <= LIMIT as usize);

                let waiting: HashSet<&UserId> = line.waiters().collect();
                assert_eq!(waiting.len(), line.queue_length(), "duplicate waiter");
                assert!(
                    line.slot_holders().all(|(user, _)| !waiting.contains(user)),
                    "buyer both waiting and active"
                );
                observations += 1;
                if done.load(Ordering::SeqCst) {
                    break observations;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let mut tasks = Vec::with_capacity(BUYERS);
    for i in 0..BUYERS {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            let user = UserId::new(format!("buyer-{i}"));
            let position = manager.join_queue(&event(), &user).await.unwrap().value;
            // Nothing lapses on a frozen clock, so an admitted buyer stays admitted.
            let again = manager.join_queue(&event(), &user).await.unwrap().value;
            assert!(!position.can_enter || again.can_enter);

            match i % 4 {
                0 => {
                    manager.leave_queue(&event(), &user).await.unwrap();
                }
                1 => {
                    manager
                        .complete_purchase(&event(), &user, true)
                        .await
                        .unwrap();
                }
                2 => {
                    manager.process_queue(&event(), LIMIT).await.unwrap();
                }
                _ => {}
            }
        }));
    }
    for task in tasks {
        task.await.expect("buyer task panicked");
    }
    done.store(true, Ordering::SeqCst);
    let observations = watcher.await.expect("watcher panicked");
    assert!(observations > 0);

    // Waiters remain, so every slot is taken.
    let line = store.line(&event()).unwrap();
    assert_eq!(line.occupied_slots(), LIMIT as usize);

    // Drain: completing every holder walks the whole line through checkout.
    let mut rounds = 0;
    loop {
        let line = store.line(&event()).unwrap();
        assert!(line.occupied_slots() <= LIMIT as usize);
        let holders: Vec<UserId> = line.slot_holders().map(|(u, _)| u.clone()).collect();
        if holders.is_empty() {
            assert_eq!(line.queue_length(), 0);
            break;
        }
        for holder in holders {
            let held = manager
                .complete_purchase(&event(), &holder, true)
                .await
                .unwrap()
                .value;
            assert!(held);
        }
        rounds += 1;
        assert!(rounds <= BUYERS, "line never drained");
    }
}
