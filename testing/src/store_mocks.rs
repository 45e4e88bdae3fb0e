//! In-memory store doubles.
//!
//! - [`InMemoryAdmissionStore`]: runs [`EventLine`] per event under one mutex,
//!   so every operation is atomic the way a fast-store script is
//! - [`InMemoryConfigRepository`]: `HashMap`-backed config storage
//! - [`InMemoryAuditStore`]: keeps audit entries, can be told to fail
//!
//! Each double can be switched to a failing mode to exercise error paths.

use purchase_queue_core::{
    DateTime, EntryStatus, EventId, QueueConfig, QueueError, Result, UserId, Utc,
    audit::{AuditEntry, AuditStore, AuditTransition},
    line::EventLine,
    store::{
        AdmissionPolicy, AdmissionStore, CompleteOutcome, ConfigRepository, Housekeeping,
        JoinOutcome, ReleaseOutcome, StatusView, StoreFuture,
    },
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| QueueError::StoreUnavailable("Mutex lock failed".into()))
}

/// In-memory fast store for tests.
///
/// # Example
///
/// ```
/// use purchase_queue_testing::InMemoryAdmissionStore;
/// use purchase_queue_core::{EventId, UserId, store::{AdmissionPolicy, AdmissionStore, Placement}};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryAdmissionStore::new();
/// let event = EventId::new("e1");
/// let out = store
///     .join(&event, &UserId::new("u1"), AdmissionPolicy::unlimited().with_ceiling(1), Utc::now())
///     .await?;
/// assert!(matches!(out.placement, Placement::Admitted { newly: true, .. }));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryAdmissionStore {
    lines: Arc<Mutex<HashMap<EventId, EventLine>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryAdmissionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreUnavailable` (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of an event's line for assertions.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the lock is poisoned.
    pub fn line(&self, event_id: &EventId) -> Result<EventLine> {
        Ok(lock(&self.lines)?.get(event_id).cloned().unwrap_or_default())
    }

    fn with_line<T>(&self, event_id: &EventId, f: impl FnOnce(&mut EventLine) -> T) -> Result<T> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::StoreUnavailable("connection refused".into()));
        }
        let mut lines = lock(&self.lines)?;
        let line = lines.entry(event_id.clone()).or_default();
        let value = f(line);
        if line.is_empty() {
            lines.remove(event_id);
        }
        Ok(value)
    }
}

impl AdmissionStore for InMemoryAdmissionStore {
    fn join<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, JoinOutcome> {
        let result = self.with_line(event_id, |line| line.join(user_id, &policy, now));
        Box::pin(async move { result })
    }

    fn leave<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, ReleaseOutcome> {
        let result = self.with_line(event_id, |line| line.leave(user_id, &policy, now));
        Box::pin(async move { result })
    }

    fn complete<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, CompleteOutcome> {
        let result = self.with_line(event_id, |line| line.complete(user_id, &policy, now));
        Box::pin(async move { result })
    }

    fn process<'a>(
        &'a self,
        event_id: &'a EventId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Housekeeping> {
        let result = self.with_line(event_id, |line| line.process(&policy, now));
        Box::pin(async move { result })
    }

    fn status<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: Option<&'a UserId>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, StatusView> {
        let result = self.with_line(event_id, |line| line.status(user_id, now));
        Box::pin(async move { result })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        let result = if self.unavailable.load(Ordering::SeqCst) {
            Err(QueueError::StoreUnavailable("connection refused".into()))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }
}

/// In-memory config repository for tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryConfigRepository {
    configs: Arc<Mutex<HashMap<EventId, QueueConfig>>>,
}

impl InMemoryConfigRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-loaded with configs.
    #[must_use]
    pub fn with_configs(configs: impl IntoIterator<Item = QueueConfig>) -> Self {
        let map = configs
            .into_iter()
            .map(|config| (config.event_id.clone(), config))
            .collect();
        Self {
            configs: Arc::new(Mutex::new(map)),
        }
    }
}

impl ConfigRepository for InMemoryConfigRepository {
    fn load_config<'a>(
        &'a self,
        event_id: &'a EventId,
    ) -> StoreFuture<'a, Option<QueueConfig>> {
        let result = lock(&self.configs).map(|configs| configs.get(event_id).cloned());
        Box::pin(async move { result })
    }

    fn save_config<'a>(&'a self, config: &'a QueueConfig) -> StoreFuture<'a, ()> {
        let result = lock(&self.configs).map(|mut configs| {
            configs.insert(config.event_id.clone(), config.clone());
        });
        Box::pin(async move { result })
    }

    fn delete_config<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, bool> {
        let result = lock(&self.configs).map(|mut configs| configs.remove(event_id).is_some());
        Box::pin(async move { result })
    }

    fn configured_events(&self) -> StoreFuture<'_, Vec<EventId>> {
        let result = lock(&self.configs).map(|configs| {
            let mut events: Vec<EventId> = configs.keys().cloned().collect();
            events.sort();
            events
        });
        Box::pin(async move { result })
    }
}

/// In-memory audit store for tests.
///
/// Applies the same open-entry rules as the PostgreSQL store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAuditStore {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryAuditStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with `DurableWriteFailed` (or recover).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of recorded entries across all events.
    ///
    /// # Errors
    ///
    /// Returns `DurableWriteFailed` if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.guard()?.len())
    }

    /// Whether nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns `DurableWriteFailed` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.guard()?.is_empty())
    }

    fn guard(&self) -> Result<MutexGuard<'_, Vec<AuditEntry>>> {
        self.entries
            .lock()
            .map_err(|_| QueueError::DurableWriteFailed("Mutex lock failed".into()))
    }

    fn apply(&self, transition: &AuditTransition) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::DurableWriteFailed(
                "audit store offline".into(),
            ));
        }
        let mut entries = self.guard()?;
        let buyer = |entry: &AuditEntry| {
            entry.event_id == transition.event_id && entry.user_id == transition.user_id
        };
        let last_finished = entries
            .iter()
            .filter(|entry| buyer(entry))
            .filter_map(|entry| entry.finished_at)
            .max();
        let open = entries
            .iter_mut()
            .find(|entry| entry.is_open() && buyer(entry));

        match open {
            Some(_) if transition.status == EntryStatus::Waiting => {}
            Some(entry) => {
                if entry.updated_at() <= transition.at {
                    entry.apply(transition);
                }
            }
            None => {
                let stale = last_finished.is_some_and(|finished| {
                    finished > transition.at
                        || (transition.status.is_terminal() && finished == transition.at)
                });
                if !stale {
                    entries.push(AuditEntry::open(transition));
                }
            }
        }
        Ok(())
    }
}

impl AuditStore for InMemoryAuditStore {
    fn record<'a>(&'a self, transition: &'a AuditTransition) -> StoreFuture<'a, ()> {
        let result = self.apply(transition);
        Box::pin(async move { result })
    }

    fn entries<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, Vec<AuditEntry>> {
        let result = self.guard().map(|entries| {
            entries
                .iter()
                .filter(|entry| &entry.event_id == event_id)
                .cloned()
                .collect()
        });
        Box::pin(async move { result })
    }
}
