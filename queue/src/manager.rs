//! Queue manager facade.
//!
//! Request handlers talk to the [`QueueManager`]. It delegates every
//! admission decision to the [`AdmissionController`] and then records the
//! resulting status transitions in the durable [`AuditStore`].
//!
//! Audit writes are best effort: the fast store has already decided and the
//! buyer already sees the outcome, so a failed write is logged at `warn` and
//! returned alongside the value in [`Audited::audit_failures`]. It never fails
//! the call.
//!
//! Concurrent requests for the same buyer persist independently, so their
//! transitions can reach the audit store out of order. Stores apply them by
//! their decision time ([`AuditTransition::at`]), not by arrival.
//!
//! The read path ([`QueueManager::get_queue_status`]) never touches the
//! durable store.

use crate::controller::{AdmissionController, Decision};
use purchase_queue_core::{
    EventId, ProcessOutcome, QueueConfig, QueueError, QueuePosition, QueueStatus, Result, UserId,
    audit::{AuditStore, AuditTransition},
    store::{ConfigRepository, Released},
};
use std::sync::Arc;

/// A value plus the audit writes that failed while producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audited<T> {
    /// The admission outcome.
    pub value: T,
    /// Durable writes that did not go through.
    pub audit_failures: Vec<QueueError>,
}

impl<T> Audited<T> {
    /// Whether every transition was recorded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.audit_failures.is_empty()
    }

    /// Drop the failure list.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Per-event orchestration over the controller and the audit store.
#[derive(Clone)]
pub struct QueueManager {
    controller: AdmissionController,
    configs: Arc<dyn ConfigRepository>,
    audit: Arc<dyn AuditStore>,
}

impl QueueManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        controller: AdmissionController,
        configs: Arc<dyn ConfigRepository>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            controller,
            configs,
            audit,
        }
    }

    /// The underlying controller.
    #[must_use]
    pub const fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    /// Join an event's queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the fast store is down.
    pub async fn join_queue(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<Audited<QueuePosition>> {
        let decision = self.controller.join(event_id, user_id).await?;
        Ok(self.persist(decision).await)
    }

    /// Leave an event's queue. Leaving twice is fine.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the fast store is down.
    pub async fn leave_queue(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<Audited<Released>> {
        let decision = self.controller.leave(event_id, user_id).await?;
        Ok(self.persist(decision).await)
    }

    /// Finish a checkout; the value is whether a slot was held.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the fast store is down.
    pub async fn complete_purchase(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        success: bool,
    ) -> Result<Audited<bool>> {
        let decision = self
            .controller
            .complete_purchase(event_id, user_id, success)
            .await?;
        Ok(self.persist(decision).await)
    }

    /// Reclaim and promote for one event.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidArgument`] for a zero ceiling and
    /// [`QueueError::StoreUnavailable`] if the fast store is down.
    pub async fn process_queue(
        &self,
        event_id: &EventId,
        max_concurrent: u32,
    ) -> Result<Audited<ProcessOutcome>> {
        let decision = self.controller.process_queue(event_id, max_concurrent).await?;
        Ok(self.persist(decision).await)
    }

    /// Fast-store-only status read.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the fast store is down.
    pub async fn get_queue_status(
        &self,
        event_id: &EventId,
        user_id: Option<&UserId>,
    ) -> Result<QueueStatus> {
        self.controller.get_status(event_id, user_id).await
    }

    /// Validate and store an event's config.
    ///
    /// Lowering `maxConcurrentBuyers` evicts nobody: buyers already holding
    /// slots keep them and promotion waits until occupancy drops below the
    /// new limit.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidArgument`] for an invalid config or
    /// [`QueueError::StoreUnavailable`] if the store is down.
    #[tracing::instrument(skip_all, fields(event_id = %config.event_id))]
    pub async fn save_config(&self, config: &QueueConfig) -> Result<()> {
        config.validate()?;
        self.configs.save_config(config).await?;
        tracing::info!(
            max_concurrent_buyers = config.max_concurrent_buyers,
            reservation_time_seconds = config.reservation_time_seconds,
            queue_timeout_seconds = config.queue_timeout_seconds,
            queue_enabled = config.queue_enabled,
            "Saved queue config"
        );
        Ok(())
    }

    /// Load an event's config.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] or [`QueueError::CorruptState`].
    pub async fn load_config(&self, event_id: &EventId) -> Result<Option<QueueConfig>> {
        self.configs.load_config(event_id).await
    }

    /// Remove an event's config; the event becomes ungated.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the store is down.
    pub async fn delete_config(&self, event_id: &EventId) -> Result<bool> {
        let existed = self.configs.delete_config(event_id).await?;
        if existed {
            tracing::info!(event_id = %event_id, "Deleted queue config");
        }
        Ok(existed)
    }

    /// Events that have a config.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] or [`QueueError::CorruptState`].
    pub async fn configured_events(&self) -> Result<Vec<EventId>> {
        self.configs.configured_events().await
    }

    async fn persist<T>(&self, decision: Decision<T>) -> Audited<T> {
        let mut audit_failures = Vec::new();
        for transition in &decision.transitions {
            if let Err(error) = self.audit.record(transition).await {
                log_audit_failure(transition, &error);
                audit_failures.push(error);
            }
        }
        Audited {
            value: decision.value,
            audit_failures,
        }
    }
}

fn log_audit_failure(transition: &AuditTransition, error: &QueueError) {
    metrics::counter!("purchase_queue_audit_write_failures_total").increment(1);
    tracing::warn!(
        event_id = %transition.event_id,
        user_id = %transition.user_id,
        status = %transition.status,
        error = %error,
        "Failed to record queue transition"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use purchase_queue_core::{EntryStatus, audit::AuditEntry};
    use purchase_queue_testing::{
        InMemoryAdmissionStore, InMemoryAuditStore, InMemoryConfigRepository, ManualClock,
    };

    struct Fixture {
        manager: QueueManager,
        audit: Arc<InMemoryAuditStore>,
        admission: Arc<InMemoryAdmissionStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(configs: impl IntoIterator<Item = QueueConfig>) -> Fixture {
        let admission = Arc::new(InMemoryAdmissionStore::new());
        let configs: Arc<dyn ConfigRepository> =
            Arc::new(InMemoryConfigRepository::with_configs(configs));
        let audit = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(ManualClock::default());
        let controller = AdmissionController::new(admission.clone(), configs.clone(), clock.clone());
        Fixture {
            manager: QueueManager::new(controller, configs, audit.clone()),
            audit,
            admission,
            clock,
        }
    }

    fn e1() -> EventId {
        EventId::new("e1")
    }

    async fn entries(audit: &InMemoryAuditStore) -> Vec<AuditEntry> {
        audit.entries(&e1()).await.unwrap()
    }

    #[tokio::test]
    async fn test_join_records_waiting_and_active() {
        let f = fixture([QueueConfig::new(e1(), 1)]);
        let first = f.manager.join_queue(&e1(), &UserId::new("u1")).await.unwrap();
        let second = f.manager.join_queue(&e1(), &UserId::new("u2")).await.unwrap();
        assert!(first.is_clean() && second.is_clean());

        let rows = entries(&f.audit).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, EntryStatus::Active);
        assert_eq!(rows[1].status, EntryStatus::Waiting);
        assert_eq!(rows[1].position, Some(1));
    }

    #[tokio::test]
    async fn test_audit_outage_does_not_block_admission() {
        let f = fixture([QueueConfig::new(e1(), 1)]);
        f.audit.set_failing(true);

        let joined = f.manager.join_queue(&e1(), &UserId::new("u1")).await.unwrap();
        assert!(joined.value.can_enter);
        assert_eq!(joined.audit_failures.len(), 1);
        assert!(matches!(
            joined.audit_failures[0],
            QueueError::DurableWriteFailed(_)
        ));
        assert!(f.admission.line(&e1()).unwrap().position_of(&UserId::new("u1")).is_none());
        assert_eq!(f.admission.line(&e1()).unwrap().occupied_slots(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_rows() {
        let f = fixture([QueueConfig::new(e1(), 1).with_reservation_seconds(60)]);
        for name in ["u1", "u2", "u3"] {
            f.manager.join_queue(&e1(), &UserId::new(name)).await.unwrap();
        }
        // u1 completes, u2 is promoted; u3 leaves while waiting.
        f.manager
            .complete_purchase(&e1(), &UserId::new("u1"), true)
            .await
            .unwrap();
        f.manager.leave_queue(&e1(), &UserId::new("u3")).await.unwrap();
        // u2's reservation lapses and is reclaimed by the next pass.
        f.clock.advance(TimeDelta::seconds(61));
        let processed = f.manager.process_queue(&e1(), 1).await.unwrap();
        assert_eq!(processed.value.expired_users, vec![UserId::new("u2")]);

        let statuses: Vec<(String, EntryStatus)> = entries(&f.audit)
            .await
            .into_iter()
            .map(|e| (e.user_id.to_string(), e.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("u1".into(), EntryStatus::Completed),
                ("u2".into(), EntryStatus::Expired),
                ("u3".into(), EntryStatus::Abandoned),
            ]
        );
    }

    #[tokio::test]
    async fn test_status_skips_audit_store() {
        let f = fixture([QueueConfig::new(e1(), 1)]);
        f.audit.set_failing(true);
        let status = f.manager.get_queue_status(&e1(), None).await.unwrap();
        assert_eq!(status.queue_length, 0);
    }

    #[tokio::test]
    async fn test_config_validation() {
        let f = fixture([]);
        let err = f
            .manager
            .save_config(&QueueConfig::new(e1(), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidArgument(_)));

        f.manager.save_config(&QueueConfig::new(e1(), 3)).await.unwrap();
        assert_eq!(
            f.manager.load_config(&e1()).await.unwrap().map(|c| c.max_concurrent_buyers),
            Some(3)
        );
        assert_eq!(f.manager.configured_events().await.unwrap(), vec![e1()]);
        assert!(f.manager.delete_config(&e1()).await.unwrap());
        assert!(!f.manager.delete_config(&e1()).await.unwrap());
    }
}
