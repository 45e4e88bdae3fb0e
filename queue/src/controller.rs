//! Admission controller.
//!
//! Resolves an event's [`QueueConfig`] into an [`AdmissionPolicy`], runs the
//! matching atomic store operation and turns its outcome into a caller-facing
//! value plus the buyer status transitions it caused.
//!
//! The controller holds no queue state of its own: every decision is made by
//! one atomic call into the [`AdmissionStore`], so any number of replicas can
//! serve the same event.

use chrono::{DateTime, Utc};
use purchase_queue_core::{
    EntryStatus, EventId, ProcessOutcome, QueueConfig, QueueError, QueuePosition, QueueStatus,
    Result, UserId,
    audit::AuditTransition,
    environment::Clock,
    store::{
        AdmissionPolicy, AdmissionStore, ConfigRepository, Housekeeping, Placement, Released,
        UserStanding,
    },
};
use std::sync::Arc;

/// Wait estimate per buyer ahead in line.
pub const DEFAULT_AVG_SECONDS_PER_BUYER: u64 = 120;

/// A controller result and the status transitions behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision<T> {
    /// What the caller gets back.
    pub value: T,
    /// Status changes to persist, in the order they happened.
    pub transitions: Vec<AuditTransition>,
}

impl<T> Decision<T> {
    /// Drop the transitions.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Bounded-concurrency admission over an [`AdmissionStore`].
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn AdmissionStore>,
    configs: Arc<dyn ConfigRepository>,
    clock: Arc<dyn Clock>,
    avg_seconds_per_buyer: u64,
}

impl AdmissionController {
    /// Create a controller over injected stores and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        configs: Arc<dyn ConfigRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            configs,
            clock,
            avg_seconds_per_buyer: DEFAULT_AVG_SECONDS_PER_BUYER,
        }
    }

    /// Override the per-buyer wait estimate.
    #[must_use]
    pub const fn with_avg_seconds_per_buyer(mut self, seconds: u64) -> Self {
        self.avg_seconds_per_buyer = seconds;
        self
    }

    /// The fast store this controller decides against.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AdmissionStore> {
        &self.store
    }

    /// The clock expiry is evaluated against.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Admit the buyer or place them in the wait line.
    ///
    /// Without a config (or with the queue disabled) every buyer is admitted.
    /// Repeated calls return the buyer's current placement.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the fast store cannot be
    /// reached; nobody is admitted in that case.
    #[tracing::instrument(skip_all, fields(event_id = %event_id, user_id = %user_id))]
    pub async fn join(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<Decision<QueuePosition>> {
        let policy = self.policy(event_id).await?;
        let now = self.clock.now();
        let outcome = self.store.join(event_id, user_id, policy, now).await?;

        let mut transitions = Vec::new();
        let value = match outcome.placement {
            Placement::Admitted { newly, expires_at } => {
                if newly {
                    transitions.push(transition(event_id, user_id, EntryStatus::Active, Some(0), now));
                    metrics::counter!("purchase_queue_admissions_total", "path" => "direct")
                        .increment(1);
                    tracing::info!(expires_at = %expires_at, "Buyer admitted");
                }
                QueuePosition::admitted()
            }
            Placement::Waiting { position, newly } => {
                if newly {
                    transitions.push(transition(
                        event_id,
                        user_id,
                        EntryStatus::Waiting,
                        Some(position),
                        now,
                    ));
                    metrics::counter!("purchase_queue_joins_waiting_total").increment(1);
                    tracing::info!(position, "Buyer placed in wait line");
                }
                QueuePosition::waiting(position, self.avg_seconds_per_buyer)
            }
        };

        Ok(Decision {
            value,
            transitions: with_housekeeping(event_id, outcome.housekeeping, transitions, now),
        })
    }

    /// Remove the buyer from the event, freeing their slot or line entry.
    ///
    /// Leaving is idempotent: a buyer who is not queued is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the fast store cannot be reached.
    #[tracing::instrument(skip_all, fields(event_id = %event_id, user_id = %user_id))]
    pub async fn leave(&self, event_id: &EventId, user_id: &UserId) -> Result<Decision<Released>> {
        let policy = self.policy(event_id).await?;
        let now = self.clock.now();
        let outcome = self.store.leave(event_id, user_id, policy, now).await?;

        let mut transitions = Vec::new();
        if outcome.released != Released::Absent {
            transitions.push(transition(event_id, user_id, EntryStatus::Abandoned, None, now));
            metrics::counter!("purchase_queue_departures_total", "status" => "abandoned")
                .increment(1);
        }
        tracing::debug!(released = ?outcome.released, "Buyer left");

        Ok(Decision {
            value: outcome.released,
            transitions: with_housekeeping(event_id, outcome.housekeeping, transitions, now),
        })
    }

    /// Release the buyer's slot after checkout.
    ///
    /// Returns whether the buyer held an unexpired slot; `false` is a caller
    /// error, not a failure. A lapsed slot is reclaimed as expired.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the fast store cannot be reached.
    #[tracing::instrument(skip_all, fields(event_id = %event_id, user_id = %user_id, success = success))]
    pub async fn complete_purchase(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        success: bool,
    ) -> Result<Decision<bool>> {
        let policy = self.policy(event_id).await?;
        let now = self.clock.now();
        let outcome = self.store.complete(event_id, user_id, policy, now).await?;

        let mut transitions = Vec::new();
        if outcome.held {
            let status = if success {
                EntryStatus::Completed
            } else {
                EntryStatus::Abandoned
            };
            transitions.push(transition(event_id, user_id, status, None, now));
            metrics::counter!("purchase_queue_departures_total", "status" => status.as_str())
                .increment(1);
        } else {
            tracing::debug!("Completion for a buyer without a live slot");
        }

        Ok(Decision {
            value: outcome.held,
            transitions: with_housekeeping(event_id, outcome.housekeeping, transitions, now),
        })
    }

    /// Reclaim lapsed slots and promote waiters, never exceeding
    /// `max_concurrent` (nor the configured limit, whichever is lower).
    ///
    /// Safe to call redundantly: each promotion is an atomic slot grant.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidArgument`] if `max_concurrent` is 0, or
    /// [`QueueError::StoreUnavailable`] if the fast store cannot be reached.
    #[tracing::instrument(skip_all, fields(event_id = %event_id, max_concurrent = max_concurrent))]
    pub async fn process_queue(
        &self,
        event_id: &EventId,
        max_concurrent: u32,
    ) -> Result<Decision<ProcessOutcome>> {
        if max_concurrent == 0 {
            return Err(QueueError::InvalidArgument(
                "maxConcurrent must be at least 1".into(),
            ));
        }
        let policy = self.policy(event_id).await?.with_ceiling(max_concurrent);
        let now = self.clock.now();
        let housekeeping = self.store.process(event_id, policy, now).await?;

        let value = ProcessOutcome {
            processed: housekeeping.promoted.len(),
            new_active_users: housekeeping.promoted.clone(),
            expired_users: housekeeping.expired.clone(),
            timed_out_users: housekeeping.timed_out.clone(),
        };
        if !housekeeping.is_empty() {
            tracing::info!(
                promoted = value.processed,
                expired = value.expired_users.len(),
                timed_out = value.timed_out_users.len(),
                "Processed queue"
            );
        }

        Ok(Decision {
            value,
            transitions: with_housekeeping(event_id, housekeeping, Vec::new(), now),
        })
    }

    /// Read-only status, personalised when `user_id` is given.
    ///
    /// When the event has no config or its queue is disabled, any buyer may
    /// enter directly.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the fast store cannot be reached.
    #[tracing::instrument(skip_all, fields(event_id = %event_id))]
    pub async fn get_status(
        &self,
        event_id: &EventId,
        user_id: Option<&UserId>,
    ) -> Result<QueueStatus> {
        let config = self.configs.load_config(event_id).await?;
        let view = self.store.status(event_id, user_id, self.clock.now()).await?;

        let mut status = QueueStatus {
            queue_length: view.queue_length,
            active_buyers: view.active_buyers,
            can_enter: None,
            position: None,
            estimated_wait_seconds: None,
        };
        let Some(standing) = view.user else {
            return Ok(status);
        };

        let gated = config.as_ref().is_some_and(|c| c.queue_enabled);
        let position = match standing {
            UserStanding::Waiting { position } if gated => {
                QueuePosition::waiting(position, self.avg_seconds_per_buyer)
            }
            UserStanding::Absent if gated => QueuePosition {
                position: 0,
                can_enter: false,
                estimated_wait_seconds: 0,
            },
            _ => QueuePosition::admitted(),
        };
        status.can_enter = Some(position.can_enter);
        status.position = Some(position.position);
        status.estimated_wait_seconds = Some(position.estimated_wait_seconds);
        Ok(status)
    }

    async fn policy(&self, event_id: &EventId) -> Result<AdmissionPolicy> {
        let config: Option<QueueConfig> = self.configs.load_config(event_id).await?;
        Ok(AdmissionPolicy::from_config(config.as_ref()))
    }
}

fn transition(
    event_id: &EventId,
    user_id: &UserId,
    status: EntryStatus,
    position: Option<u64>,
    at: DateTime<Utc>,
) -> AuditTransition {
    AuditTransition {
        event_id: event_id.clone(),
        user_id: user_id.clone(),
        status,
        position,
        at,
    }
}

/// Housekeeping happens before the operation's own change and promotion
/// after it; the transition list keeps that order.
fn with_housekeeping(
    event_id: &EventId,
    housekeeping: Housekeeping,
    own: Vec<AuditTransition>,
    at: DateTime<Utc>,
) -> Vec<AuditTransition> {
    let Housekeeping {
        expired,
        timed_out,
        promoted,
    } = housekeeping;

    if !expired.is_empty() {
        metrics::counter!("purchase_queue_slots_expired_total")
            .increment(u64::try_from(expired.len()).unwrap_or(u64::MAX));
    }
    if !timed_out.is_empty() {
        metrics::counter!("purchase_queue_waiters_timed_out_total")
            .increment(u64::try_from(timed_out.len()).unwrap_or(u64::MAX));
    }
    if !promoted.is_empty() {
        metrics::counter!("purchase_queue_admissions_total", "path" => "promotion")
            .increment(u64::try_from(promoted.len()).unwrap_or(u64::MAX));
    }

    let lapsed = expired
        .into_iter()
        .chain(timed_out)
        .map(|user| transition(event_id, &user, EntryStatus::Expired, None, at));
    let admitted = promoted
        .into_iter()
        .map(|user| transition(event_id, &user, EntryStatus::Active, None, at));
    lapsed.chain(own).chain(admitted).collect()
}
