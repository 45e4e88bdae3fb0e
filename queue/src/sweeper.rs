//! Periodic queue sweeper.
//!
//! Expired slots are otherwise only reclaimed when some request touches the
//! event. The sweeper runs `process_queue` for every configured, enabled
//! event on a fixed interval so lapsed reservations free up and waiters
//! advance even when traffic stops.

use crate::manager::QueueManager;
use purchase_queue_core::{EventId, ProcessOutcome, Result, UserId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome for one event in a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    /// The event swept.
    pub event_id: EventId,
    /// Buyers promoted.
    pub processed: usize,
    /// Buyers promoted into a slot.
    pub new_active_users: Vec<UserId>,
    /// Reservations reclaimed plus waiters timed out.
    pub expired: usize,
    /// Why the event could not be swept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SweepResult {
    fn succeeded(event_id: EventId, outcome: ProcessOutcome) -> Self {
        Self {
            event_id,
            processed: outcome.processed,
            expired: outcome.expired_users.len() + outcome.timed_out_users.len(),
            new_active_users: outcome.new_active_users,
            error: None,
        }
    }

    fn failed(event_id: EventId, error: impl ToString) -> Self {
        Self {
            event_id,
            processed: 0,
            new_active_users: Vec::new(),
            expired: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Totals of one sweep across events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Events that were swept successfully.
    pub processed_queues: usize,
    /// Promotions across all events.
    pub total_processed: usize,
    /// Reclaimed slots and timed-out waiters across all events.
    pub total_expired: usize,
    /// Per-event results, failures included.
    pub results: Vec<SweepResult>,
}

impl SweepReport {
    fn push(&mut self, result: SweepResult) {
        if result.error.is_none() {
            self.processed_queues += 1;
            self.total_processed += result.processed;
            self.total_expired += result.expired;
        }
        self.results.push(result);
    }
}

/// Runs `process_queue` across configured events.
pub struct QueueSweeper {
    manager: Arc<QueueManager>,
    interval: Duration,
}

impl QueueSweeper {
    /// Create a sweeper with the default interval.
    #[must_use]
    pub const fn new(manager: Arc<QueueManager>) -> Self {
        Self {
            manager,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Set the time between sweeps.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sweep every configured, enabled event once.
    ///
    /// A failing event is recorded in its result and does not stop the sweep.
    ///
    /// # Errors
    ///
    /// Returns an error only if the list of configured events cannot be read.
    #[tracing::instrument(skip_all)]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let events = self.manager.configured_events().await?;
        let mut report = SweepReport::default();

        for event_id in events {
            let config = match self.manager.load_config(&event_id).await {
                Ok(Some(config)) if config.queue_enabled => config,
                Ok(_) => continue,
                Err(error) => {
                    report.push(SweepResult::failed(event_id, error));
                    continue;
                }
            };
            let result = match self
                .manager
                .process_queue(&event_id, config.max_concurrent_buyers)
                .await
            {
                Ok(audited) => SweepResult::succeeded(event_id, audited.value),
                Err(error) => {
                    tracing::warn!(event_id = %event_id, error = %error, "Sweep failed for event");
                    SweepResult::failed(event_id, error)
                }
            };
            report.push(result);
        }

        metrics::counter!("purchase_queue_sweeps_total").increment(1);
        if report.total_processed > 0 || report.total_expired > 0 {
            tracing::info!(
                queues = report.processed_queues,
                promoted = report.total_processed,
                expired = report.total_expired,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep on every interval until `token` is cancelled.
    ///
    /// The first sweep runs immediately.
    #[must_use]
    pub fn start(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_ms = self.interval.as_millis(), "Queue sweeper started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = self.sweep_once().await {
                            tracing::warn!(error = %error, "Sweep could not list configured events");
                        }
                    }
                }
            }
            tracing::info!("Queue sweeper stopped");
        })
    }
}
