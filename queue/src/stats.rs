//! Real-time queue statistics.
//!
//! [`StatsPublisher::subscribe`] spawns one ticker task per subscriber. Each
//! tick reads a fresh [`QueueSnapshot`] and offers it to the subscriber's
//! bounded channel with `try_send`: a slow consumer loses ticks instead of
//! stalling the timer.
//!
//! The task is tied to the [`Subscription`] through a cancellation token.
//! Dropping the subscription (for example when an SSE client disconnects)
//! cancels the token and the task exits on its next poll. Every ticker token
//! is a child of the publisher's shutdown token, so cancelling that one ends
//! all open streams at once.

use crate::controller::AdmissionController;
use futures::Stream;
use purchase_queue_core::{
    EventId, QueueSnapshot, Result, environment::Clock, store::AdmissionStore,
};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Default time between snapshots.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(2);

/// Default per-subscriber channel capacity.
pub const DEFAULT_STREAM_BUFFER: usize = 8;

/// Periodic snapshot publisher.
#[derive(Clone)]
pub struct StatsPublisher {
    store: Arc<dyn AdmissionStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    buffer: usize,
    shutdown: CancellationToken,
}

impl StatsPublisher {
    /// Create a publisher with the default interval and buffer.
    #[must_use]
    pub fn new(store: Arc<dyn AdmissionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            interval: DEFAULT_STATS_INTERVAL,
            buffer: DEFAULT_STREAM_BUFFER,
            shutdown: CancellationToken::new(),
        }
    }

    /// Publisher reading through a controller's store and clock.
    #[must_use]
    pub fn from_controller(controller: &AdmissionController) -> Self {
        Self::new(controller.store().clone(), controller.clock().clone())
    }

    /// Set the tick interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the channel capacity (at least 1).
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// End every subscription when `shutdown` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Current counts for an event.
    ///
    /// # Errors
    ///
    /// Returns [`purchase_queue_core::QueueError::StoreUnavailable`] if the
    /// fast store cannot be reached.
    pub async fn snapshot(&self, event_id: &EventId) -> Result<QueueSnapshot> {
        let view = self.store.status(event_id, None, self.clock.now()).await?;
        Ok(view.snapshot())
    }

    /// Start streaming snapshots for an event.
    ///
    /// The first snapshot is emitted immediately. The stream ends once the
    /// shutdown token is cancelled. Must be called within a Tokio runtime.
    #[must_use]
    pub fn subscribe(&self, event_id: EventId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let token = self.shutdown.child_token();
        let task = Ticker {
            publisher: self.clone(),
            event_id,
            tx,
            token: token.clone(),
        };
        tokio::spawn(task.run());

        Subscription {
            inner: ReceiverStream::new(rx),
            _guard: token.drop_guard(),
        }
    }
}

struct Ticker {
    publisher: StatsPublisher,
    event_id: EventId,
    tx: mpsc::Sender<QueueSnapshot>,
    token: CancellationToken,
}

impl Ticker {
    async fn run(self) {
        metrics::gauge!("purchase_queue_stream_subscribers").increment(1.0);
        tracing::debug!(event_id = %self.event_id, "Stats subscriber connected");

        let mut ticker = tokio::time::interval(self.publisher.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.publish().await {
                        break;
                    }
                }
            }
        }

        metrics::gauge!("purchase_queue_stream_subscribers").decrement(1.0);
        tracing::debug!(event_id = %self.event_id, "Stats subscriber disconnected");
    }

    /// Returns `false` once the subscriber is gone.
    async fn publish(&self) -> bool {
        let snapshot = match self.publisher.snapshot(&self.event_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(event_id = %self.event_id, error = %error, "Failed to read queue snapshot");
                return true;
            }
        };
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics::counter!("purchase_queue_stream_dropped_ticks_total").increment(1);
                tracing::debug!(event_id = %self.event_id, "Subscriber lagging, tick dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// A live stream of snapshots. Dropping it stops the ticker.
pub struct Subscription {
    inner: ReceiverStream<QueueSnapshot>,
    _guard: DropGuard,
}

impl Stream for Subscription {
    type Item = QueueSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
