//! Dispatch engine
//!
//! This module provides the bounded-queue dispatcher that fans events out
//! to matching subscriptions: a fixed pool of worker loops pulls events
//! from a shared queue, computes the matching subscriptions at dequeue
//! time, delivers in priority groups under per-subscription concurrency
//! ceilings and deadlines, and re-enqueues failed events with exponential
//! backoff.

use crate::config::DispatcherConfig;
use conduit_core::pattern::PatternError;
use conduit_core::registry::SubscriptionRegistry;
use conduit_core::subscription::{Consumer, Outcome, SubscribeOptions, Subscription};
use conduit_core::Event;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Dispatch error types.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Queue is full and the publish deadline elapsed
    #[error("Event queue is full")]
    QueueFull,

    /// Dispatcher has been shut down
    #[error("Event queue is closed")]
    QueueClosed,

    /// Delivery exceeded the subscription's deadline
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Consumer reported a failure
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Event used up its retry budget
    #[error("Retries exhausted after {attempts} attempts")]
    RetryExhausted {
        /// Total delivery attempts made
        attempts: u32,
    },

    /// Subscription pattern failed to compile
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Dispatcher statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    /// Registered subscriptions, active and paused
    pub total_subscriptions: usize,
    /// Active (unpaused) subscriptions
    pub active_subscriptions: usize,
    /// Events currently queued or being enqueued
    pub queue_depth: usize,
    /// Size of the worker pool
    pub worker_count: usize,
    /// Events accepted by publish
    pub events_published: u64,
    /// Successful deliveries (one event to two subscribers counts twice)
    pub events_delivered: u64,
    /// Events re-enqueued by the retry policy
    pub events_retried: u64,
    /// Events dropped after retry exhaustion, fatal outcomes with no retry
    /// path, or shutdown
    pub events_dropped: u64,
    /// Failed delivery attempts (timeouts included)
    pub delivery_failures: u64,
    /// Retries sleeping out their backoff before re-enqueue
    pub retries_pending: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_published: AtomicU64,
    events_delivered: AtomicU64,
    events_retried: AtomicU64,
    events_dropped: AtomicU64,
    delivery_failures: AtomicU64,
    retries_pending: AtomicU64,
    queue_depth: AtomicUsize,
}

/// State shared between the dispatcher handle, workers, and retry tasks.
struct Shared {
    registry: SubscriptionRegistry,
    counters: Counters,
    config: DispatcherConfig,
    queue_tx: mpsc::Sender<Event>,
    running: AtomicBool,
}

/// The Conduit dispatch engine.
///
/// Owns the bounded event queue and a fixed pool of worker loops. Workers
/// are spawned at construction, so a `Dispatcher` must be created inside a
/// tokio runtime.
pub struct Dispatcher {
    shared: Arc<Shared>,
    queue_rx: Arc<Mutex<mpsc::Receiver<Event>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue_capacity", &self.shared.config.queue_capacity)
            .field("worker_count", &self.shared.config.worker_count)
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    /// Create a dispatcher with a custom configuration.
    pub fn with_config(config: DispatcherConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared {
            registry: SubscriptionRegistry::new(),
            counters: Counters::default(),
            config,
            queue_tx,
            running: AtomicBool::new(true),
        });
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut workers = Vec::with_capacity(shared.config.worker_count);
        for worker_id in 0..shared.config.worker_count {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                shared.clone(),
                queue_rx.clone(),
            )));
        }

        Self {
            shared,
            queue_rx,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue an event for dispatch.
    ///
    /// Blocks while the queue is full (backpressure) unless the
    /// configuration sets a publish deadline, in which case a sustained-full
    /// queue surfaces as [`DispatchError::QueueFull`]. Returns the event id;
    /// delivery failures never propagate back to the publisher.
    pub async fn publish(&self, event: Event) -> DispatchResult<Uuid> {
        if !self.shared.running.load(Ordering::Relaxed) {
            return Err(DispatchError::QueueClosed);
        }
        debug_assert!(!event.name.is_empty(), "event name must be non-empty");

        let id = event.id;
        let name = event.name.clone();
        self.shared.counters.queue_depth.fetch_add(1, Ordering::Relaxed);

        let sent = match self.shared.config.publish_timeout {
            Some(deadline) => self
                .shared
                .queue_tx
                .send_timeout(event, deadline)
                .await
                .map_err(|err| match err {
                    mpsc::error::SendTimeoutError::Timeout(_) => DispatchError::QueueFull,
                    mpsc::error::SendTimeoutError::Closed(_) => DispatchError::QueueClosed,
                }),
            None => self
                .shared
                .queue_tx
                .send(event)
                .await
                .map_err(|_| DispatchError::QueueClosed),
        };

        if let Err(err) = sent {
            self.shared.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(err);
        }

        self.shared.counters.events_published.fetch_add(1, Ordering::Relaxed);
        debug!(event = %name, event_id = %id, "Event published");
        Ok(id)
    }

    /// Enqueue an event without blocking.
    ///
    /// Returns [`DispatchError::QueueFull`] immediately when the queue is
    /// at capacity.
    pub fn try_publish(&self, event: Event) -> DispatchResult<Uuid> {
        if !self.shared.running.load(Ordering::Relaxed) {
            return Err(DispatchError::QueueClosed);
        }

        let id = event.id;
        self.shared.counters.queue_depth.fetch_add(1, Ordering::Relaxed);
        match self.shared.queue_tx.try_send(event) {
            Ok(()) => {
                self.shared.counters.events_published.fetch_add(1, Ordering::Relaxed);
                Ok(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
                Err(DispatchError::QueueClosed)
            }
        }
    }

    /// Enqueue a batch of events.
    ///
    /// Events are enqueued in argument order, but no cross-event delivery
    /// order is guaranteed once workers pick them up.
    pub async fn publish_batch(&self, events: Vec<Event>) -> DispatchResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            ids.push(self.publish(event).await?);
        }
        Ok(ids)
    }

    /// Register a subscription. Delegates to the registry.
    pub async fn subscribe(
        &self,
        options: SubscribeOptions,
        consumer: Arc<dyn Consumer>,
    ) -> DispatchResult<Uuid> {
        Ok(self.shared.registry.subscribe(options, consumer).await?)
    }

    /// Remove a subscription. Returns false for unknown ids.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        self.shared.registry.unsubscribe(id).await
    }

    /// Pause a subscription. Returns false for unknown ids.
    pub async fn pause(&self, id: Uuid) -> bool {
        self.shared.registry.pause(id).await
    }

    /// Resume a paused subscription. Returns false for unknown ids.
    pub async fn resume(&self, id: Uuid) -> bool {
        self.shared.registry.resume(id).await
    }

    /// The underlying subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.shared.registry
    }

    /// Snapshot of dispatcher statistics.
    pub async fn get_statistics(&self) -> DispatcherStats {
        let counters = &self.shared.counters;
        DispatcherStats {
            total_subscriptions: self.shared.registry.len().await,
            active_subscriptions: self.shared.registry.active_count().await,
            queue_depth: counters.queue_depth.load(Ordering::Relaxed),
            worker_count: self.shared.config.worker_count,
            events_published: counters.events_published.load(Ordering::Relaxed),
            events_delivered: counters.events_delivered.load(Ordering::Relaxed),
            events_retried: counters.events_retried.load(Ordering::Relaxed),
            events_dropped: counters.events_dropped.load(Ordering::Relaxed),
            delivery_failures: counters.delivery_failures.load(Ordering::Relaxed),
            retries_pending: counters.retries_pending.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events and wait for the workers to finish.
    ///
    /// Events already dequeued run to completion; events still queued are
    /// dropped and counted. Publishing afterwards returns
    /// [`DispatchError::QueueClosed`].
    pub async fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Relaxed);

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(err) = handle.await {
                error!(error = %err, "Dispatch worker panicked");
            }
        }

        // Drain whatever the workers left behind.
        let mut queue_rx = self.queue_rx.lock().await;
        while let Ok(event) = queue_rx.try_recv() {
            self.shared.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
            self.shared.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(event = %event.name, event_id = %event.id, "Dropping queued event at shutdown");
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// How often an idle worker re-checks the running flag.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(200);

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    queue_rx: Arc<Mutex<mpsc::Receiver<Event>>>,
) {
    debug!(worker_id, "Dispatch worker started");
    loop {
        // The lock is held only while waiting for one event; processing
        // happens outside it so workers fan out across events.
        let received = {
            let mut queue_rx = queue_rx.lock().await;
            timeout(WORKER_POLL_INTERVAL, queue_rx.recv()).await
        };

        match received {
            Ok(Some(event)) => {
                shared.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
                if !shared.running.load(Ordering::Relaxed) {
                    shared.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(event = %event.name, event_id = %event.id, "Dropping queued event at shutdown");
                    continue;
                }
                process_event(&shared, event).await;
            }
            Ok(None) => break,
            Err(_) => {
                if !shared.running.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }
    debug!(worker_id, "Dispatch worker stopped");
}

/// Result of one delivery attempt, from the dispatcher's point of view.
enum DeliveryVerdict {
    Delivered,
    Failed { wants_retry: bool },
}

/// Fan one event out to its matching subscriptions.
async fn process_event(shared: &Arc<Shared>, event: Event) {
    let matching = shared.registry.find_matching(&event).await;
    if matching.is_empty() {
        debug!(event = %event.name, "No matching subscriptions");
        return;
    }

    let mut any_failure = false;
    let mut wants_retry = false;

    // Deliveries within a priority group run concurrently and are awaited
    // together before the next group starts, so higher-priority
    // subscriptions always see the event first.
    for group in priority_groups(matching) {
        let mut deliveries = JoinSet::new();
        for subscription in group {
            deliveries.spawn(deliver(shared.clone(), subscription, event.clone()));
        }
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(DeliveryVerdict::Delivered) => {}
                Ok(DeliveryVerdict::Failed { wants_retry: retry }) => {
                    any_failure = true;
                    wants_retry |= retry;
                }
                Err(err) => error!(error = %err, "Delivery task panicked"),
            }
        }
    }

    if wants_retry {
        schedule_retry(shared, event);
    } else if any_failure {
        shared.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            event = %event.name,
            event_id = %event.id,
            "Dropping event after failed delivery with no retry path"
        );
    }
}

/// Deliver one event to one subscription.
async fn deliver(
    shared: Arc<Shared>,
    subscription: Arc<Subscription>,
    event: Event,
) -> DeliveryVerdict {
    // One permit per delivery keeps this subscription at or below its
    // max_concurrent ceiling across all workers and events.
    let permit = match subscription.concurrency_limit().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return DeliveryVerdict::Failed { wants_retry: false },
    };

    let event_name = event.name.clone();
    let event_id = event.id;
    let outcome = timeout(subscription.timeout, subscription.consumer.consume(event)).await;
    drop(permit);

    match outcome {
        Ok(Outcome::Success) => {
            shared.counters.events_delivered.fetch_add(1, Ordering::Relaxed);
            debug!(event = %event_name, subscription = %subscription.name, "Delivered");
            DeliveryVerdict::Delivered
        }
        Ok(Outcome::Retryable(reason)) => {
            shared.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                event = %event_name,
                event_id = %event_id,
                subscription = %subscription.name,
                error = %DispatchError::Delivery(reason),
                "Delivery failed"
            );
            DeliveryVerdict::Failed {
                wants_retry: subscription.retry_enabled,
            }
        }
        Ok(Outcome::Fatal(reason)) => {
            shared.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                event = %event_name,
                event_id = %event_id,
                subscription = %subscription.name,
                error = %DispatchError::Delivery(reason),
                "Delivery failed fatally, not retrying"
            );
            DeliveryVerdict::Failed { wants_retry: false }
        }
        Err(_) => {
            shared.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                event = %event_name,
                event_id = %event_id,
                subscription = %subscription.name,
                error = %DispatchError::Timeout(subscription.timeout),
                "Delivery timed out, callback abandoned"
            );
            DeliveryVerdict::Failed {
                wants_retry: subscription.retry_enabled,
            }
        }
    }
}

/// Re-enqueue a failed event after backoff, or drop it once the retry
/// budget is spent.
fn schedule_retry(shared: &Arc<Shared>, event: Event) {
    if !event.can_retry() {
        shared.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
        error!(
            event = %event.name,
            event_id = %event.id,
            error = %DispatchError::RetryExhausted { attempts: event.retry_count + 1 },
            "Dropping event"
        );
        return;
    }

    let delay = shared.config.retry.backoff(event.retry_count);
    let successor = event.into_retry();
    shared.counters.retries_pending.fetch_add(1, Ordering::Relaxed);
    debug!(
        event = %successor.name,
        event_id = %successor.id,
        retry_count = successor.retry_count,
        delay_ms = delay.as_millis() as u64,
        "Scheduling retry"
    );

    // The requeue goes through the same bounded queue as first-time
    // publishes, so backoff stays observable and subject to backpressure.
    let shared = shared.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        shared.counters.retries_pending.fetch_sub(1, Ordering::Relaxed);

        if !shared.running.load(Ordering::Relaxed) {
            shared.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        shared.counters.queue_depth.fetch_add(1, Ordering::Relaxed);
        match shared.queue_tx.send(successor).await {
            Ok(()) => {
                shared.counters.events_retried.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                shared.counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
                shared.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}

/// Split a priority-ordered subscription list into runs of equal priority.
fn priority_groups(matching: Vec<Arc<Subscription>>) -> Vec<Vec<Arc<Subscription>>> {
    let mut groups: Vec<Vec<Arc<Subscription>>> = Vec::new();
    for subscription in matching {
        match groups.last_mut() {
            Some(group) if group[0].priority == subscription.priority => group.push(subscription),
            _ => groups.push(vec![subscription]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_core::EventPriority;
    use std::sync::atomic::AtomicU32;

    struct Counting {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Consumer for Counting {
        async fn consume(&self, _event: Event) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Outcome::Success
        }
    }

    fn event(name: &str) -> Event {
        Event::new(name, "test", serde_json::Map::new())
    }

    #[tokio::test]
    async fn test_initial_statistics() {
        let dispatcher = Dispatcher::new();
        let stats = dispatcher.get_statistics().await;
        assert_eq!(stats.total_subscriptions, 0);
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.worker_count, 5);
        assert_eq!(stats.events_published, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_returns_event_id() {
        let dispatcher = Dispatcher::new();
        let e = event("document.created");
        let expected = e.id;
        let id = dispatcher.publish(e).await.unwrap();
        assert_eq!(id, expected);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_after_shutdown() {
        let dispatcher = Dispatcher::new();
        dispatcher.shutdown().await;
        let result = dispatcher.publish(event("document.created")).await;
        assert!(matches!(result, Err(DispatchError::QueueClosed)));
        let result = dispatcher.try_publish(event("document.created"));
        assert!(matches!(result, Err(DispatchError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_subscribe_delegates_to_registry() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicU32::new(0));
        let id = dispatcher
            .subscribe(
                SubscribeOptions::new("document.*"),
                Arc::new(Counting { calls: calls.clone() }),
            )
            .await
            .unwrap();

        assert_eq!(dispatcher.get_statistics().await.total_subscriptions, 1);
        assert!(dispatcher.pause(id).await);
        assert_eq!(dispatcher.get_statistics().await.active_subscriptions, 0);
        assert!(dispatcher.resume(id).await);
        assert!(dispatcher.unsubscribe(id).await);
        assert!(!dispatcher.unsubscribe(id).await);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_pattern_surfaces() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicU32::new(0));
        let result = dispatcher
            .subscribe(SubscribeOptions::new(""), Arc::new(Counting { calls }))
            .await;
        assert!(matches!(result, Err(DispatchError::Pattern(_))));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_priority_groups_partitioning() {
        let registry = SubscriptionRegistry::new();
        for (name, priority) in [
            ("c1", EventPriority::Critical),
            ("c2", EventPriority::Critical),
            ("n1", EventPriority::Normal),
            ("l1", EventPriority::Low),
        ] {
            registry
                .subscribe(
                    SubscribeOptions::new("a.*").with_name(name).with_priority(priority),
                    Arc::new(Counting { calls: Arc::new(AtomicU32::new(0)) }),
                )
                .await
                .unwrap();
        }

        let matching = registry.find_matching(&event("a.b")).await;
        let groups = priority_groups(matching);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, [2, 1, 1]);
        assert_eq!(groups[0][0].priority, EventPriority::Critical);
        assert_eq!(groups[2][0].priority, EventPriority::Low);
    }
}
