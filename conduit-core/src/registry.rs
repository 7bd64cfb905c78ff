//! Subscription registry
//!
//! Owns every subscription and answers "who receives this event" for the
//! dispatcher. Reads and writes happen concurrently from dispatch workers
//! and application threads; subscriptions are handed out as `Arc` snapshots
//! so a reader never observes a partially constructed record.

use crate::event::Event;
use crate::filter::FilterEngine;
use crate::pattern::{PatternError, TopicPattern};
use crate::subscription::{Consumer, SubscribeOptions, Subscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Registry of active and paused subscriptions.
pub struct SubscriptionRegistry {
    /// Subscriptions indexed by id
    subscriptions: RwLock<HashMap<Uuid, Arc<Subscription>>>,

    /// Insertion counter, used to break priority ties deterministically
    next_seq: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a subscription.
    ///
    /// Always succeeds for a compilable pattern; duplicate patterns are
    /// allowed and get independent ids.
    pub async fn subscribe(
        &self,
        options: SubscribeOptions,
        consumer: Arc<dyn Consumer>,
    ) -> Result<Uuid, PatternError> {
        let pattern = TopicPattern::compile(&options.pattern)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription::new(options, pattern, consumer, seq));
        let id = subscription.id;

        debug!(
            subscription = %subscription.name,
            pattern = %subscription.pattern,
            priority = ?subscription.priority,
            "Subscription registered"
        );

        self.subscriptions.write().await.insert(id, subscription);
        Ok(id)
    }

    /// Remove a subscription. Returns false for unknown ids.
    ///
    /// Takes effect for future dequeues only; in-flight deliveries run to
    /// completion or their own timeout.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.subscriptions.write().await.remove(&id);
        if let Some(subscription) = &removed {
            debug!(subscription = %subscription.name, "Subscription removed");
        }
        removed.is_some()
    }

    /// Pause a subscription without removing it. Returns false for unknown ids.
    pub async fn pause(&self, id: Uuid) -> bool {
        match self.subscriptions.read().await.get(&id) {
            Some(subscription) => {
                subscription.pause();
                debug!(subscription = %subscription.name, "Subscription paused");
                true
            }
            None => false,
        }
    }

    /// Resume a paused subscription. Returns false for unknown ids.
    pub async fn resume(&self, id: Uuid) -> bool {
        match self.subscriptions.read().await.get(&id) {
            Some(subscription) => {
                subscription.resume();
                debug!(subscription = %subscription.name, "Subscription resumed");
                true
            }
            None => false,
        }
    }

    /// Active subscriptions receiving this event, in delivery order.
    ///
    /// A subscription qualifies when it is active, its pattern matches the
    /// event name, and its filter (if any) passes. Results are ordered by
    /// priority (Critical first), then insertion order.
    pub async fn find_matching(&self, event: &Event) -> Vec<Arc<Subscription>> {
        let mut matching: Vec<Arc<Subscription>> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .values()
                .filter(|s| s.is_active() && s.pattern.matches(&event.name))
                .filter(|s| match &s.filter {
                    Some(condition) => FilterEngine::matches(event, condition),
                    None => true,
                })
                .cloned()
                .collect()
        };

        matching.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        matching
    }

    /// Total number of registered subscriptions (active and paused).
    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }

    /// Number of active (unpaused) subscriptions.
    pub async fn active_count(&self) -> usize {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.is_active())
            .count()
    }

    /// Snapshot of all subscriptions, in insertion order.
    pub async fn list(&self) -> Vec<Arc<Subscription>> {
        let mut all: Vec<Arc<Subscription>> =
            self.subscriptions.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.seq);
        all
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPriority;
    use crate::subscription::Outcome;
    use async_trait::async_trait;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl Consumer for Noop {
        async fn consume(&self, _event: Event) -> Outcome {
            Outcome::Success
        }
    }

    fn consumer() -> Arc<dyn Consumer> {
        Arc::new(Noop)
    }

    fn event(name: &str) -> Event {
        Event::new(name, "test", serde_json::Map::new())
    }

    #[tokio::test]
    async fn test_subscribe_and_find() {
        let registry = SubscriptionRegistry::new();
        registry
            .subscribe(SubscribeOptions::new("document.*"), consumer())
            .await
            .unwrap();

        let matching = registry.find_matching(&event("document.created")).await;
        assert_eq!(matching.len(), 1);

        let matching = registry.find_matching(&event("billing.invoice.paid")).await;
        assert!(matching.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_patterns_get_independent_ids() {
        let registry = SubscriptionRegistry::new();
        let a = registry
            .subscribe(SubscribeOptions::new("document.*"), consumer())
            .await
            .unwrap();
        let b = registry
            .subscribe(SubscribeOptions::new("document.*"), consumer())
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);
        assert_eq!(
            registry.find_matching(&event("document.created")).await.len(),
            2
        );
    }

    #[tokio::test]
    async fn test_bad_pattern_rejected() {
        let registry = SubscriptionRegistry::new();
        let result = registry
            .subscribe(SubscribeOptions::new(""), consumer())
            .await;
        assert!(result.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let id = registry
            .subscribe(SubscribeOptions::new("document.*"), consumer())
            .await
            .unwrap();

        assert!(registry.unsubscribe(id).await);
        assert!(!registry.unsubscribe(id).await);
        assert!(registry.find_matching(&event("document.created")).await.is_empty());
    }

    #[tokio::test]
    async fn test_pause_resume() {
        let registry = SubscriptionRegistry::new();
        let id = registry
            .subscribe(SubscribeOptions::new("document.*"), consumer())
            .await
            .unwrap();

        assert!(registry.pause(id).await);
        assert!(registry.find_matching(&event("document.created")).await.is_empty());
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(registry.len().await, 1);

        assert!(registry.resume(id).await);
        assert_eq!(registry.find_matching(&event("document.created")).await.len(), 1);

        assert!(!registry.pause(Uuid::now_v7()).await);
    }

    #[tokio::test]
    async fn test_priority_then_insertion_order() {
        let registry = SubscriptionRegistry::new();
        registry
            .subscribe(
                SubscribeOptions::new("billing.*").with_name("normal-first"),
                consumer(),
            )
            .await
            .unwrap();
        registry
            .subscribe(
                SubscribeOptions::new("billing.*")
                    .with_name("critical")
                    .with_priority(EventPriority::Critical),
                consumer(),
            )
            .await
            .unwrap();
        registry
            .subscribe(
                SubscribeOptions::new("billing.*").with_name("normal-second"),
                consumer(),
            )
            .await
            .unwrap();
        registry
            .subscribe(
                SubscribeOptions::new("billing.*")
                    .with_name("low")
                    .with_priority(EventPriority::Low),
                consumer(),
            )
            .await
            .unwrap();

        let names: Vec<String> = registry
            .find_matching(&event("billing.invoice.paid"))
            .await
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(names, ["critical", "normal-first", "normal-second", "low"]);
    }

    #[tokio::test]
    async fn test_filter_applied_during_matching() {
        let registry = SubscriptionRegistry::new();
        registry
            .subscribe(
                SubscribeOptions::new("document.*")
                    .with_filter(json!({"data.confidence": {"gte": 0.9}})),
                consumer(),
            )
            .await
            .unwrap();

        let mut data = serde_json::Map::new();
        data.insert("confidence".to_string(), json!(0.92));
        let passing = Event::new("document.processing.completed", "verity", data);
        assert_eq!(registry.find_matching(&passing).await.len(), 1);

        let mut data = serde_json::Map::new();
        data.insert("confidence".to_string(), json!(0.5));
        let failing = Event::new("document.processing.completed", "verity", data);
        assert!(registry.find_matching(&failing).await.is_empty());
    }
}
