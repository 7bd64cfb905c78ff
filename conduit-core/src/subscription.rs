//! Subscriptions and the consumer callback contract
//!
//! A subscription registers interest in events matching a topic pattern,
//! with an optional declarative filter and per-subscription delivery policy
//! (priority, concurrency ceiling, timeout, retry eligibility).

use crate::event::{Event, EventPriority};
use crate::pattern::TopicPattern;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The consumer processed the event.
    Success,
    /// The consumer failed transiently; the event is eligible for retry.
    Retryable(String),
    /// The consumer failed permanently; the event is dropped without retry.
    Fatal(String),
}

/// Callback contract implemented by event consumers.
///
/// Webhook dispatchers, notification senders, and analytics trackers all
/// implement this single capability interface instead of relying on ad hoc
/// exception or return conventions.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Process one event.
    async fn consume(&self, event: Event) -> Outcome;
}

/// Options for creating a subscription.
///
/// All fields except the pattern have defaults; use the `with_*` methods to
/// override them.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Topic pattern the subscription listens on
    pub pattern: String,

    /// Human-readable name; defaults to the pattern string
    pub name: Option<String>,

    /// Optional declarative filter evaluated against each matching event
    pub filter: Option<Value>,

    /// Delivery priority relative to other subscriptions of the same event
    pub priority: EventPriority,

    /// System-wide ceiling on concurrent deliveries to this subscription
    pub max_concurrent: usize,

    /// Whether failed deliveries make the event eligible for retry
    pub retry_enabled: bool,

    /// Per-delivery deadline
    pub timeout: Duration,
}

impl SubscribeOptions {
    /// Default per-delivery deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default concurrency ceiling.
    pub const DEFAULT_MAX_CONCURRENT: usize = 10;

    /// Create options for a pattern with defaults for everything else.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            name: None,
            filter: None,
            priority: EventPriority::Normal,
            max_concurrent: Self::DEFAULT_MAX_CONCURRENT,
            retry_enabled: true,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Set the subscription name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the filter condition.
    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the delivery priority.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the concurrency ceiling. Values below 1 are clamped to 1.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Enable or disable retries for this subscription.
    pub fn with_retry_enabled(mut self, retry_enabled: bool) -> Self {
        self.retry_enabled = retry_enabled;
        self
    }

    /// Set the per-delivery deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A registered subscription.
///
/// Owned exclusively by the registry and handed out as `Arc` snapshots.
/// Immutable after creation except for the `active` flag, which pause and
/// resume toggle atomically.
pub struct Subscription {
    /// Subscription ID
    pub id: Uuid,

    /// Human-readable name
    pub name: String,

    /// Compiled topic pattern
    pub pattern: TopicPattern,

    /// Consumer callback
    pub consumer: Arc<dyn Consumer>,

    /// Optional declarative filter
    pub filter: Option<Value>,

    /// Delivery priority
    pub priority: EventPriority,

    /// System-wide concurrency ceiling (>= 1)
    pub max_concurrent: usize,

    /// Whether failed deliveries are eligible for retry
    pub retry_enabled: bool,

    /// Per-delivery deadline
    pub timeout: Duration,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Registry insertion order, used to break priority ties
    pub(crate) seq: u64,

    /// Paused subscriptions stay registered but receive nothing
    active: AtomicBool,

    /// Permits backing the concurrency ceiling, shared across all workers
    permits: Arc<Semaphore>,
}

impl Subscription {
    pub(crate) fn new(
        options: SubscribeOptions,
        pattern: TopicPattern,
        consumer: Arc<dyn Consumer>,
        seq: u64,
    ) -> Self {
        let max_concurrent = options.max_concurrent.max(1);
        Self {
            id: Uuid::now_v7(),
            name: options.name.unwrap_or_else(|| options.pattern.clone()),
            pattern,
            consumer,
            filter: options.filter,
            priority: options.priority,
            max_concurrent,
            retry_enabled: options.retry_enabled,
            timeout: options.timeout,
            created_at: Utc::now(),
            seq,
            active: AtomicBool::new(true),
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Whether this subscription currently receives events.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Pause delivery. Takes effect for future dequeues only.
    pub fn pause(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Resume delivery.
    pub fn resume(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// The semaphore backing this subscription's concurrency ceiling.
    ///
    /// Dispatch workers acquire one permit per delivery, so at most
    /// `max_concurrent` deliveries run at once across the whole process.
    pub fn concurrency_limit(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("priority", &self.priority)
            .field("max_concurrent", &self.max_concurrent)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Consumer for Noop {
        async fn consume(&self, _event: Event) -> Outcome {
            Outcome::Success
        }
    }

    fn subscription(options: SubscribeOptions) -> Subscription {
        let pattern = TopicPattern::compile(&options.pattern).unwrap();
        Subscription::new(options, pattern, Arc::new(Noop), 0)
    }

    #[test]
    fn test_defaults() {
        let sub = subscription(SubscribeOptions::new("document.*"));
        assert_eq!(sub.name, "document.*");
        assert_eq!(sub.priority, EventPriority::Normal);
        assert_eq!(sub.max_concurrent, SubscribeOptions::DEFAULT_MAX_CONCURRENT);
        assert!(sub.retry_enabled);
        assert!(sub.is_active());
    }

    #[test]
    fn test_max_concurrent_clamped() {
        let sub = subscription(SubscribeOptions::new("a.*").with_max_concurrent(0));
        assert_eq!(sub.max_concurrent, 1);
    }

    #[test]
    fn test_pause_resume() {
        let sub = subscription(SubscribeOptions::new("a.*"));
        sub.pause();
        assert!(!sub.is_active());
        sub.resume();
        assert!(sub.is_active());
    }
}
