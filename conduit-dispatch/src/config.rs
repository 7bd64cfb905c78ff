//! Dispatcher configuration.

use crate::retry::RetryPolicy;
use std::time::Duration;
use tracing::warn;

/// Configuration for the dispatch engine.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Bounded queue capacity. Publishers block once this is reached.
    pub queue_capacity: usize,

    /// Number of worker loops pulling from the queue.
    pub worker_count: usize,

    /// When set, `publish` gives up with `QueueFull` after waiting this
    /// long on a full queue instead of blocking indefinitely.
    pub publish_timeout: Option<Duration>,

    /// Backoff shape for retried events.
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            worker_count: 5,
            publish_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    /// Build a configuration from environment overrides.
    ///
    /// Reads `CONDUIT_QUEUE_CAPACITY`, `CONDUIT_WORKER_COUNT`,
    /// `CONDUIT_RETRY_BASE_MS` and `CONDUIT_RETRY_MAX_BACKOFF_MS`.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(capacity) = parse_env::<usize>("CONDUIT_QUEUE_CAPACITY") {
            config.queue_capacity = capacity.max(1);
        }
        if let Some(workers) = parse_env::<usize>("CONDUIT_WORKER_COUNT") {
            config.worker_count = workers.max(1);
        }
        if let Some(base_ms) = parse_env::<u64>("CONDUIT_RETRY_BASE_MS") {
            config.retry.base_delay = Duration::from_millis(base_ms);
        }
        if let Some(max_ms) = parse_env::<u64>("CONDUIT_RETRY_MAX_BACKOFF_MS") {
            config.retry.max_delay = Duration::from_millis(max_ms);
        }
        config
    }

    /// Set the queue capacity. Values below 1 are clamped to 1.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the worker count. Values below 1 are clamped to 1.
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    /// Set the publish deadline for full-queue backpressure.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = Some(timeout);
        self
    }

    /// Set the retry backoff policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
