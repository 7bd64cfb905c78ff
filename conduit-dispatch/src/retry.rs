//! Retry backoff policy.
//!
//! Failed deliveries re-enter the queue after an exponentially growing
//! delay: `base_delay * 2^retry_count`, clamped to `max_delay`. The retry
//! ceiling itself lives on the event (`max_retries`); this policy only
//! shapes the delays between attempts.

use std::time::Duration;

/// Configuration for retry backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,

    /// Ceiling on the delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with short delays, for latency-sensitive buses and tests.
    pub fn fast() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(250),
        }
    }

    /// Policy with longer delays, for consumers backed by external services.
    pub fn slow() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(120),
        }
    }

    /// Backoff delay before re-enqueueing an event with this retry count.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        // The exponent is capped; the max_delay clamp dominates long before
        // it is reached.
        let exponent = retry_count.min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(4), Duration::from_secs(1));
        assert_eq!(policy.backoff(30), Duration::from_secs(1));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
