//! # Conduit Dispatch
//!
//! This crate provides the dispatch engine for the Conduit event bus: a
//! bounded queue, a fixed pool of worker loops, priority-grouped concurrent
//! fan-out, and retry with exponential backoff.
//!
//! ## Overview
//!
//! The conduit-dispatch crate handles:
//! - **Publishing**: Bounded queue with explicit blocking backpressure
//! - **Fan-out**: Matching subscriptions computed at dequeue time,
//!   delivered in priority groups under per-subscription concurrency
//!   ceilings and deadlines
//! - **Retry**: Failed deliveries re-enqueue the event through the same
//!   bounded queue after exponential backoff, until the event's retry
//!   budget is spent
//! - **Statistics**: Queue depth, delivery counters, and pending retries
//!
//! Delivery failures never propagate to the publisher, which has already
//! returned by the time they happen; they are retried per policy and, if
//! unrecoverable, recorded in statistics and logs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use conduit_dispatch::{Consumer, Dispatcher, Event, Outcome, SubscribeOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct WebhookSender;
//!
//! #[async_trait]
//! impl Consumer for WebhookSender {
//!     async fn consume(&self, event: Event) -> Outcome {
//!         // POST the event somewhere; transient failures are Retryable
//!         let _ = event;
//!         Outcome::Success
//!     }
//! }
//!
//! async fn example() {
//!     let dispatcher = Dispatcher::new();
//!
//!     dispatcher
//!         .subscribe(
//!             SubscribeOptions::new("document.*")
//!                 .with_filter(json!({"data.confidence": {"gte": 0.9}})),
//!             Arc::new(WebhookSender),
//!         )
//!         .await
//!         .unwrap();
//!
//!     let mut data = serde_json::Map::new();
//!     data.insert("confidence".to_string(), json!(0.92));
//!     let event = Event::new("document.processing.completed", "verity", data);
//!
//!     dispatcher.publish(event).await.unwrap();
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod retry;

// Re-export main types
pub use config::DispatcherConfig;
pub use dispatcher::{DispatchError, DispatchResult, Dispatcher, DispatcherStats};
pub use retry::RetryPolicy;

// Core types consumers need alongside the dispatcher
pub use conduit_core::{Consumer, Event, EventPriority, Outcome, SubscribeOptions};
