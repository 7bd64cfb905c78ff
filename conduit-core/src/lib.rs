//! # Conduit Core
//!
//! This crate provides the event model, topic routing, and pipeline engines
//! for the Conduit in-process event bus, decoupling producers of domain
//! occurrences (document processing, billing, security) from their
//! consumers.
//!
//! ## Overview
//!
//! The conduit-core crate handles:
//! - **Event Model**: Immutable event envelopes with priority, category,
//!   tenant/user context, and retry accounting
//! - **Topic Patterns**: Compiled dot-delimited patterns with `*` wildcards
//! - **Subscription Registry**: Concurrent add/remove/pause/query with
//!   priority-ordered matching
//! - **Filter Engine**: Declarative conditions evaluated against events
//! - **Transform / Enrichment / Aggregation Engines**: Copy-on-write event
//!   shaping, pluggable lookups, and sequence summaries
//!
//! The dispatch engine (bounded queue, worker pool, retry with backoff)
//! lives in the `conduit-dispatch` crate and composes everything here.
//!
//! ## Usage
//!
//! ### Matching and filtering
//!
//! ```rust
//! use conduit_core::{Event, FilterEngine, TopicPattern};
//! use serde_json::json;
//!
//! let pattern = TopicPattern::compile("document.*").unwrap();
//! assert!(pattern.matches("document.processing.completed"));
//!
//! let mut data = serde_json::Map::new();
//! data.insert("confidence".to_string(), json!(0.92));
//! let event = Event::new("document.processing.completed", "verity", data);
//!
//! assert!(FilterEngine::matches(
//!     &event,
//!     &json!({"data.confidence": {"gte": 0.9}})
//! ));
//! ```
//!
//! ### Consumers
//!
//! ```rust
//! use conduit_core::{Consumer, Event, Outcome};
//! use async_trait::async_trait;
//!
//! struct AnalyticsTracker;
//!
//! #[async_trait]
//! impl Consumer for AnalyticsTracker {
//!     async fn consume(&self, event: Event) -> Outcome {
//!         // record the event somewhere
//!         let _ = event;
//!         Outcome::Success
//!     }
//! }
//! ```
//!
//! ## Topic Patterns
//!
//! Patterns are dot-delimited with `*` matching any sequence of characters,
//! including across segment boundaries:
//! - `document.created` - specific event only
//! - `document.*` - `document.x` and `document.processing.completed`
//! - `*.invoice.*` - invoice events from any source
//!
//! This is deliberately looser than AMQP-style per-segment wildcards; see
//! [`pattern`] for the exact semantics.

pub mod aggregate;
pub mod enrich;
pub mod event;
pub mod filter;
pub mod pattern;
pub mod registry;
pub mod subscription;

pub mod transform;

// Re-export main types
pub use aggregate::{AggregateOp, AggregationEngine, AggregationRule};
pub use enrich::{EnrichError, EnrichmentEngine, LookupProvider};
pub use event::{Event, EventCategory, EventPriority};
pub use filter::{FilterEngine, FilterError};
pub use pattern::{PatternError, TopicPattern};
pub use registry::SubscriptionRegistry;
pub use subscription::{Consumer, Outcome, SubscribeOptions, Subscription};
pub use transform::{TransformEngine, TransformError};
