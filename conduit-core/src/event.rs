//! Event types for the Conduit bus
//!
//! This module defines the event envelope published to the bus, together
//! with its priority and category classifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Delivery priority for events and subscriptions.
///
/// Ordering is `Low < Normal < High < Critical`; the dispatcher delivers
/// higher priorities first within a single event's fan-out.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    /// Background traffic (analytics, housekeeping).
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Time-sensitive traffic (user-facing notifications).
    High,
    /// Must-process traffic (security, billing).
    Critical,
}

impl EventPriority {
    /// String form used in filter conditions and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPriority::Low => "low",
            EventPriority::Normal => "normal",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
        }
    }
}

/// Event categories for coarse filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Document-related events
    Document,
    /// Verification events
    Verification,
    /// User events
    User,
    /// Organization events
    Organization,
    /// Billing events
    Billing,
    /// Security events
    Security,
    /// Integration events
    Integration,
    /// System events
    System,
    /// Everything else
    Other,
}

impl EventCategory {
    /// Derive the category from an event name's first topic segment.
    pub fn from_event_name(name: &str) -> Self {
        let prefix = name.split('.').next().unwrap_or_default();
        match prefix {
            "document" | "assertion" | "knowledge" => EventCategory::Document,
            "verification" | "remediation" => EventCategory::Verification,
            "user" | "profile" | "session" => EventCategory::User,
            "org" | "organization" | "project" | "team" => EventCategory::Organization,
            "billing" | "subscription" | "invoice" => EventCategory::Billing,
            "security" | "audit" | "mfa" => EventCategory::Security,
            "integration" | "webhook" | "api" => EventCategory::Integration,
            "system" | "health" | "maintenance" => EventCategory::System,
            _ => EventCategory::Other,
        }
    }

    /// String form used in filter conditions and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Document => "document",
            EventCategory::Verification => "verification",
            EventCategory::User => "user",
            EventCategory::Organization => "organization",
            EventCategory::Billing => "billing",
            EventCategory::Security => "security",
            EventCategory::Integration => "integration",
            EventCategory::System => "system",
            EventCategory::Other => "other",
        }
    }
}

/// An occurrence record published to the bus.
///
/// Events are conceptually immutable once published: the dispatcher never
/// mutates one in place. The only field that changes over an event's life is
/// `retry_count`, and only through [`Event::into_retry`], which builds the
/// re-enqueued successor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,

    /// Dot-delimited topic name (e.g., "document.processing.completed").
    /// Must be non-empty.
    pub name: String,

    /// Category derived from the topic's first segment
    pub category: EventCategory,

    /// Event payload. Key order is preserved.
    pub data: Map<String, Value>,

    /// Producing subsystem
    pub source: String,

    /// Timestamp when the event was created
    pub timestamp: DateTime<Utc>,

    /// Delivery priority
    pub priority: EventPriority,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// User who triggered the event
    pub user_id: Option<String>,

    /// Tenant context
    pub tenant_id: Option<String>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Number of completed delivery attempts that ended in retry
    pub retry_count: u32,

    /// Retry ceiling; the total attempt count is `max_retries + 1`
    pub max_retries: u32,
}

impl Event {
    /// Default retry ceiling for events that don't override it.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Create a new event.
    ///
    /// # Arguments
    ///
    /// * `name` - Dot-delimited topic name; must be non-empty
    /// * `source` - The producing subsystem
    /// * `data` - The event payload
    pub fn new(name: impl Into<String>, source: impl Into<String>, data: Map<String, Value>) -> Self {
        let name = name.into();
        debug_assert!(!name.is_empty(), "event name must be non-empty");
        Self {
            id: Uuid::now_v7(),
            category: EventCategory::from_event_name(&name),
            name,
            data,
            source: source.into(),
            timestamp: Utc::now(),
            priority: EventPriority::Normal,
            correlation_id: None,
            user_id: None,
            tenant_id: None,
            metadata: HashMap::new(),
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set user context.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set tenant context.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Set the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Build the re-enqueued successor of this event.
    ///
    /// The successor is identical apart from `retry_count`; callers must
    /// check [`Event::can_retry`] first.
    pub fn into_retry(mut self) -> Self {
        debug_assert!(self.retry_count < self.max_retries);
        self.retry_count += 1;
        self
    }

    /// Resolve a dotted field path against this event.
    ///
    /// Paths starting with `data.` or `metadata.` descend into the
    /// respective map; direct attribute names (`name`, `source`, `category`,
    /// `priority`, `id`, `timestamp`, `correlation_id`, `user_id`,
    /// `tenant_id`, `retry_count`, `max_retries`) resolve to their values;
    /// any other path is tried against `data` as a fallback. Returns `None`
    /// for paths that don't resolve.
    pub fn field(&self, path: &str) -> Option<Value> {
        match path {
            "id" => return Some(Value::String(self.id.to_string())),
            "name" => return Some(Value::String(self.name.clone())),
            "category" => return Some(Value::String(self.category.as_str().to_string())),
            "source" => return Some(Value::String(self.source.clone())),
            "priority" => return Some(Value::String(self.priority.as_str().to_string())),
            "timestamp" => return Some(Value::String(self.timestamp.to_rfc3339())),
            "correlation_id" => return self.correlation_id.clone().map(Value::String),
            "user_id" => return self.user_id.clone().map(Value::String),
            "tenant_id" => return self.tenant_id.clone().map(Value::String),
            "retry_count" => return Some(Value::Number(self.retry_count.into())),
            "max_retries" => return Some(Value::Number(self.max_retries.into())),
            "data" => return Some(Value::Object(self.data.clone())),
            "metadata" => {
                let map: Map<String, Value> =
                    self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                return Some(Value::Object(map));
            }
            _ => {}
        }

        if let Some(rest) = path.strip_prefix("data.") {
            return lookup_map(&self.data, rest).cloned();
        }
        if let Some(rest) = path.strip_prefix("metadata.") {
            let (head, tail) = split_head(rest);
            let root = self.metadata.get(head)?;
            return match tail {
                Some(tail) => lookup_value(root, tail).cloned(),
                None => Some(root.clone()),
            };
        }

        lookup_map(&self.data, path).cloned()
    }
}

/// Split a dotted path into its first segment and the remainder.
fn split_head(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    }
}

/// Walk a dotted path through a JSON object map.
fn lookup_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, tail) = split_head(path);
    let value = map.get(head)?;
    match tail {
        Some(tail) => lookup_value(value, tail),
        None => Some(value),
    }
}

/// Walk a dotted path through a JSON value.
fn lookup_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => lookup_map(map, path),
        _ => None,
    }
}
