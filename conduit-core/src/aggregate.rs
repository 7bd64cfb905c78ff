//! Event aggregation
//!
//! Reduces an ordered sequence of events to a summary map given per-field
//! rules. Numeric aggregations silently skip non-numeric values; empty
//! input yields neutral defaults (0 for the counting and summing ops, null
//! for the rest).

use crate::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Aggregation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    /// Number of events (with a field: number of events where it resolves)
    Count,
    /// Number of distinct values of a field
    CountUnique,
    /// Sum of numeric values
    Sum,
    /// Mean of numeric values
    Avg,
    /// Smallest numeric value
    Min,
    /// Largest numeric value
    Max,
    /// First resolved value in sequence order
    First,
    /// Last resolved value in sequence order
    Last,
}

/// A single aggregation rule: an operation over a field path.
///
/// `field` is required for every op except [`AggregateOp::Count`], which
/// counts whole events when it is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRule {
    /// The operation to apply
    pub op: AggregateOp,

    /// Field path the operation reads (e.g., "data.amount")
    #[serde(default)]
    pub field: Option<String>,
}

impl AggregationRule {
    /// Rule applying an op to a field path.
    pub fn new(op: AggregateOp, field: impl Into<String>) -> Self {
        Self {
            op,
            field: Some(field.into()),
        }
    }

    /// Rule counting whole events.
    pub fn count() -> Self {
        Self {
            op: AggregateOp::Count,
            field: None,
        }
    }
}

/// Reduces event sequences to summaries.
pub struct AggregationEngine;

impl AggregationEngine {
    /// Apply every rule to the event sequence, keyed by rule name.
    pub fn aggregate(
        events: &[Event],
        rules: &HashMap<String, AggregationRule>,
    ) -> Map<String, Value> {
        let mut summary = Map::new();
        for (name, rule) in rules {
            summary.insert(name.clone(), Self::apply(events, rule));
        }
        summary
    }

    fn apply(events: &[Event], rule: &AggregationRule) -> Value {
        let resolved: Vec<Value> = match &rule.field {
            Some(field) => events.iter().filter_map(|e| e.field(field)).collect(),
            None => Vec::new(),
        };

        match rule.op {
            AggregateOp::Count => match &rule.field {
                Some(_) => Value::Number(resolved.len().into()),
                None => Value::Number(events.len().into()),
            },
            AggregateOp::CountUnique => {
                let distinct: HashSet<String> = resolved.iter().map(Value::to_string).collect();
                Value::Number(distinct.len().into())
            }
            AggregateOp::Sum => number_value(numerics(&resolved).sum()),
            AggregateOp::Avg => {
                let values: Vec<f64> = numerics(&resolved).collect();
                if values.is_empty() {
                    Value::Null
                } else {
                    number_value(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            AggregateOp::Min => numerics(&resolved)
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v))))
                .map(number_value)
                .unwrap_or(Value::Null),
            AggregateOp::Max => numerics(&resolved)
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
                .map(number_value)
                .unwrap_or(Value::Null),
            AggregateOp::First => resolved.first().cloned().unwrap_or(Value::Null),
            AggregateOp::Last => resolved.last().cloned().unwrap_or(Value::Null),
        }
    }
}

/// Numeric values in resolution order; everything else is skipped.
fn numerics<'a>(values: &'a [Value]) -> impl Iterator<Item = f64> + 'a {
    values.iter().filter_map(Value::as_f64)
}

/// Emit integral results as integers, everything else as floats.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
