//! Declarative event filtering
//!
//! Filter conditions are JSON documents evaluated against an event. A
//! condition is either a field-to-literal map (implicitly AND-ed), a
//! field-to-operator-object map, or a composite (`and` / `or` / `not`).
//! Evaluation is pure and never propagates an error: malformed conditions
//! degrade to a non-match and are logged.
//!
//! ## Grammar
//!
//! ```json
//! {"data.confidence": {"gte": 0.9}}
//! {"source": "billing", "priority": "critical"}
//! {"or": [{"category": "security"}, {"data.amount": {"gt": 1000}}]}
//! {"not": {"user_id": {"in": ["u-1", "u-2"]}}}
//! ```
//!
//! Field paths resolve direct event attributes and dotted paths into
//! `data.*` / `metadata.*`. An unresolved path is "absent": it fails every
//! operator except `ne` and `not_in`, which treat absence as not-equal.

use crate::event::Event;
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Operators recognized inside a field's operator object.
const OPERATORS: &[&str] = &[
    "eq",
    "ne",
    "gt",
    "gte",
    "lt",
    "lte",
    "in",
    "not_in",
    "contains",
    "starts_with",
    "ends_with",
    "regex",
    "between",
    "datetime_after",
    "datetime_before",
];

/// Structural errors in a condition document.
///
/// Never escapes [`FilterEngine::matches`]; reported there as a logged
/// non-match.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Condition was not a JSON object
    #[error("Condition must be a JSON object")]
    NotAnObject,

    /// Composite or operator received the wrong operand shape
    #[error("Operator {operator:?} expects {expected}")]
    BadOperand {
        /// The operator name
        operator: String,
        /// Description of the expected operand
        expected: &'static str,
    },

    /// Operator name is not part of the grammar
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),
}

/// Evaluates declarative conditions against events.
pub struct FilterEngine;

impl FilterEngine {
    /// Test an event against a condition document.
    ///
    /// Pure and infallible from the caller's perspective; applying the same
    /// condition to the same event always yields the same boolean.
    pub fn matches(event: &Event, condition: &Value) -> bool {
        match Self::eval(event, condition) {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, event = %event.name, "Filter evaluation failed, treating as non-match");
                false
            }
        }
    }

    fn eval(event: &Event, condition: &Value) -> Result<bool, FilterError> {
        let map = condition.as_object().ok_or(FilterError::NotAnObject)?;

        // Top-level entries are implicitly AND-ed.
        for (key, spec) in map {
            let pass = match key.as_str() {
                "and" => {
                    let conditions = spec.as_array().ok_or(FilterError::BadOperand {
                        operator: "and".to_string(),
                        expected: "an array of conditions",
                    })?;
                    let mut all = true;
                    for condition in conditions {
                        if !Self::eval(event, condition)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "or" => {
                    let conditions = spec.as_array().ok_or(FilterError::BadOperand {
                        operator: "or".to_string(),
                        expected: "an array of conditions",
                    })?;
                    let mut any = false;
                    for condition in conditions {
                        if Self::eval(event, condition)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                "not" => !Self::eval(event, spec)?,
                field => Self::eval_field(event, field, spec)?,
            };

            if !pass {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn eval_field(event: &Event, field: &str, spec: &Value) -> Result<bool, FilterError> {
        let actual = event.field(field);

        match operator_object(spec) {
            Some(operators) => {
                for (operator, operand) in operators {
                    if !Self::apply_operator(operator, actual.as_ref(), operand)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            // Bare literal: shorthand for eq.
            None => Ok(actual.map_or(false, |a| loose_eq(&a, spec))),
        }
    }

    fn apply_operator(
        operator: &str,
        actual: Option<&Value>,
        operand: &Value,
    ) -> Result<bool, FilterError> {
        match operator {
            "eq" => Ok(actual.map_or(false, |a| loose_eq(a, operand))),
            "ne" => Ok(actual.map_or(true, |a| !loose_eq(a, operand))),
            "gt" | "gte" | "lt" | "lte" => Ok(compare_numeric(operator, actual, operand)),
            "in" => {
                let candidates = operand.as_array().ok_or(FilterError::BadOperand {
                    operator: "in".to_string(),
                    expected: "an array",
                })?;
                Ok(actual.map_or(false, |a| candidates.iter().any(|v| loose_eq(a, v))))
            }
            "not_in" => {
                let candidates = operand.as_array().ok_or(FilterError::BadOperand {
                    operator: "not_in".to_string(),
                    expected: "an array",
                })?;
                Ok(actual.map_or(true, |a| !candidates.iter().any(|v| loose_eq(a, v))))
            }
            "contains" => Ok(contains(actual, operand)),
            "starts_with" => Ok(string_pair(actual, operand).map_or(false, |(a, o)| a.starts_with(o))),
            "ends_with" => Ok(string_pair(actual, operand).map_or(false, |(a, o)| a.ends_with(o))),
            "regex" => Ok(regex_search(actual, operand)),
            "between" => between(actual, operand),
            "datetime_after" => Ok(datetime_pair(actual, operand).map_or(false, |(a, o)| a > o)),
            "datetime_before" => Ok(datetime_pair(actual, operand).map_or(false, |(a, o)| a < o)),
            other => Err(FilterError::UnknownOperator(other.to_string())),
        }
    }
}

/// Interpret a field spec as an operator object.
///
/// An object qualifies only when non-empty and every key is a known
/// operator; anything else is a literal to compare against.
fn operator_object(spec: &Value) -> Option<&serde_json::Map<String, Value>> {
    let map = spec.as_object()?;
    if !map.is_empty() && map.keys().all(|k| OPERATORS.contains(&k.as_str())) {
        Some(map)
    } else {
        None
    }
}

/// Equality with numeric coercion so `1` equals `1.0`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_numeric(operator: &str, actual: Option<&Value>, operand: &Value) -> bool {
    let (Some(a), Some(b)) = (actual.and_then(Value::as_f64), operand.as_f64()) else {
        return false;
    };
    match operator {
        "gt" => a > b,
        "gte" => a >= b,
        "lt" => a < b,
        "lte" => a <= b,
        _ => false,
    }
}

/// Case-insensitive substring on strings; membership on arrays and objects.
fn contains(actual: Option<&Value>, operand: &Value) -> bool {
    match actual {
        Some(Value::String(haystack)) => operand
            .as_str()
            .map_or(false, |needle| haystack.to_lowercase().contains(&needle.to_lowercase())),
        Some(Value::Array(items)) => items.iter().any(|v| loose_eq(v, operand)),
        Some(Value::Object(map)) => operand.as_str().map_or(false, |key| map.contains_key(key)),
        _ => false,
    }
}

fn string_pair<'a>(actual: Option<&'a Value>, operand: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((actual?.as_str()?, operand.as_str()?))
}

/// Unanchored regex search; invalid patterns fail closed.
fn regex_search(actual: Option<&Value>, operand: &Value) -> bool {
    let (Some(haystack), Some(pattern)) = (actual.and_then(Value::as_str), operand.as_str()) else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(regex) => regex.is_match(haystack),
        Err(err) => {
            debug!(pattern, error = %err, "Invalid regex in filter condition");
            false
        }
    }
}

/// Inclusive numeric range check against a `[low, high]` operand.
fn between(actual: Option<&Value>, operand: &Value) -> Result<bool, FilterError> {
    let bounds = operand.as_array().ok_or(FilterError::BadOperand {
        operator: "between".to_string(),
        expected: "a [low, high] array",
    })?;
    if bounds.len() != 2 {
        return Err(FilterError::BadOperand {
            operator: "between".to_string(),
            expected: "a [low, high] array",
        });
    }
    let (Some(a), Some(low), Some(high)) = (
        actual.and_then(Value::as_f64),
        bounds[0].as_f64(),
        bounds[1].as_f64(),
    ) else {
        return Ok(false);
    };
    Ok(low <= a && a <= high)
}

/// Parse both sides as ISO-8601; malformed timestamps fail closed.
fn datetime_pair(
    actual: Option<&Value>,
    operand: &Value,
) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    let a = DateTime::parse_from_rfc3339(actual?.as_str()?).ok()?;
    let b = DateTime::parse_from_rfc3339(operand.as_str()?).ok()?;
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> Event {
        let mut data = serde_json::Map::new();
        data.insert("confidence".to_string(), json!(0.92));
        data.insert("amount".to_string(), json!(150));
        data.insert("tags".to_string(), json!(["urgent", "finance"]));
        data.insert("title".to_string(), json!("Quarterly Invoice Report"));
        data.insert("issued_at".to_string(), json!("2026-01-15T12:00:00Z"));
        Event::new("billing.invoice.paid", "billing", data).with_user("user-1")
    }

    #[test]
    fn test_literal_map_is_anded() {
        let e = event();
        assert!(FilterEngine::matches(
            &e,
            &json!({"source": "billing", "data.amount": 150})
        ));
        assert!(!FilterEngine::matches(
            &e,
            &json!({"source": "billing", "data.amount": 151})
        ));
    }

    #[test]
    fn test_numeric_comparisons() {
        let e = event();
        assert!(FilterEngine::matches(&e, &json!({"data.confidence": {"gte": 0.9}})));
        assert!(!FilterEngine::matches(&e, &json!({"data.confidence": {"gte": 0.99}})));
        assert!(FilterEngine::matches(&e, &json!({"data.amount": {"gt": 100, "lt": 200}})));
        assert!(FilterEngine::matches(&e, &json!({"data.amount": {"lte": 150}})));
    }

    #[test]
    fn test_loose_numeric_equality() {
        let e = event();
        assert!(FilterEngine::matches(&e, &json!({"data.amount": 150.0})));
        assert!(FilterEngine::matches(&e, &json!({"data.amount": {"eq": 150.0}})));
    }

    #[test]
    fn test_absent_field_semantics() {
        let e = event();
        assert!(!FilterEngine::matches(&e, &json!({"data.missing": {"eq": 1}})));
        assert!(!FilterEngine::matches(&e, &json!({"data.missing": {"gt": 0}})));
        assert!(FilterEngine::matches(&e, &json!({"data.missing": {"ne": 1}})));
        assert!(FilterEngine::matches(&e, &json!({"data.missing": {"not_in": [1, 2]}})));
        assert!(!FilterEngine::matches(&e, &json!({"tenant_id": {"eq": "t-1"}})));
    }

    #[test]
    fn test_membership() {
        let e = event();
        assert!(FilterEngine::matches(&e, &json!({"source": {"in": ["billing", "verity"]}})));
        assert!(!FilterEngine::matches(&e, &json!({"source": {"in": ["verity"]}})));
        assert!(FilterEngine::matches(&e, &json!({"source": {"not_in": ["verity"]}})));
    }

    #[test]
    fn test_contains() {
        let e = event();
        // Case-insensitive substring on strings.
        assert!(FilterEngine::matches(&e, &json!({"data.title": {"contains": "invoice"}})));
        assert!(!FilterEngine::matches(&e, &json!({"data.title": {"contains": "refund"}})));
        // Membership on sequences.
        assert!(FilterEngine::matches(&e, &json!({"data.tags": {"contains": "urgent"}})));
        // Key membership on maps.
        assert!(FilterEngine::matches(&e, &json!({"data": {"contains": "amount"}})));
    }

    #[test]
    fn test_string_affixes() {
        let e = event();
        assert!(FilterEngine::matches(&e, &json!({"name": {"starts_with": "billing."}})));
        assert!(FilterEngine::matches(&e, &json!({"name": {"ends_with": ".paid"}})));
        assert!(!FilterEngine::matches(&e, &json!({"name": {"starts_with": "document."}})));
    }

    #[test]
    fn test_regex() {
        let e = event();
        assert!(FilterEngine::matches(&e, &json!({"name": {"regex": "invoice\\.(paid|sent)"}})));
        assert!(!FilterEngine::matches(&e, &json!({"name": {"regex": "^invoice"}})));
        // Invalid patterns fail closed.
        assert!(!FilterEngine::matches(&e, &json!({"name": {"regex": "("}})));
    }

    #[test]
    fn test_between_inclusive() {
        let e = event();
        assert!(FilterEngine::matches(&e, &json!({"data.amount": {"between": [150, 200]}})));
        assert!(FilterEngine::matches(&e, &json!({"data.amount": {"between": [100, 150]}})));
        assert!(!FilterEngine::matches(&e, &json!({"data.amount": {"between": [151, 200]}})));
    }

    #[test]
    fn test_datetime_operators() {
        let e = event();
        assert!(FilterEngine::matches(
            &e,
            &json!({"data.issued_at": {"datetime_after": "2026-01-01T00:00:00Z"}})
        ));
        assert!(FilterEngine::matches(
            &e,
            &json!({"data.issued_at": {"datetime_before": "2026-02-01T00:00:00Z"}})
        ));
        // Malformed timestamps fail closed rather than erroring.
        assert!(!FilterEngine::matches(
            &e,
            &json!({"data.issued_at": {"datetime_after": "not-a-date"}})
        ));
        assert!(!FilterEngine::matches(
            &e,
            &json!({"data.title": {"datetime_after": "2026-01-01T00:00:00Z"}})
        ));
    }

    #[test]
    fn test_composites() {
        let e = event();
        assert!(FilterEngine::matches(
            &e,
            &json!({"and": [{"source": "billing"}, {"data.amount": {"gte": 100}}]})
        ));
        assert!(FilterEngine::matches(
            &e,
            &json!({"or": [{"source": "verity"}, {"data.amount": {"gte": 100}}]})
        ));
        assert!(FilterEngine::matches(&e, &json!({"not": {"source": "verity"}})));
        assert!(!FilterEngine::matches(
            &e,
            &json!({"not": {"or": [{"source": "billing"}, {"source": "verity"}]}})
        ));
    }

    #[test]
    fn test_malformed_conditions_degrade_to_false() {
        let e = event();
        assert!(!FilterEngine::matches(&e, &json!("not an object")));
        assert!(!FilterEngine::matches(&e, &json!({"and": "not an array"})));
        assert!(!FilterEngine::matches(&e, &json!({"source": {"in": "not an array"}})));
        assert!(!FilterEngine::matches(&e, &json!({"data.amount": {"between": [1]}})));
    }

    #[test]
    fn test_unknown_operator_key_is_literal_object() {
        let e = event();
        // An object with unrecognized keys is an equality literal, not an
        // operator object, so it compares (and fails) as a value.
        assert!(!FilterEngine::matches(&e, &json!({"data.amount": {"about": 150}})));
    }

    #[test]
    fn test_idempotent() {
        let e = event();
        let condition = json!({"data.confidence": {"gte": 0.9}});
        let first = FilterEngine::matches(&e, &condition);
        let second = FilterEngine::matches(&e, &condition);
        assert_eq!(first, second);
        assert!(first);
    }

    #[test]
    fn test_empty_condition_matches() {
        let e = event();
        assert!(FilterEngine::matches(&e, &json!({})));
    }
}
