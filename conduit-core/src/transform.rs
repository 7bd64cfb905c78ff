//! Event transformation
//!
//! Produces a new event from a transform spec via copy-on-write of `data`
//! and `metadata`; the source event is never mutated, so dispatching one
//! event to N subscribers with N different transforms is safe.
//!
//! A spec maps target field paths to transformations:
//!
//! ```json
//! {
//!   "data.status": "processed",
//!   "data.score": {"map": "data.confidence"},
//!   "data.total": {"expr": "${data.amount} * 1.2 + ${data.fee}"}
//! }
//! ```
//!
//! Targets are dotted paths; a bare name lands in `data`. Arithmetic
//! expressions substitute `${field.path}` placeholders with numeric values
//! and accept only numeric literals, `+ - * /`, unary minus and
//! parentheses; every other token is rejected at parse time.

use crate::event::Event;
use serde_json::{Map, Value};
use thiserror::Error;

/// Transformation error types.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Transformation object was malformed
    #[error("Invalid transformation: {0}")]
    InvalidTransformation(String),

    /// Expression placeholder did not resolve to a field
    #[error("Unknown field in expression: {0}")]
    UnknownField(String),

    /// Expression placeholder resolved to a non-numeric value
    #[error("Non-numeric value for placeholder: {0}")]
    NonNumeric(String),

    /// Expression contained a token outside the arithmetic grammar
    #[error("Forbidden token in expression: {0:?}")]
    ForbiddenToken(char),

    /// Expression did not parse
    #[error("Malformed expression: {0}")]
    Malformed(String),

    /// Expression divided by zero
    #[error("Division by zero in expression")]
    DivisionByZero,
}

/// Applies transform specs to events.
pub struct TransformEngine;

impl TransformEngine {
    /// Apply a transform spec, returning the transformed copy.
    ///
    /// An empty spec returns a structurally equal copy. All reads resolve
    /// against the source event, so entries cannot observe each other's
    /// writes.
    pub fn transform(event: &Event, spec: &Map<String, Value>) -> Result<Event, TransformError> {
        let mut out = event.clone();
        for (target, transformation) in spec {
            let value = Self::resolve(event, transformation)?;
            assign_field(&mut out, target, value);
        }
        Ok(out)
    }

    fn resolve(event: &Event, transformation: &Value) -> Result<Value, TransformError> {
        if let Some(map) = transformation.as_object() {
            if map.len() == 1 {
                if let Some(path) = map.get("map") {
                    let path = path.as_str().ok_or_else(|| {
                        TransformError::InvalidTransformation(
                            "\"map\" expects a field path string".to_string(),
                        )
                    })?;
                    // Missing sources map to null rather than failing the
                    // whole transform.
                    return Ok(event.field(path).unwrap_or(Value::Null));
                }
                if let Some(expr) = map.get("expr") {
                    let expr = expr.as_str().ok_or_else(|| {
                        TransformError::InvalidTransformation(
                            "\"expr\" expects an expression string".to_string(),
                        )
                    })?;
                    let result = eval_expression(event, expr)?;
                    if !result.is_finite() {
                        return Err(TransformError::Malformed(
                            "expression produced a non-finite value".to_string(),
                        ));
                    }
                    return Ok(number_value(result));
                }
            }
        }
        Ok(transformation.clone())
    }
}

/// Write a value at a dotted target path, creating intermediate objects.
///
/// `metadata.` targets write into the metadata map; everything else writes
/// into `data` (with an optional `data.` prefix). Non-object intermediates
/// are replaced.
pub(crate) fn assign_field(event: &mut Event, target: &str, value: Value) {
    if let Some(rest) = target.strip_prefix("metadata.") {
        match rest.split_once('.') {
            None => {
                event.metadata.insert(rest.to_string(), value);
            }
            Some((head, tail)) => {
                let root = event
                    .metadata
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !root.is_object() {
                    *root = Value::Object(Map::new());
                }
                if let Value::Object(inner) = root {
                    insert_map_path(inner, tail, value);
                }
            }
        }
        return;
    }

    let path = target.strip_prefix("data.").unwrap_or(target);
    insert_map_path(&mut event.data, path, value);
}

fn insert_map_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_map_path(inner, tail, value);
            }
        }
    }
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

// ============================================================================
// Arithmetic expression evaluator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

/// Evaluate a `${path}`-placeholder arithmetic expression against an event.
fn eval_expression(event: &Event, expr: &str) -> Result<f64, TransformError> {
    let tokens = tokenize(event, expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(TransformError::Malformed(format!(
            "unexpected trailing input in {expr:?}"
        )));
    }
    Ok(value)
}

/// Tokenize an expression, resolving placeholders as they are scanned.
///
/// Placeholder values become number tokens directly; they are never spliced
/// back into the source text, so a value cannot smuggle in extra tokens.
fn tokenize(event: &Event, expr: &str) -> Result<Vec<Token>, TransformError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| TransformError::Malformed(format!("bad number literal {literal:?}")))?;
                tokens.push(Token::Number(n));
            }
            '$' => {
                chars.next();
                if chars.next() != Some('{') {
                    return Err(TransformError::Malformed(
                        "expected '{' after '$'".to_string(),
                    ));
                }
                let mut path = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(d) => path.push(d),
                        None => {
                            return Err(TransformError::Malformed(
                                "unterminated placeholder".to_string(),
                            ))
                        }
                    }
                }
                let value = event
                    .field(&path)
                    .ok_or_else(|| TransformError::UnknownField(path.clone()))?;
                let n = value
                    .as_f64()
                    .ok_or_else(|| TransformError::NonNumeric(path.clone()))?;
                tokens.push(Token::Number(n));
            }
            other => return Err(TransformError::ForbiddenToken(other)),
        }
    }

    Ok(tokens)
}

/// Recursive-descent parser over the token stream.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<f64, TransformError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, TransformError> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    value *= self.factor()?;
                }
                Some(Token::Slash) => {
                    self.next();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(TransformError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, TransformError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::LParen) => {
                let value = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(TransformError::Malformed("missing ')'".to_string())),
                }
            }
            other => Err(TransformError::Malformed(format!(
                "expected a value, found {other:?}"
            ))),
        }
    }
}
