//! Topic pattern compilation and matching
//!
//! Patterns are dot-delimited topic strings where `*` matches any sequence
//! of characters, including across segment boundaries: `document.*` matches
//! both `document.x` and `document.processing.completed`. This is looser
//! than AMQP-style per-segment wildcards and is intentional; `a.*` does not
//! match `a` itself because the literal dot must be present.

use regex::Regex;
use thiserror::Error;

/// Pattern compilation error types.
#[derive(Debug, Error)]
pub enum PatternError {
    /// Pattern was empty
    #[error("Pattern must not be empty")]
    Empty,

    /// Pattern failed to compile
    #[error("Invalid pattern {pattern:?}: {reason}")]
    Invalid {
        /// The offending pattern
        pattern: String,
        /// Compiler diagnostic
        reason: String,
    },
}

/// A compiled topic pattern.
///
/// Compilation escapes every regex metacharacter except `*`, translates `*`
/// to "any sequence of characters", and anchors the result so the whole
/// event name must match. Matching is case-sensitive, pure, and
/// deterministic.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    regex: Regex,
}

impl TopicPattern {
    /// Compile a topic pattern.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let translated: Vec<String> = pattern.split('*').map(|s| regex::escape(s)).collect();
        let anchored = format!("^{}$", translated.join(".*"));

        let regex = Regex::new(&anchored).map_err(|e| PatternError::Invalid {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    /// Test an event name against this pattern.
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The original pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let pattern = TopicPattern::compile("document.created").unwrap();
        assert!(pattern.matches("document.created"));
        assert!(!pattern.matches("document.updated"));
        assert!(!pattern.matches("document.created.extra"));
    }

    #[test]
    fn test_wildcard_spans_segments() {
        let pattern = TopicPattern::compile("document.*").unwrap();
        assert!(pattern.matches("document.x"));
        assert!(pattern.matches("document.processing.completed"));
        assert!(!pattern.matches("documentx"));
        assert!(!pattern.matches("document"));
    }

    #[test]
    fn test_interior_wildcard() {
        let pattern = TopicPattern::compile("*.invoice.*").unwrap();
        assert!(pattern.matches("billing.invoice.paid"));
        assert!(pattern.matches("x.invoice.y.z"));
        assert!(!pattern.matches("billing.payment.received"));
    }

    #[test]
    fn test_metacharacters_are_literal() {
        let pattern = TopicPattern::compile("doc.v1+final").unwrap();
        assert!(pattern.matches("doc.v1+final"));
        assert!(!pattern.matches("doc.v11final"));

        let pattern = TopicPattern::compile("a.b").unwrap();
        assert!(!pattern.matches("aXb"));
    }

    #[test]
    fn test_case_sensitive() {
        let pattern = TopicPattern::compile("Document.*").unwrap();
        assert!(!pattern.matches("document.created"));
        assert!(pattern.matches("Document.created"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(matches!(
            TopicPattern::compile(""),
            Err(PatternError::Empty)
        ));
    }

    #[test]
    fn test_match_is_deterministic() {
        let pattern = TopicPattern::compile("billing.*").unwrap();
        for _ in 0..10 {
            assert!(pattern.matches("billing.invoice.paid"));
            assert!(!pattern.matches("document.created"));
        }
    }
}
