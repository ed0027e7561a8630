//! Error types for the DKR core
//!
//! Loading and parsing return `Result<T, Error>`. Engine operations never
//! fail on a well-formed `RuleSet`, so they return plain values.

use thiserror::Error;

/// Syntax violation in a rule file, pinned to its 1-based line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            message: message.into(),
        }
    }
}

/// DKR error types
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Rule source could not be fetched
    #[error("Rule source '{source_id}' not found: {reason}")]
    NotFound { source_id: String, reason: String },

    /// Malformed rule text; any previously cached rule set stays active
    #[error("Parse error at {0}")]
    Parse(#[from] ParseError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(source_id: &str, reason: impl Into<String>) -> Self {
        Error::NotFound {
            source_id: source_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for DKR operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_includes_line() {
        let err = ParseError::new(7, "rule with no conditions");
        assert_eq!(err.to_string(), "line 7: rule with no conditions");
    }

    #[test]
    fn test_error_from_parse_error() {
        let err: Error = ParseError::new(3, "unknown section 'FOO'").into();
        match &err {
            Error::Parse(inner) => assert_eq!(inner.line, 3),
            other => panic!("expected Parse, got {:?}", other),
        }
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("licencas", "no such file");
        assert_eq!(
            err.to_string(),
            "Rule source 'licencas' not found: no such file"
        );
    }
}
