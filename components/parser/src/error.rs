//! Parse errors.

use core_types::{ErrorKind, SourcePosition};
use std::fmt;

/// An error produced by the lexer or compiler.
///
/// Parse errors abort compilation; the engine surfaces them to script
/// as `SyntaxError` (or `ReferenceError` for invalid assignment
/// targets) completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// The error classification carried into the thrown completion.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Where in the source the error was detected.
    pub position: SourcePosition,
}

impl ParseError {
    /// Creates a `SyntaxError` at `position`.
    pub fn syntax(message: impl Into<String>, position: SourcePosition) -> Self {
        ParseError {
            kind: ErrorKind::SyntaxError,
            message: message.into(),
            position,
        }
    }

    /// Creates a `ReferenceError` at `position`.
    pub fn reference(message: impl Into<String>, position: SourcePosition) -> Self {
        ParseError {
            kind: ErrorKind::ReferenceError,
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.kind, self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let error = ParseError::syntax("unexpected token", SourcePosition { line: 2, column: 7 });
        assert_eq!(
            error.to_string(),
            "SyntaxError: unexpected token (line 2, column 7)"
        );
    }
}
