//! CLI error type.

use parser::ParseError;
use std::fmt;

/// Result alias used throughout the CLI.
pub type CliResult<T> = Result<T, CliError>;

/// Errors surfaced by the CLI runtime.
#[derive(Debug)]
pub enum CliError {
    /// File could not be read or written.
    Io(std::io::Error),
    /// The source failed to compile.
    Parse(ParseError),
    /// Script execution ended with an uncaught exception (rendered).
    Script(String),
    /// A snapshot buffer was rejected.
    Snapshot(String),
    /// The interactive editor failed.
    Readline(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io(error) => write!(f, "{}", error),
            CliError::Parse(error) => write!(f, "{}", error),
            CliError::Script(message) => write!(f, "{}", message),
            CliError::Snapshot(message) => write!(f, "{}", message),
            CliError::Readline(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        CliError::Io(error)
    }
}

impl From<ParseError> for CliError {
    fn from(error: ParseError) -> Self {
        CliError::Parse(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::SourcePosition;

    #[test]
    fn test_display_variants() {
        let parse = CliError::from(ParseError::syntax(
            "unexpected token",
            SourcePosition { line: 1, column: 2 },
        ));
        assert!(parse.to_string().contains("SyntaxError"));

        let script = CliError::Script("TypeError: nope".to_string());
        assert_eq!(script.to_string(), "TypeError: nope");
    }
}
