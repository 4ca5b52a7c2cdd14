//! Error classification for the two engine error tiers.
//!
//! Language-level errors travel as abrupt completion values tagged with
//! an [`ErrorKind`]; they are catchable from script. Engine-level
//! fatals ([`FatalCode`]) terminate execution through the host port and
//! are never visible to script.

use std::fmt;

/// The kind of a language-level error.
///
/// These correspond to the ECMAScript built-in error constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A generic `Error`.
    Error,
    /// Syntax error raised by the parser or `eval`.
    SyntaxError,
    /// Type error (e.g. calling a non-callable value).
    TypeError,
    /// Reference to an unresolvable binding.
    ReferenceError,
    /// Value outside an allowed range.
    RangeError,
    /// Error from the URI handling functions.
    UriError,
    /// Error reserved for `eval` misuse.
    EvalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Error => "Error",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::UriError => "URIError",
            ErrorKind::EvalError => "EvalError",
        };
        f.write_str(name)
    }
}

/// Status codes of engine-level fatals.
///
/// A fatal terminates execution through [`crate::EnginePort::fatal`];
/// the code doubles as the process exit status of the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FatalCode {
    /// The heap arena is exhausted and collection freed nothing.
    OutOfMemory = 10,
    /// A host system call failed.
    Syscall = 11,
    /// A cell reference count saturated.
    RefCountLimit = 12,
    /// Execution reached a case the engine does not implement.
    UnimplementedCase = 118,
    /// An internal invariant was violated.
    FailedInternalAssertion = 120,
}

impl FatalCode {
    /// Returns the symbolic name of this code.
    pub fn name(self) -> &'static str {
        match self {
            FatalCode::OutOfMemory => "ERR_OUT_OF_MEMORY",
            FatalCode::Syscall => "ERR_SYSCALL",
            FatalCode::RefCountLimit => "ERR_REF_COUNT_LIMIT",
            FatalCode::UnimplementedCase => "ERR_UNIMPLEMENTED_CASE",
            FatalCode::FailedInternalAssertion => "ERR_FAILED_INTERNAL_ASSERTION",
        }
    }

    /// Returns the process exit status for this code.
    pub fn exit_code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for FatalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::TypeError.to_string(), "TypeError");
        assert_eq!(ErrorKind::UriError.to_string(), "URIError");
    }

    #[test]
    fn test_fatal_exit_codes_nonzero() {
        let codes = [
            FatalCode::OutOfMemory,
            FatalCode::Syscall,
            FatalCode::RefCountLimit,
            FatalCode::UnimplementedCase,
            FatalCode::FailedInternalAssertion,
        ];
        for code in codes {
            assert_ne!(code.exit_code(), 0);
        }
        assert_eq!(FatalCode::OutOfMemory.exit_code(), 10);
        assert_eq!(FatalCode::FailedInternalAssertion.exit_code(), 120);
    }
}
