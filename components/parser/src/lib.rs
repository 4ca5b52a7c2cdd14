//! Lexer and byte-code compiler for the Petrel JavaScript engine.
//!
//! Compilation is single-pass: the lexer turns source text into a
//! token stream, a pre-scan pass over each function body collects the
//! hoisted declarations and closure facts, and the Pratt-style
//! compiler emits byte-code directly while parsing, fusing literal
//! pushes into the combined operand encodings at the point of
//! emission. There is no AST.
//!
//! # Example
//!
//! ```
//! use parser::{parse_program, ProgramKind};
//!
//! let code = parse_program("1 + 2", false, ProgramKind::Global).unwrap();
//! assert!(code.register_count >= 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod compiler;
mod error;
mod lexer;
mod scope;

pub use compiler::{parse_program, ProgramKind};
pub use error::ParseError;
pub use lexer::{Keyword, Lexer, Punct, Token, TokenKind};
pub use scope::ScopeInfo;
