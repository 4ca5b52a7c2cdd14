//! ECMA object operations, interpreter, and embedding surface of the
//! Petrel JavaScript engine.
//!
//! This crate is where the value representation, the byte-code format,
//! and the heap meet: the object model operations of ECMA-262 §8.12,
//! the conversion operations of §9, lexical environments, the function
//! protocol (`[[Call]]`/`[[Construct]]`/`[[HasInstance]]`), and the
//! byte-decoding dispatch loop [`vm::vm_run`]. Embedders use
//! [`Engine`]; a built-in library plugs in through the
//! [`provider::BuiltinProvider`] seam.
//!
//! # Example
//!
//! ```
//! use interpreter::Engine;
//!
//! let mut engine = Engine::new();
//! let result = engine.eval("6 * 7", false);
//! assert_eq!(engine.get_number(result), 42.0);
//! engine.free_value(result);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod api;
pub mod arguments;
mod context;
pub mod conversion;
pub mod function;
pub mod lex_env;
pub mod objects;
pub mod provider;
pub mod vm;

pub use api::Engine;
pub use context::{Context, ContextConfig, ExternalHandlerFn};
pub use objects::PropertyDescriptor;
pub use provider::{
    BuiltinId, BuiltinPropertyDesc, BuiltinProvider, BuiltinTemplate, BuiltinValue,
    BUILTIN_COUNT, GLOBAL_ROUTINE_EVAL,
};
