//! Core value representation and shared types for the Petrel engine.
//!
//! This crate provides the foundational types shared by every engine
//! component: the tagged 32-bit value word, compact heap pointers, the
//! magic string table, error classification, and the host port trait
//! through which the engine reaches platform services.
//!
//! # Overview
//!
//! - [`Value`] - Tagged 32-bit representation of JavaScript values
//! - [`CompactPtr`] - 16-bit offset into the bounded heap arena
//! - [`MagicStringId`] - Identifiers for statically known strings
//! - [`ErrorKind`] / [`FatalCode`] - Error classification for the two
//!   error tiers (language completions and engine fatals)
//! - [`EnginePort`] - Host services: fatal, time, time zone, logging
//! - [`SourcePosition`] - Source code location for diagnostics
//!
//! # Examples
//!
//! ```
//! use core_types::Value;
//!
//! let n = Value::integer(42);
//! assert!(n.is_integer());
//! assert_eq!(n.as_integer(), 42);
//!
//! // Any value can carry the error flag, turning it into an abrupt
//! // completion whose payload is the thrown value.
//! let thrown = n.with_error_flag();
//! assert!(thrown.is_abrupt());
//! assert_eq!(thrown.abrupt_payload(), n);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod magic;
mod port;
mod source;
mod value;

pub use error::{ErrorKind, FatalCode};
pub use magic::MagicStringId;
pub use port::{DefaultPort, EnginePort, LogLevel, TimeZoneInfo};
pub use source::SourcePosition;
pub use value::{CompactPtr, SimpleValue, Value, ValueTag};
