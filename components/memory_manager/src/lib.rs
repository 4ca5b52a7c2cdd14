//! Heap and garbage collection for the Petrel JavaScript engine.
//!
//! The heap is a bounded arena of cells addressed by 16-bit compact
//! pointers: doubles, strings, property nodes, and object records all
//! live in the same arena. Cells carry a saturating reference count
//! for the immediate-free fast path; the tracing mark/sweep collector
//! independently reclaims cyclic garbage and runs native-handle
//! finalizers exactly once.
//!
//! # Overview
//!
//! - [`Heap`] - the arena: allocation, interning, ref/deref, collection
//! - [`ObjectRecord`] / [`ObjectKind`] / [`ObjectData`] - object layout
//! - [`PropertyNode`] / [`PropertySlot`] / [`InternalSlot`] - the
//!   property chain
//! - [`GcStats`] - collection statistics

#![warn(missing_docs)]
#![warn(clippy::all)]

mod gc;
mod heap;
mod object;
mod property;

pub use gc::GcStats;
pub use heap::{Heap, HeapCell, HeapString, OutOfMemory, DEFAULT_CELL_CAPACITY};
pub use object::{
    BoundFunctionData, BuiltinData, ExternalFunctionData, FunctionData, LexEnvData, ObjectData,
    ObjectKind, ObjectRecord,
};
pub use property::{
    InternalSlot, NativeHandleSlot, PropertyAttrs, PropertyName, PropertyNode, PropertySlot,
};
