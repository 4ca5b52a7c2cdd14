//! Byte-code format for the Petrel JavaScript engine.
//!
//! Compiled code is a stack-machine program: one-byte opcodes (with an
//! extended second plane behind a prefix byte) followed by zero to three
//! immediate bytes carrying literal-pool indices, branch offsets, or
//! small integers. Every opcode declares a (pops, pushes, literal-args)
//! signature consumed by the compiler's peephole fuser and the
//! interpreter's stack-depth accounting.
//!
//! # Overview
//!
//! - [`Opcode`] / [`ExtOpcode`] - the instruction set
//! - [`BinaryOp`] - binary operator index shared by the three fused
//!   operand encodings
//! - [`CompiledCode`] - immutable blob: header, literal pool, byte stream
//! - [`snapshot`] - on-disk serialization of compiled code
//! - [`disassemble`] - human-readable byte-code listing

#![warn(missing_docs)]
#![warn(clippy::all)]

mod code;
mod disasm;
mod opcode;
pub mod snapshot;

pub use code::{CodeFlags, CompiledCode, Declaration, DecodedInstruction, Literal};
pub use disasm::disassemble;
pub use opcode::{
    BinaryOp, ExtOpcode, Opcode, OperandKind, StackEffect, BINARY_OP_COUNT, EXT_PREFIX,
};
