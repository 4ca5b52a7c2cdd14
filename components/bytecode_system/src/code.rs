//! Compiled-code blobs.
//!
//! A [`CompiledCode`] is the immutable result of compiling one function
//! body (or the whole program): a small header, the literal pool, the
//! hoisted declaration list, and the byte stream. Nested function
//! bodies are literals of the enclosing blob, shared by reference
//! counting; a blob loaded from a host snapshot is bit-identical to one
//! produced by the compiler.

use crate::opcode::{ExtOpcode, Opcode, OperandKind, EXT_PREFIX};
use std::rc::Rc;

/// Header flag bits of a compiled-code blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeFlags(u16);

impl CodeFlags {
    /// The code is strict-mode code.
    pub const STRICT: u16 = 1 << 0;
    /// The function body references `arguments`.
    pub const ARGUMENTS_NEEDED: u16 = 1 << 1;
    /// No binding escapes: calls may skip creating a lexical environment.
    pub const LEX_ENV_NOT_NEEDED: u16 = 1 << 2;
    /// Literal-pool indices in the byte stream are two bytes wide.
    pub const UINT16_LITERALS: u16 = 1 << 3;
    /// The blob carries hoisted `var`/function declarations.
    pub const HAS_DECLARATIONS: u16 = 1 << 4;
    /// The blob is a named function expression (its name binds inside).
    pub const NAMED_EXPRESSION: u16 = 1 << 5;
    /// The blob is global-scope code.
    pub const GLOBAL_CODE: u16 = 1 << 6;
    /// The blob is eval code.
    pub const EVAL_CODE: u16 = 1 << 7;

    /// Builds a flag set from raw bits.
    pub const fn from_bits(bits: u16) -> Self {
        CodeFlags(bits)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns true if every bit of `flag` is set.
    pub const fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    /// Sets the bits of `flag`.
    pub fn insert(&mut self, flag: u16) {
        self.0 |= flag;
    }

    /// Clears the bits of `flag`.
    pub fn remove(&mut self, flag: u16) {
        self.0 &= !flag;
    }
}

/// A literal-pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// A numeric literal.
    Number(f64),
    /// A string or identifier-name literal.
    String(Rc<str>),
    /// A nested compiled function body.
    Function(Rc<CompiledCode>),
}

/// A hoisted declaration instantiated on frame entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declaration {
    /// Literal index of the binding name.
    pub name: u16,
    /// Literal index of the function body for function declarations,
    /// `None` for plain `var` declarations.
    pub function: Option<u16>,
}

/// An instruction decoded from the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// The decoded opcode.
    pub opcode: Opcode,
    /// Immediate operand values in operand order. Literal indices and
    /// branch offsets are non-negative; `Imm8`/`Imm16` are
    /// sign-extended.
    pub operands: [i32; 2],
    /// Total encoded length in bytes, including the opcode byte(s).
    pub length: usize,
}

/// An immutable compiled-code blob.
///
/// The interpreter executes the byte stream against the literal pool;
/// `register_count` is the compiler-proven upper bound of the operand
/// stack depth.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledCode {
    /// Number of declared formal parameters.
    pub argument_count: u8,
    /// Upper bound of the operand stack depth.
    pub register_count: u16,
    /// Header flags.
    pub flags: CodeFlags,
    /// Literal index of the function name, if any.
    pub function_name: Option<u16>,
    /// The literal pool.
    pub literals: Vec<Literal>,
    /// Literal indices of the formal parameter names, in order.
    /// `argument_count` equals this list's length.
    pub parameters: Vec<u16>,
    /// Hoisted declarations, instantiated on frame entry.
    pub declarations: Vec<Declaration>,
    /// The byte stream.
    pub code: Vec<u8>,
}

impl CompiledCode {
    /// Creates an empty blob.
    pub fn new() -> Self {
        CompiledCode::default()
    }

    /// Returns true if this is strict-mode code.
    pub fn is_strict(&self) -> bool {
        self.flags.contains(CodeFlags::STRICT)
    }

    /// Returns true if literal indices are encoded as two bytes.
    pub fn uses_wide_literals(&self) -> bool {
        self.flags.contains(CodeFlags::UINT16_LITERALS)
    }

    /// Returns the literal at `index`.
    pub fn literal(&self, index: usize) -> &Literal {
        &self.literals[index]
    }

    /// Returns the function name string, if the header names one.
    pub fn name_string(&self) -> Option<&str> {
        self.function_name.and_then(|idx| match self.literals.get(idx as usize) {
            Some(Literal::String(s)) => Some(&**s),
            _ => None,
        })
    }

    /// Decodes the instruction at `pc`.
    ///
    /// Returns `None` if `pc` does not address a well-formed
    /// instruction (unassigned opcode byte or truncated operands).
    pub fn decode_at(&self, pc: usize) -> Option<DecodedInstruction> {
        let byte = *self.code.get(pc)?;
        let (opcode, mut offset) = if byte == EXT_PREFIX {
            let ext = ExtOpcode::from_byte(*self.code.get(pc + 1)?)?;
            (Opcode::Ext(ext), pc + 2)
        } else {
            (Opcode::from_byte(byte)?, pc + 1)
        };

        let wide_literals = self.uses_wide_literals();
        let mut operands = [0i32; 2];
        for (slot, kind) in opcode.operands().iter().enumerate() {
            let value = match kind {
                OperandKind::Literal => {
                    if wide_literals {
                        let raw = self.read_u16(offset)?;
                        offset += 2;
                        raw as i32
                    } else {
                        let raw = *self.code.get(offset)?;
                        offset += 1;
                        raw as i32
                    }
                }
                OperandKind::Imm8 => {
                    let raw = *self.code.get(offset)? as i8;
                    offset += 1;
                    raw as i32
                }
                OperandKind::Imm16 => {
                    let raw = self.read_u16(offset)? as i16;
                    offset += 2;
                    raw as i32
                }
                OperandKind::BranchForward8 | OperandKind::BranchBackward8 => {
                    let raw = *self.code.get(offset)?;
                    offset += 1;
                    raw as i32
                }
                OperandKind::BranchForward16 | OperandKind::BranchBackward16 => {
                    let raw = self.read_u16(offset)?;
                    offset += 2;
                    raw as i32
                }
            };
            operands[slot] = value;
        }

        Some(DecodedInstruction {
            opcode,
            operands,
            length: offset - pc,
        })
    }

    fn read_u16(&self, offset: usize) -> Option<u16> {
        let lo = *self.code.get(offset)?;
        let hi = *self.code.get(offset + 1)?;
        Some(u16::from_le_bytes([lo, hi]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::BinaryOp;

    #[test]
    fn test_flags() {
        let mut flags = CodeFlags::default();
        assert!(!flags.contains(CodeFlags::STRICT));
        flags.insert(CodeFlags::STRICT | CodeFlags::ARGUMENTS_NEEDED);
        assert!(flags.contains(CodeFlags::STRICT));
        assert!(flags.contains(CodeFlags::ARGUMENTS_NEEDED));
        flags.remove(CodeFlags::STRICT);
        assert!(!flags.contains(CodeFlags::STRICT));
        assert_eq!(CodeFlags::from_bits(flags.bits()), flags);
    }

    #[test]
    fn test_decode_simple() {
        let mut code = CompiledCode::new();
        code.code = vec![
            Opcode::PushNumber1.to_byte(),
            Opcode::Return.to_byte(),
        ];
        let first = code.decode_at(0).unwrap();
        assert_eq!(first.opcode, Opcode::PushNumber1);
        assert_eq!(first.length, 1);
        let second = code.decode_at(first.length).unwrap();
        assert_eq!(second.opcode, Opcode::Return);
    }

    #[test]
    fn test_decode_narrow_and_wide_literals() {
        let mut code = CompiledCode::new();
        code.code = vec![Opcode::PushLiteral.to_byte(), 7];
        let ins = code.decode_at(0).unwrap();
        assert_eq!(ins.operands[0], 7);
        assert_eq!(ins.length, 2);

        code.flags.insert(CodeFlags::UINT16_LITERALS);
        code.code = vec![Opcode::PushLiteral.to_byte(), 0x34, 0x12];
        let ins = code.decode_at(0).unwrap();
        assert_eq!(ins.operands[0], 0x1234);
        assert_eq!(ins.length, 3);
    }

    #[test]
    fn test_decode_signed_immediates() {
        let mut code = CompiledCode::new();
        code.code = vec![Opcode::PushNumberByte.to_byte(), 0xFF];
        assert_eq!(code.decode_at(0).unwrap().operands[0], -1);

        code.code = vec![Opcode::PushNumberTwoByte.to_byte(), 0x00, 0x80];
        assert_eq!(code.decode_at(0).unwrap().operands[0], -32768);
    }

    #[test]
    fn test_decode_binary_with_two_literals() {
        let mut code = CompiledCode::new();
        code.code = vec![
            Opcode::BinaryWithTwoLiterals(BinaryOp::Add).to_byte(),
            1,
            2,
        ];
        let ins = code.decode_at(0).unwrap();
        assert_eq!(ins.opcode, Opcode::BinaryWithTwoLiterals(BinaryOp::Add));
        assert_eq!(ins.operands, [1, 2]);
        assert_eq!(ins.length, 3);
    }

    #[test]
    fn test_decode_ext_plane() {
        let mut code = CompiledCode::new();
        code.code = vec![EXT_PREFIX, ExtOpcode::ForInNext.to_byte(), 0x10, 0x00];
        let ins = code.decode_at(0).unwrap();
        assert_eq!(ins.opcode, Opcode::Ext(ExtOpcode::ForInNext));
        assert_eq!(ins.operands[0], 0x10);
        assert_eq!(ins.length, 4);
    }

    #[test]
    fn test_decode_truncated_is_none() {
        let mut code = CompiledCode::new();
        code.code = vec![Opcode::PushLiteral.to_byte()];
        assert!(code.decode_at(0).is_none());
        assert!(code.decode_at(10).is_none());
    }

    #[test]
    fn test_name_string() {
        let mut code = CompiledCode::new();
        code.literals.push(Literal::String("outer".into()));
        assert_eq!(code.name_string(), None);
        code.function_name = Some(0);
        assert_eq!(code.name_string(), Some("outer"));
    }
}
