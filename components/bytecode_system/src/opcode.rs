//! The instruction set.
//!
//! Opcodes are one byte. The binary operators occupy three contiguous
//! byte planes selecting the operand encoding: plain (both operands on
//! the stack), `_WITH_LITERAL` (right operand fused from the literal
//! pool), and `_WITH_TWO_LITERALS` (both operands fused). Rarely used
//! instructions live on a second plane behind the [`EXT_PREFIX`] byte.
//!
//! Branch operands are relative to the address of the opcode byte
//! itself: forward branches add the offset, backward branches subtract
//! it. Narrow branches carry one offset byte, wide branches two.

/// Prefix byte introducing the extended opcode plane.
pub const EXT_PREFIX: u8 = 0xFF;

/// First byte of the plain binary-operator plane.
const BINARY_BASE: u8 = 0x50;
/// First byte of the `_WITH_LITERAL` binary-operator plane.
const BINARY_LITERAL_BASE: u8 = 0x70;
/// First byte of the `_WITH_TWO_LITERALS` binary-operator plane.
const BINARY_TWO_LITERALS_BASE: u8 = 0x90;

/// Binary operator index shared by the three operand encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryOp {
    /// `+` (numeric addition or string concatenation)
    Add = 0,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    ShiftLeft,
    /// `>>`
    ShiftRight,
    /// `>>>`
    ShiftRightUnsigned,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessEqual,
    /// `>=`
    GreaterEqual,
    /// `==`
    Equals,
    /// `!=`
    NotEquals,
    /// `===`
    StrictEquals,
    /// `!==`
    StrictNotEquals,
    /// `in`
    In,
    /// `instanceof`
    InstanceOf,
}

/// Number of binary operators in each plane.
pub const BINARY_OP_COUNT: u8 = 21;

impl BinaryOp {
    /// Returns the operator's index within its byte plane.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Rebuilds an operator from its plane index.
    pub fn from_index(index: u8) -> Option<BinaryOp> {
        if index >= BINARY_OP_COUNT {
            return None;
        }
        const ALL: [BinaryOp; BINARY_OP_COUNT as usize] = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Mod,
            BinaryOp::BitAnd,
            BinaryOp::BitOr,
            BinaryOp::BitXor,
            BinaryOp::ShiftLeft,
            BinaryOp::ShiftRight,
            BinaryOp::ShiftRightUnsigned,
            BinaryOp::Less,
            BinaryOp::Greater,
            BinaryOp::LessEqual,
            BinaryOp::GreaterEqual,
            BinaryOp::Equals,
            BinaryOp::NotEquals,
            BinaryOp::StrictEquals,
            BinaryOp::StrictNotEquals,
            BinaryOp::In,
            BinaryOp::InstanceOf,
        ];
        Some(ALL[index as usize])
    }

    /// Returns the source-level operator token.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::ShiftRightUnsigned => ">>>",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::StrictEquals => "===",
            BinaryOp::StrictNotEquals => "!==",
            BinaryOp::In => "in",
            BinaryOp::InstanceOf => "instanceof",
        }
    }
}

/// Kind of an immediate operand following an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Literal-pool index; one or two bytes depending on the
    /// `UINT16_LITERALS` header flag.
    Literal,
    /// One signed byte.
    Imm8,
    /// Two bytes, little endian, signed.
    Imm16,
    /// One-byte forward branch offset.
    BranchForward8,
    /// Two-byte forward branch offset.
    BranchForward16,
    /// One-byte backward branch offset.
    BranchBackward8,
    /// Two-byte backward branch offset.
    BranchBackward16,
}

/// Declared stack behavior of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    /// Fixed number of popped and pushed slots.
    Fixed {
        /// Slots consumed from the operand stack.
        pops: u8,
        /// Slots produced on the operand stack.
        pushes: u8,
    },
    /// Effect depends on an immediate (calls, array appends).
    Dynamic,
}

impl StackEffect {
    const fn fixed(pops: u8, pushes: u8) -> StackEffect {
        StackEffect::Fixed { pops, pushes }
    }
}

/// The primary instruction plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Discard the top of stack.
    Pop,
    /// Push one literal-pool value.
    PushLiteral,
    /// Push two literal-pool values.
    PushTwoLiterals,
    /// Push the frame's `this` binding.
    PushThis,
    /// Push `true`.
    PushTrue,
    /// Push `false`.
    PushFalse,
    /// Push `null`.
    PushNull,
    /// Push `undefined`.
    PushUndefined,
    /// Push the number `0`.
    PushNumber0,
    /// Push the number `1`.
    PushNumber1,
    /// Push a signed one-byte integer.
    PushNumberByte,
    /// Push a signed two-byte integer.
    PushNumberTwoByte,
    /// Resolve an identifier and push its value.
    PushIdent,
    /// Push the array-hole sentinel.
    PushElision,
    /// `[obj, key]` → `[obj[key]]`.
    PropGet,
    /// `[obj]` → `[obj[lit]]`.
    PropLiteralGet,
    /// `[]` → `[identA[litB]]` (base identifier and key both fused).
    PropLiteralLiteralGet,
    /// `[obj, key]` → `[obj, key, obj[key]]` (compound-assignment form).
    AssignPropGet,
    /// `[obj]` → `[obj, lit, obj[lit]]` (compound-assignment form).
    AssignPropLiteralGet,
    /// `[obj, key, value]` → `[value]`; stores `obj[key]`.
    Assign,
    /// `[value]` → `[value]`; stores into an identifier binding.
    AssignIdent,
    /// `[obj, value]` → `[obj]`; defines own data property named by the
    /// literal (object-literal installs).
    SetProperty,
    /// Push a fresh empty object.
    CreateObject,
    /// Push a fresh empty array.
    CreateArray,
    /// `[arr, v1..vN]` → `[arr]`; appends N elements.
    ArrayAppend,
    /// `[v]` → `[typeof v]`.
    Typeof,
    /// `[]` → `[typeof ident]`; unresolvable yields `"undefined"`.
    TypeofIdent,
    /// `[obj, key]` → `[bool]`.
    Delete,
    /// `[]` → `[bool]`; deletes an identifier binding.
    DeleteIdent,
    /// `[v]` → `[!ToBoolean(v)]`.
    Not,
    /// `[v]` → `[~ToInt32(v)]`.
    BitNot,
    /// `[v]` → `[-ToNumber(v)]`.
    Negate,
    /// `[v]` → `[ToNumber(v)]` (unary plus).
    ToNumber,
    /// `[]` → `[new]`; pre-increment of an identifier binding.
    PreIncrIdent,
    /// `[]` → `[new]`; pre-decrement of an identifier binding.
    PreDecrIdent,
    /// `[]` → `[old]`; post-increment of an identifier binding.
    PostIncrIdent,
    /// `[]` → `[old]`; post-decrement of an identifier binding.
    PostDecrIdent,
    /// `[obj, key]` → `[new]`.
    PreIncrProp,
    /// `[obj, key]` → `[new]`.
    PreDecrProp,
    /// `[obj, key]` → `[old]`.
    PostIncrProp,
    /// `[obj, key]` → `[old]`.
    PostDecrProp,
    /// Pop and branch forward if `ToBoolean` is true.
    BranchIfTrue,
    /// Wide form of [`Opcode::BranchIfTrue`].
    BranchIfTrueWide,
    /// Pop and branch forward if `ToBoolean` is false.
    BranchIfFalse,
    /// Wide form of [`Opcode::BranchIfFalse`].
    BranchIfFalseWide,
    /// Short-circuit `||`: branch if true, popping only when the branch
    /// is not taken.
    BranchIfLogicalTrue,
    /// Wide form of [`Opcode::BranchIfLogicalTrue`].
    BranchIfLogicalTrueWide,
    /// Short-circuit `&&`: branch if false, popping only when the
    /// branch is not taken.
    BranchIfLogicalFalse,
    /// Wide form of [`Opcode::BranchIfLogicalFalse`].
    BranchIfLogicalFalseWide,
    /// Unconditional forward jump.
    JumpForward,
    /// Wide form of [`Opcode::JumpForward`].
    JumpForwardWide,
    /// Unconditional backward jump.
    JumpBackward,
    /// Wide form of [`Opcode::JumpBackward`].
    JumpBackwardWide,
    /// Push a try handler record; operands are the catch and finally
    /// entry offsets (zero when absent).
    Try,
    /// Normal end of a try block.
    TryEnd,
    /// Normal end of a catch block.
    CatchEnd,
    /// End of a finally block; resumes the pending completion.
    FinallyEnd,
    /// `[v]` → abrupt completion carrying `v`.
    Throw,
    /// `[v]` → return `v` from the frame.
    ReturnValue,
    /// Return `undefined` from the frame.
    Return,
    /// `[func, a1..aN]` → `[result]`.
    Call,
    /// `[func]` → `[result]`.
    Call0,
    /// `[obj, key, a1..aN]` → `[result]`; `this` is the base object.
    CallProp,
    /// `[obj, key]` → `[result]`.
    Call0Prop,
    /// `[func, a1..aN]` → `[result]`; direct `eval` call site.
    CallEval,
    /// `[ctor, a1..aN]` → `[result]`; construct.
    New,
    /// `[v]` → `[v, v]`.
    Dup,
    /// Binary operator, both operands on the stack.
    Binary(BinaryOp),
    /// Binary operator, right operand fused from the literal pool.
    BinaryWithLiteral(BinaryOp),
    /// Binary operator, both operands fused from the literal pool.
    BinaryWithTwoLiterals(BinaryOp),
    /// Extended-plane instruction.
    Ext(ExtOpcode),
}

/// The extended instruction plane behind [`EXT_PREFIX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtOpcode {
    /// `[obj, func]` → `[obj]`; installs a getter named by the literal.
    SetGetter = 0,
    /// `[obj, func]` → `[obj]`; installs a setter named by the literal.
    SetSetter = 1,
    /// `[v]` → `[]`; enters an object lexical environment for `with`.
    WithEnter = 2,
    /// Leaves the innermost entered lexical environment.
    LexEnvExit = 3,
    /// `[exception]` → `[]`; enters a declarative environment binding
    /// the literal name to the caught exception.
    CatchEnter = 4,
    /// `[v]` → `[]`; begins for-in enumeration, branching past the loop
    /// when there is nothing to enumerate.
    ForInInit = 5,
    /// Pushes the next enumerated name, or branches past the loop when
    /// the collection is exhausted.
    ForInNext = 6,
    /// `[v]` → `[]`; records the frame completion value (global and
    /// eval code).
    StoreCompletion = 7,
    /// Unwinds a number of frame contexts (environments, for-in
    /// iterators, try handlers running their finally blocks) and jumps
    /// to a signed pc-relative target.
    JumpViaFinally = 8,
}

impl ExtOpcode {
    /// Rebuilds an extended opcode from its byte.
    pub fn from_byte(byte: u8) -> Option<ExtOpcode> {
        match byte {
            0 => Some(ExtOpcode::SetGetter),
            1 => Some(ExtOpcode::SetSetter),
            2 => Some(ExtOpcode::WithEnter),
            3 => Some(ExtOpcode::LexEnvExit),
            4 => Some(ExtOpcode::CatchEnter),
            5 => Some(ExtOpcode::ForInInit),
            6 => Some(ExtOpcode::ForInNext),
            7 => Some(ExtOpcode::StoreCompletion),
            8 => Some(ExtOpcode::JumpViaFinally),
            _ => None,
        }
    }

    /// Returns the encoded byte (the one after the prefix).
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Immediate operands of this extended opcode.
    pub fn operands(self) -> &'static [OperandKind] {
        match self {
            ExtOpcode::SetGetter | ExtOpcode::SetSetter | ExtOpcode::CatchEnter => {
                &[OperandKind::Literal]
            }
            ExtOpcode::WithEnter | ExtOpcode::LexEnvExit => &[],
            ExtOpcode::ForInInit | ExtOpcode::ForInNext => &[OperandKind::BranchForward16],
            ExtOpcode::StoreCompletion => &[],
            // Context count, then a signed pc-relative jump target.
            ExtOpcode::JumpViaFinally => &[OperandKind::Imm8, OperandKind::Imm16],
        }
    }

    /// Declared stack behavior.
    pub fn stack_effect(self) -> StackEffect {
        match self {
            ExtOpcode::SetGetter | ExtOpcode::SetSetter => StackEffect::fixed(2, 1),
            ExtOpcode::WithEnter | ExtOpcode::CatchEnter => StackEffect::fixed(1, 0),
            ExtOpcode::LexEnvExit => StackEffect::fixed(0, 0),
            ExtOpcode::ForInInit => StackEffect::fixed(1, 0),
            ExtOpcode::ForInNext => StackEffect::fixed(0, 1),
            ExtOpcode::StoreCompletion => StackEffect::fixed(1, 0),
            ExtOpcode::JumpViaFinally => StackEffect::fixed(0, 0),
        }
    }

    /// Mnemonic for the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            ExtOpcode::SetGetter => "SET_GETTER",
            ExtOpcode::SetSetter => "SET_SETTER",
            ExtOpcode::WithEnter => "WITH_ENTER",
            ExtOpcode::LexEnvExit => "LEX_ENV_EXIT",
            ExtOpcode::CatchEnter => "CATCH_ENTER",
            ExtOpcode::ForInInit => "FOR_IN_INIT",
            ExtOpcode::ForInNext => "FOR_IN_NEXT",
            ExtOpcode::StoreCompletion => "STORE_COMPLETION",
            ExtOpcode::JumpViaFinally => "JUMP_VIA_FINALLY",
        }
    }
}

impl Opcode {
    /// Encodes this opcode to its byte value.
    ///
    /// Extended opcodes encode to [`EXT_PREFIX`]; the second byte comes
    /// from [`ExtOpcode::to_byte`].
    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Pop => 0x00,
            Opcode::PushLiteral => 0x01,
            Opcode::PushTwoLiterals => 0x02,
            Opcode::PushThis => 0x03,
            Opcode::PushTrue => 0x04,
            Opcode::PushFalse => 0x05,
            Opcode::PushNull => 0x06,
            Opcode::PushUndefined => 0x07,
            Opcode::PushNumber0 => 0x08,
            Opcode::PushNumber1 => 0x09,
            Opcode::PushNumberByte => 0x0A,
            Opcode::PushNumberTwoByte => 0x0B,
            Opcode::PushIdent => 0x0C,
            Opcode::PushElision => 0x0D,
            Opcode::PropGet => 0x0E,
            Opcode::PropLiteralGet => 0x0F,
            Opcode::PropLiteralLiteralGet => 0x10,
            Opcode::AssignPropGet => 0x11,
            Opcode::AssignPropLiteralGet => 0x12,
            Opcode::Assign => 0x13,
            Opcode::AssignIdent => 0x14,
            Opcode::SetProperty => 0x15,
            Opcode::CreateObject => 0x16,
            Opcode::CreateArray => 0x17,
            Opcode::ArrayAppend => 0x18,
            Opcode::Typeof => 0x19,
            Opcode::TypeofIdent => 0x1A,
            Opcode::Delete => 0x1B,
            Opcode::DeleteIdent => 0x1C,
            Opcode::Not => 0x1D,
            Opcode::BitNot => 0x1E,
            Opcode::Negate => 0x1F,
            Opcode::ToNumber => 0x20,
            Opcode::PreIncrIdent => 0x21,
            Opcode::PreDecrIdent => 0x22,
            Opcode::PostIncrIdent => 0x23,
            Opcode::PostDecrIdent => 0x24,
            Opcode::PreIncrProp => 0x25,
            Opcode::PreDecrProp => 0x26,
            Opcode::PostIncrProp => 0x27,
            Opcode::PostDecrProp => 0x28,
            Opcode::BranchIfTrue => 0x29,
            Opcode::BranchIfTrueWide => 0x2A,
            Opcode::BranchIfFalse => 0x2B,
            Opcode::BranchIfFalseWide => 0x2C,
            Opcode::BranchIfLogicalTrue => 0x2D,
            Opcode::BranchIfLogicalTrueWide => 0x2E,
            Opcode::BranchIfLogicalFalse => 0x2F,
            Opcode::BranchIfLogicalFalseWide => 0x30,
            Opcode::JumpForward => 0x31,
            Opcode::JumpForwardWide => 0x32,
            Opcode::JumpBackward => 0x33,
            Opcode::JumpBackwardWide => 0x34,
            Opcode::Try => 0x35,
            Opcode::TryEnd => 0x36,
            Opcode::CatchEnd => 0x37,
            Opcode::FinallyEnd => 0x38,
            Opcode::Throw => 0x39,
            Opcode::ReturnValue => 0x3A,
            Opcode::Return => 0x3B,
            Opcode::Call => 0x3C,
            Opcode::Call0 => 0x3D,
            Opcode::CallProp => 0x3E,
            Opcode::Call0Prop => 0x3F,
            Opcode::CallEval => 0x40,
            Opcode::New => 0x41,
            Opcode::Dup => 0x42,
            Opcode::Binary(op) => BINARY_BASE + op.index(),
            Opcode::BinaryWithLiteral(op) => BINARY_LITERAL_BASE + op.index(),
            Opcode::BinaryWithTwoLiterals(op) => BINARY_TWO_LITERALS_BASE + op.index(),
            Opcode::Ext(_) => EXT_PREFIX,
        }
    }

    /// Decodes a primary-plane byte.
    ///
    /// Returns `None` for unassigned bytes and for [`EXT_PREFIX`] (the
    /// caller reads the second byte and uses [`ExtOpcode::from_byte`]).
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        if (BINARY_BASE..BINARY_BASE + BINARY_OP_COUNT).contains(&byte) {
            return BinaryOp::from_index(byte - BINARY_BASE).map(Opcode::Binary);
        }
        if (BINARY_LITERAL_BASE..BINARY_LITERAL_BASE + BINARY_OP_COUNT).contains(&byte) {
            return BinaryOp::from_index(byte - BINARY_LITERAL_BASE).map(Opcode::BinaryWithLiteral);
        }
        if (BINARY_TWO_LITERALS_BASE..BINARY_TWO_LITERALS_BASE + BINARY_OP_COUNT).contains(&byte) {
            return BinaryOp::from_index(byte - BINARY_TWO_LITERALS_BASE)
                .map(Opcode::BinaryWithTwoLiterals);
        }
        let op = match byte {
            0x00 => Opcode::Pop,
            0x01 => Opcode::PushLiteral,
            0x02 => Opcode::PushTwoLiterals,
            0x03 => Opcode::PushThis,
            0x04 => Opcode::PushTrue,
            0x05 => Opcode::PushFalse,
            0x06 => Opcode::PushNull,
            0x07 => Opcode::PushUndefined,
            0x08 => Opcode::PushNumber0,
            0x09 => Opcode::PushNumber1,
            0x0A => Opcode::PushNumberByte,
            0x0B => Opcode::PushNumberTwoByte,
            0x0C => Opcode::PushIdent,
            0x0D => Opcode::PushElision,
            0x0E => Opcode::PropGet,
            0x0F => Opcode::PropLiteralGet,
            0x10 => Opcode::PropLiteralLiteralGet,
            0x11 => Opcode::AssignPropGet,
            0x12 => Opcode::AssignPropLiteralGet,
            0x13 => Opcode::Assign,
            0x14 => Opcode::AssignIdent,
            0x15 => Opcode::SetProperty,
            0x16 => Opcode::CreateObject,
            0x17 => Opcode::CreateArray,
            0x18 => Opcode::ArrayAppend,
            0x19 => Opcode::Typeof,
            0x1A => Opcode::TypeofIdent,
            0x1B => Opcode::Delete,
            0x1C => Opcode::DeleteIdent,
            0x1D => Opcode::Not,
            0x1E => Opcode::BitNot,
            0x1F => Opcode::Negate,
            0x20 => Opcode::ToNumber,
            0x21 => Opcode::PreIncrIdent,
            0x22 => Opcode::PreDecrIdent,
            0x23 => Opcode::PostIncrIdent,
            0x24 => Opcode::PostDecrIdent,
            0x25 => Opcode::PreIncrProp,
            0x26 => Opcode::PreDecrProp,
            0x27 => Opcode::PostIncrProp,
            0x28 => Opcode::PostDecrProp,
            0x29 => Opcode::BranchIfTrue,
            0x2A => Opcode::BranchIfTrueWide,
            0x2B => Opcode::BranchIfFalse,
            0x2C => Opcode::BranchIfFalseWide,
            0x2D => Opcode::BranchIfLogicalTrue,
            0x2E => Opcode::BranchIfLogicalTrueWide,
            0x2F => Opcode::BranchIfLogicalFalse,
            0x30 => Opcode::BranchIfLogicalFalseWide,
            0x31 => Opcode::JumpForward,
            0x32 => Opcode::JumpForwardWide,
            0x33 => Opcode::JumpBackward,
            0x34 => Opcode::JumpBackwardWide,
            0x35 => Opcode::Try,
            0x36 => Opcode::TryEnd,
            0x37 => Opcode::CatchEnd,
            0x38 => Opcode::FinallyEnd,
            0x39 => Opcode::Throw,
            0x3A => Opcode::ReturnValue,
            0x3B => Opcode::Return,
            0x3C => Opcode::Call,
            0x3D => Opcode::Call0,
            0x3E => Opcode::CallProp,
            0x3F => Opcode::Call0Prop,
            0x40 => Opcode::CallEval,
            0x41 => Opcode::New,
            0x42 => Opcode::Dup,
            _ => return None,
        };
        Some(op)
    }

    /// Immediate operands of this opcode.
    pub fn operands(self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Opcode::PushLiteral
            | Opcode::PushIdent
            | Opcode::PropLiteralGet
            | Opcode::AssignPropLiteralGet
            | Opcode::AssignIdent
            | Opcode::SetProperty
            | Opcode::TypeofIdent
            | Opcode::DeleteIdent
            | Opcode::PreIncrIdent
            | Opcode::PreDecrIdent
            | Opcode::PostIncrIdent
            | Opcode::PostDecrIdent
            | Opcode::BinaryWithLiteral(_) => &[Literal],
            Opcode::PushTwoLiterals
            | Opcode::PropLiteralLiteralGet
            | Opcode::BinaryWithTwoLiterals(_) => &[Literal, Literal],
            Opcode::PushNumberByte => &[Imm8],
            Opcode::PushNumberTwoByte => &[Imm16],
            Opcode::ArrayAppend
            | Opcode::Call
            | Opcode::CallProp
            | Opcode::CallEval
            | Opcode::New => &[Imm8],
            Opcode::BranchIfTrue
            | Opcode::BranchIfFalse
            | Opcode::BranchIfLogicalTrue
            | Opcode::BranchIfLogicalFalse
            | Opcode::JumpForward => &[BranchForward8],
            Opcode::BranchIfTrueWide
            | Opcode::BranchIfFalseWide
            | Opcode::BranchIfLogicalTrueWide
            | Opcode::BranchIfLogicalFalseWide
            | Opcode::JumpForwardWide => &[BranchForward16],
            Opcode::JumpBackward => &[BranchBackward8],
            Opcode::JumpBackwardWide => &[BranchBackward16],
            Opcode::Try => &[BranchForward16, BranchForward16],
            Opcode::Ext(ext) => ext.operands(),
            _ => &[],
        }
    }

    /// Declared stack behavior, used by the compiler's depth accounting
    /// and the interpreter's stack verifier.
    pub fn stack_effect(self) -> StackEffect {
        match self {
            Opcode::Pop => StackEffect::fixed(1, 0),
            Opcode::PushLiteral
            | Opcode::PushThis
            | Opcode::PushTrue
            | Opcode::PushFalse
            | Opcode::PushNull
            | Opcode::PushUndefined
            | Opcode::PushNumber0
            | Opcode::PushNumber1
            | Opcode::PushNumberByte
            | Opcode::PushNumberTwoByte
            | Opcode::PushIdent
            | Opcode::PushElision
            | Opcode::PropLiteralLiteralGet
            | Opcode::TypeofIdent
            | Opcode::DeleteIdent
            | Opcode::PreIncrIdent
            | Opcode::PreDecrIdent
            | Opcode::PostIncrIdent
            | Opcode::PostDecrIdent
            | Opcode::BinaryWithTwoLiterals(_) => StackEffect::fixed(0, 1),
            Opcode::PushTwoLiterals => StackEffect::fixed(0, 2),
            Opcode::PropGet | Opcode::Delete | Opcode::Binary(_) => StackEffect::fixed(2, 1),
            Opcode::PropLiteralGet
            | Opcode::Typeof
            | Opcode::Not
            | Opcode::BitNot
            | Opcode::Negate
            | Opcode::ToNumber
            | Opcode::BinaryWithLiteral(_) => StackEffect::fixed(1, 1),
            Opcode::AssignPropGet => StackEffect::fixed(2, 3),
            Opcode::AssignPropLiteralGet => StackEffect::fixed(1, 3),
            Opcode::Assign => StackEffect::fixed(3, 1),
            Opcode::AssignIdent => StackEffect::fixed(1, 1),
            Opcode::SetProperty => StackEffect::fixed(2, 1),
            Opcode::CreateObject | Opcode::CreateArray => StackEffect::fixed(0, 1),
            Opcode::PreIncrProp
            | Opcode::PreDecrProp
            | Opcode::PostIncrProp
            | Opcode::PostDecrProp => StackEffect::fixed(2, 1),
            Opcode::BranchIfTrue
            | Opcode::BranchIfTrueWide
            | Opcode::BranchIfFalse
            | Opcode::BranchIfFalseWide => StackEffect::fixed(1, 0),
            // Short-circuit branches pop only when the branch is not
            // taken; the conservative bound is no net change.
            Opcode::BranchIfLogicalTrue
            | Opcode::BranchIfLogicalTrueWide
            | Opcode::BranchIfLogicalFalse
            | Opcode::BranchIfLogicalFalseWide => StackEffect::fixed(0, 0),
            Opcode::JumpForward
            | Opcode::JumpForwardWide
            | Opcode::JumpBackward
            | Opcode::JumpBackwardWide
            | Opcode::Try
            | Opcode::TryEnd
            | Opcode::CatchEnd
            | Opcode::FinallyEnd
            | Opcode::Return => StackEffect::fixed(0, 0),
            Opcode::Throw | Opcode::ReturnValue => StackEffect::fixed(1, 0),
            Opcode::Dup => StackEffect::fixed(1, 2),
            Opcode::Call | Opcode::CallProp | Opcode::CallEval | Opcode::New
            | Opcode::ArrayAppend => StackEffect::Dynamic,
            Opcode::Call0 => StackEffect::fixed(1, 1),
            Opcode::Call0Prop => StackEffect::fixed(2, 1),
            Opcode::Ext(ext) => ext.stack_effect(),
        }
    }

    /// Mnemonic for the disassembler.
    pub fn name(self) -> String {
        match self {
            Opcode::Binary(op) => format!("BINARY {}", op.symbol()),
            Opcode::BinaryWithLiteral(op) => format!("BINARY_LIT {}", op.symbol()),
            Opcode::BinaryWithTwoLiterals(op) => format!("BINARY_LIT_LIT {}", op.symbol()),
            Opcode::Ext(ext) => ext.name().to_string(),
            other => format!("{:?}", other).to_uppercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_primary() -> Vec<Opcode> {
        let mut ops = Vec::new();
        for byte in 0u8..=0xFE {
            if let Some(op) = Opcode::from_byte(byte) {
                ops.push(op);
            }
        }
        ops
    }

    #[test]
    fn test_byte_round_trip() {
        for op in all_primary() {
            assert_eq!(Opcode::from_byte(op.to_byte()), Some(op));
        }
    }

    #[test]
    fn test_ext_round_trip() {
        for byte in 0u8..16 {
            if let Some(ext) = ExtOpcode::from_byte(byte) {
                assert_eq!(ext.to_byte(), byte);
                assert_eq!(Opcode::Ext(ext).to_byte(), EXT_PREFIX);
            }
        }
    }

    #[test]
    fn test_binary_planes_distinct() {
        let plain = Opcode::Binary(BinaryOp::Add).to_byte();
        let lit = Opcode::BinaryWithLiteral(BinaryOp::Add).to_byte();
        let two = Opcode::BinaryWithTwoLiterals(BinaryOp::Add).to_byte();
        assert_ne!(plain, lit);
        assert_ne!(lit, two);
        assert_eq!(
            Opcode::from_byte(two),
            Some(Opcode::BinaryWithTwoLiterals(BinaryOp::Add))
        );
    }

    #[test]
    fn test_binary_index_round_trip() {
        for idx in 0..BINARY_OP_COUNT {
            let op = BinaryOp::from_index(idx).unwrap();
            assert_eq!(op.index(), idx);
        }
        assert!(BinaryOp::from_index(BINARY_OP_COUNT).is_none());
    }

    #[test]
    fn test_every_opcode_declares_signature() {
        for op in all_primary() {
            // operands() and stack_effect() must both be total.
            let _ = op.operands();
            let _ = op.stack_effect();
        }
    }

    #[test]
    fn test_fused_forms_share_result_arity() {
        for idx in 0..BINARY_OP_COUNT {
            let op = BinaryOp::from_index(idx).unwrap();
            assert_eq!(
                Opcode::Binary(op).stack_effect(),
                StackEffect::Fixed { pops: 2, pushes: 1 }
            );
            assert_eq!(
                Opcode::BinaryWithLiteral(op).stack_effect(),
                StackEffect::Fixed { pops: 1, pushes: 1 }
            );
            assert_eq!(
                Opcode::BinaryWithTwoLiterals(op).stack_effect(),
                StackEffect::Fixed { pops: 0, pushes: 1 }
            );
        }
    }
}
