//! The single-pass byte-code compiler.
//!
//! Parsing and code generation are one pass: a Pratt-style expression
//! parser driven by the ES5.1 precedence levels emits instructions as
//! it goes. Literal pushes are staged in a last-emitted descriptor and
//! fused into the combined operand encodings when the next instruction
//! accepts them; the staging slot is flushed before any point whose pc
//! another instruction could observe. Forward branches are emitted
//! narrow and relaxed to the wide encoding at the end of the function
//! when their span demands it.
//!
//! Statements the update expression of `for` and the clauses of
//! `switch` appear in source before the code that must precede them;
//! the compiler replays the saved token ranges instead of building a
//! tree.

use crate::error::ParseError;
use crate::lexer::{Keyword, Lexer, Punct, Token, TokenKind};
use crate::scope::{find_matching_brace, prescan};
use bytecode_system::{
    BinaryOp, CodeFlags, CompiledCode, Declaration, ExtOpcode, Literal, Opcode, StackEffect,
    EXT_PREFIX,
};
use core_types::SourcePosition;
use std::collections::HashMap;
use std::rc::Rc;

/// The kind of top-level code being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Global-scope code.
    Global,
    /// Eval code (runs in the caller's environment).
    Eval,
}

/// Compiles a complete source text into a compiled-code blob.
///
/// `strict` forces strict mode from the outside (the caller of a
/// direct `eval` passes its own strictness); a `"use strict"`
/// directive in the source promotes it regardless.
pub fn parse_program(
    source: &str,
    strict: bool,
    kind: ProgramKind,
) -> Result<CompiledCode, ParseError> {
    let tokens = Lexer::tokenize(source)?;
    let end = tokens.len() - 1; // index of Eof
    let body_kind = match kind {
        ProgramKind::Global => BodyKind::Global,
        ProgramKind::Eval => BodyKind::Eval,
    };
    let compiler = Compiler::new(&tokens, 0, end, strict, body_kind);
    compiler.compile_body(&[], None, false)
}

/// Maximum span a narrow branch operand may cover.
const NARROW_BRANCH_LIMIT: usize = 0xFF;
/// Chunk size for array-literal element appends.
const ARRAY_APPEND_CHUNK: u16 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Global,
    Eval,
    Function,
}

/// An identifier reference that has not been loaded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IdentRef {
    lit: u16,
    is_eval: bool,
    is_arguments: bool,
}

/// A parsed left-hand side whose load is deferred until the parser
/// knows whether it is read, written, or called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ref {
    /// The value is already on the operand stack.
    None,
    /// An unresolved identifier.
    Ident(IdentRef),
    /// `ident.name` with nothing emitted yet.
    IdentProp { base: IdentRef, name: u16 },
    /// `<stack>.name`: the base object is on the stack.
    StackProp { name: u16 },
    /// `<stack>[<stack>]`: base and key are on the stack.
    Member,
}

/// The last-emitted staging descriptor for peephole fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastEmitted {
    None,
    PushLiteral { pc: usize, lit: u16 },
    PushTwoLiterals { pc: usize, a: u16, b: u16 },
}

/// A recorded branch, finalized by the relaxation pass.
#[derive(Debug, Clone, Copy)]
struct Branch {
    /// pc of the opcode byte; offsets are relative to it.
    pc: usize,
    /// Byte offset of the operand.
    operand_at: usize,
    /// Operand width in bytes.
    width: u8,
    /// Narrow encodings may be widened by relaxation.
    widenable: bool,
    /// Backward branches subtract the offset.
    backward: bool,
    /// Signed pc-relative operand (`JUMP_VIA_FINALLY`).
    signed: bool,
    /// Absolute target pc; `None` stays zero (absent TRY operands).
    target: Option<usize>,
}

/// Static context for break/continue resolution.
struct FlowContext {
    labels: Vec<String>,
    breakable: bool,
    is_loop: bool,
    breaks: Vec<usize>,
    continues: Vec<usize>,
    continue_target: Option<usize>,
    ctx_depth_break: u8,
    ctx_depth_continue: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LitKey {
    Num(u64),
    Str(String),
}

struct Compiler<'t> {
    tokens: &'t [Token],
    pos: usize,
    end: usize,
    body_kind: BodyKind,
    strict: bool,
    code: CompiledCode,
    literal_map: HashMap<LitKey, u16>,
    wide_literals: bool,
    depth: u16,
    max_depth: u16,
    branches: Vec<Branch>,
    flow: Vec<FlowContext>,
    ctx_depth: u8,
    last: LastEmitted,
}

impl<'t> Compiler<'t> {
    fn new(tokens: &'t [Token], start: usize, end: usize, strict: bool, kind: BodyKind) -> Self {
        Compiler {
            tokens,
            pos: start,
            end,
            body_kind: kind,
            strict,
            code: CompiledCode::new(),
            literal_map: HashMap::new(),
            wide_literals: false,
            depth: 0,
            max_depth: 0,
            branches: Vec::new(),
            flow: Vec::new(),
            ctx_depth: 0,
            last: LastEmitted::None,
        }
    }

    // ----- token stream -------------------------------------------------

    fn position(&self) -> SourcePosition {
        self.tokens[self.pos].position
    }

    fn kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn newline_before(&self) -> bool {
        self.tokens[self.pos].newline_before
    }

    fn bump(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn check_punct(&self, punct: Punct) -> bool {
        matches!(self.kind(), TokenKind::Punct(p) if *p == punct)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.check_punct(punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct, what: &str) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(ParseError::syntax(
                format!("expected {}", what),
                self.position(),
            ))
        }
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.kind(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.kind() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            _ => Err(ParseError::syntax(
                format!("expected {}", what),
                self.position(),
            )),
        }
    }

    /// Consumes a statement terminator, applying automatic semicolon
    /// insertion before `}`, end of input, and line terminators.
    fn expect_semicolon(&mut self) -> Result<(), ParseError> {
        if self.eat_punct(Punct::Semicolon) {
            return Ok(());
        }
        if self.check_punct(Punct::RBrace)
            || matches!(self.kind(), TokenKind::Eof)
            || self.newline_before()
        {
            return Ok(());
        }
        Err(ParseError::syntax("expected ';'", self.position()))
    }

    // ----- literal pool -------------------------------------------------

    fn intern_literal(&mut self, key: LitKey, literal: Literal) -> Result<u16, ParseError> {
        if let Some(&idx) = self.literal_map.get(&key) {
            return Ok(idx);
        }
        let idx = self.push_literal_entry(literal)?;
        self.literal_map.insert(key, idx);
        Ok(idx)
    }

    fn push_literal_entry(&mut self, literal: Literal) -> Result<u16, ParseError> {
        let idx = self.code.literals.len();
        let limit = if self.wide_literals { 0xFFFF } else { 0xFF };
        if idx > limit {
            return Err(ParseError::syntax(
                "function has too many literals",
                self.position(),
            ));
        }
        self.code.literals.push(literal);
        Ok(idx as u16)
    }

    fn add_string_literal(&mut self, text: &str) -> Result<u16, ParseError> {
        self.intern_literal(
            LitKey::Str(text.to_string()),
            Literal::String(text.into()),
        )
    }

    fn add_number_literal(&mut self, value: f64) -> Result<u16, ParseError> {
        self.intern_literal(LitKey::Num(value.to_bits()), Literal::Number(value))
    }

    fn add_function_literal(&mut self, code: CompiledCode) -> Result<u16, ParseError> {
        self.push_literal_entry(Literal::Function(Rc::new(code)))
    }

    // ----- emission -----------------------------------------------------

    fn here(&self) -> usize {
        self.code.code.len()
    }

    fn flush_last(&mut self) {
        self.last = LastEmitted::None;
    }

    fn push_depth(&mut self, n: u16) {
        self.depth += n;
        if self.depth > self.max_depth {
            self.max_depth = self.depth;
        }
    }

    fn pop_depth(&mut self, n: u16) {
        debug_assert!(self.depth >= n, "operand stack underflow in compiler");
        self.depth = self.depth.saturating_sub(n);
    }

    fn set_depth(&mut self, depth: u16) {
        self.depth = depth;
        if depth > self.max_depth {
            self.max_depth = depth;
        }
    }

    fn apply_effect(&mut self, effect: StackEffect) {
        match effect {
            StackEffect::Fixed { pops, pushes } => {
                self.pop_depth(pops as u16);
                self.push_depth(pushes as u16);
            }
            StackEffect::Dynamic => unreachable!("dynamic effect needs explicit accounting"),
        }
    }

    fn write_literal_operand(&mut self, lit: u16) {
        if self.wide_literals {
            self.code.code.extend_from_slice(&lit.to_le_bytes());
        } else {
            debug_assert!(lit <= 0xFF);
            self.code.code.push(lit as u8);
        }
    }

    /// Emits a fixed-effect opcode without operands.
    fn emit_op(&mut self, op: Opcode) {
        self.flush_last();
        match op {
            Opcode::Ext(ext) => {
                self.code.code.push(EXT_PREFIX);
                self.code.code.push(ext.to_byte());
            }
            other => self.code.code.push(other.to_byte()),
        }
        self.apply_effect(op.stack_effect());
    }

    /// Emits a fixed-effect opcode with one literal operand.
    fn emit_op_lit(&mut self, op: Opcode, lit: u16) {
        self.flush_last();
        self.code.code.push(op.to_byte());
        self.write_literal_operand(lit);
        self.apply_effect(op.stack_effect());
    }

    fn emit_op_lit_lit(&mut self, op: Opcode, a: u16, b: u16) {
        self.flush_last();
        self.code.code.push(op.to_byte());
        self.write_literal_operand(a);
        self.write_literal_operand(b);
        self.apply_effect(op.stack_effect());
    }

    /// Emits a literal push, staging it for fusion. A push directly
    /// after a staged push rewrites the pair into `PUSH_TWO_LITERALS`.
    fn emit_push_literal(&mut self, lit: u16) {
        match self.last {
            LastEmitted::PushLiteral { pc, lit: first } => {
                self.code.code.truncate(pc);
                self.code.code.push(Opcode::PushTwoLiterals.to_byte());
                self.write_literal_operand(first);
                self.write_literal_operand(lit);
                self.push_depth(1);
                self.last = LastEmitted::PushTwoLiterals { pc, a: first, b: lit };
            }
            _ => {
                let pc = self.here();
                self.code.code.push(Opcode::PushLiteral.to_byte());
                self.write_literal_operand(lit);
                self.push_depth(1);
                self.last = LastEmitted::PushLiteral { pc, lit };
            }
        }
    }

    /// Emits a binary operator, rewriting staged literal pushes into
    /// the fused operand encodings.
    fn emit_binary(&mut self, op: BinaryOp) {
        match self.last {
            LastEmitted::PushTwoLiterals { pc, a, b } => {
                self.code.code.truncate(pc);
                self.last = LastEmitted::None;
                self.code
                    .code
                    .push(Opcode::BinaryWithTwoLiterals(op).to_byte());
                self.write_literal_operand(a);
                self.write_literal_operand(b);
                // Two staged pushes collapse into one result.
                self.pop_depth(1);
            }
            LastEmitted::PushLiteral { pc, lit } => {
                self.code.code.truncate(pc);
                self.last = LastEmitted::None;
                self.code.code.push(Opcode::BinaryWithLiteral(op).to_byte());
                self.write_literal_operand(lit);
                // The staged push and the left operand collapse into
                // one result slot.
                self.pop_depth(1);
            }
            LastEmitted::None => self.emit_op(Opcode::Binary(op)),
        }
    }

    fn emit_number(&mut self, value: f64) -> Result<(), ParseError> {
        let negative_zero = value == 0.0 && value.is_sign_negative();
        if value == 0.0 && !negative_zero {
            self.emit_op(Opcode::PushNumber0);
        } else if value == 1.0 {
            self.emit_op(Opcode::PushNumber1);
        } else if !negative_zero && value.fract() == 0.0 && (-128.0..=127.0).contains(&value) {
            self.flush_last();
            self.code.code.push(Opcode::PushNumberByte.to_byte());
            self.code.code.push(value as i8 as u8);
            self.push_depth(1);
        } else if !negative_zero && value.fract() == 0.0 && (-32768.0..=32767.0).contains(&value) {
            self.flush_last();
            self.code.code.push(Opcode::PushNumberTwoByte.to_byte());
            self.code
                .code
                .extend_from_slice(&(value as i16).to_le_bytes());
            self.push_depth(1);
        } else {
            let lit = self.add_number_literal(value)?;
            self.emit_push_literal(lit);
        }
        Ok(())
    }

    /// Emits a call-family opcode with its argument-count immediate.
    fn emit_call(&mut self, op: Opcode, argc: u8) {
        self.flush_last();
        self.code.code.push(op.to_byte());
        let extra = match op {
            Opcode::Call | Opcode::CallEval | Opcode::New => 1,
            Opcode::CallProp => 2,
            _ => unreachable!("not a call opcode"),
        };
        self.code.code.push(argc);
        self.pop_depth(argc as u16 + extra);
        self.push_depth(1);
    }

    // ----- branches -----------------------------------------------------

    /// Emits a narrow forward branch; relaxation may widen it.
    fn emit_forward_branch(&mut self, op: Opcode) -> usize {
        self.flush_last();
        let pc = self.here();
        self.code.code.push(op.to_byte());
        let operand_at = self.here();
        self.code.code.push(0);
        self.apply_effect(op.stack_effect());
        self.branches.push(Branch {
            pc,
            operand_at,
            width: 1,
            widenable: true,
            backward: false,
            signed: false,
            target: None,
        });
        self.branches.len() - 1
    }

    /// Emits a narrow backward jump to a known target.
    fn emit_backward_jump(&mut self, target: usize) {
        self.flush_last();
        let pc = self.here();
        self.code.code.push(Opcode::JumpBackward.to_byte());
        let operand_at = self.here();
        self.code.code.push(0);
        self.branches.push(Branch {
            pc,
            operand_at,
            width: 1,
            widenable: true,
            backward: true,
            signed: false,
            target: Some(target),
        });
    }

    /// Emits a `TRY` with two 16-bit operands; returns the branch ids
    /// of the catch and finally entries.
    fn emit_try(&mut self) -> (usize, usize) {
        self.flush_last();
        let pc = self.here();
        self.code.code.push(Opcode::Try.to_byte());
        let catch_at = self.here();
        self.code.code.extend_from_slice(&[0, 0]);
        let finally_at = self.here();
        self.code.code.extend_from_slice(&[0, 0]);
        self.branches.push(Branch {
            pc,
            operand_at: catch_at,
            width: 2,
            widenable: false,
            backward: false,
            signed: false,
            target: None,
        });
        self.branches.push(Branch {
            pc,
            operand_at: finally_at,
            width: 2,
            widenable: false,
            backward: false,
            signed: false,
            target: None,
        });
        (self.branches.len() - 2, self.branches.len() - 1)
    }

    /// Emits an extended-plane instruction with one 16-bit forward
    /// branch operand.
    fn emit_ext_branch(&mut self, ext: ExtOpcode) -> usize {
        self.flush_last();
        let pc = self.here();
        self.code.code.push(EXT_PREFIX);
        self.code.code.push(ext.to_byte());
        let operand_at = self.here();
        self.code.code.extend_from_slice(&[0, 0]);
        self.apply_effect(ext.stack_effect());
        self.branches.push(Branch {
            pc,
            operand_at,
            width: 2,
            widenable: false,
            backward: false,
            signed: false,
            target: None,
        });
        self.branches.len() - 1
    }

    /// Emits `JUMP_VIA_FINALLY count, target` with a signed relative
    /// 16-bit target operand.
    fn emit_jump_via_finally(&mut self, count: u8) -> usize {
        self.flush_last();
        let pc = self.here();
        self.code.code.push(EXT_PREFIX);
        self.code.code.push(ExtOpcode::JumpViaFinally.to_byte());
        self.code.code.push(count);
        let operand_at = self.here();
        self.code.code.extend_from_slice(&[0, 0]);
        self.branches.push(Branch {
            pc,
            operand_at,
            width: 2,
            widenable: false,
            backward: false,
            signed: true,
            target: None,
        });
        self.branches.len() - 1
    }

    fn set_branch_target_here(&mut self, id: usize) {
        self.flush_last();
        self.branches[id].target = Some(self.here());
    }

    fn set_branch_target(&mut self, id: usize, target: usize) {
        self.branches[id].target = Some(target);
    }

    /// Records a position other instructions may branch to.
    fn label_here(&mut self) -> usize {
        self.flush_last();
        self.here()
    }

    fn wide_form(byte: u8) -> u8 {
        let narrow = Opcode::from_byte(byte).expect("widening an unknown opcode");
        let wide = match narrow {
            Opcode::BranchIfTrue => Opcode::BranchIfTrueWide,
            Opcode::BranchIfFalse => Opcode::BranchIfFalseWide,
            Opcode::BranchIfLogicalTrue => Opcode::BranchIfLogicalTrueWide,
            Opcode::BranchIfLogicalFalse => Opcode::BranchIfLogicalFalseWide,
            Opcode::JumpForward => Opcode::JumpForwardWide,
            Opcode::JumpBackward => Opcode::JumpBackwardWide,
            other => unreachable!("opcode {:?} has no wide form", other),
        };
        wide.to_byte()
    }

    /// Relaxation: widens every narrow branch whose span overflows one
    /// byte, then writes all branch operands.
    fn finalize_branches(&mut self) -> Result<(), ParseError> {
        loop {
            let mut changed = false;
            for index in 0..self.branches.len() {
                let branch = self.branches[index];
                if branch.width != 1 {
                    continue;
                }
                let Some(target) = branch.target else { continue };
                let span = if branch.backward {
                    branch.pc - target
                } else {
                    target - branch.pc
                };
                if span > NARROW_BRANCH_LIMIT {
                    self.widen(index);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for branch in &self.branches {
            let target = match branch.target {
                Some(target) => target,
                // Unset TRY operands stay zero (absent handler).
                None => continue,
            };
            if branch.signed {
                let offset = target as i64 - branch.pc as i64;
                debug_assert!(offset >= i16::MIN as i64 && offset <= i16::MAX as i64);
                let bytes = (offset as i16).to_le_bytes();
                self.code.code[branch.operand_at] = bytes[0];
                self.code.code[branch.operand_at + 1] = bytes[1];
                continue;
            }
            let span = if branch.backward {
                branch.pc - target
            } else {
                target - branch.pc
            };
            if branch.width == 1 {
                debug_assert!(span <= NARROW_BRANCH_LIMIT);
                self.code.code[branch.operand_at] = span as u8;
            } else {
                debug_assert!(span <= 0xFFFF);
                let bytes = (span as u16).to_le_bytes();
                self.code.code[branch.operand_at] = bytes[0];
                self.code.code[branch.operand_at + 1] = bytes[1];
            }
        }
        Ok(())
    }

    /// Rewrites branch `index` to its wide form, shifting every pc
    /// recorded after the inserted byte.
    fn widen(&mut self, index: usize) {
        let branch = self.branches[index];
        debug_assert!(branch.widenable && branch.width == 1);
        self.code.code[branch.pc] = Self::wide_form(self.code.code[branch.pc]);
        let insert_at = branch.operand_at + 1;
        self.code.code.insert(insert_at, 0);
        self.branches[index].width = 2;

        for other in self.branches.iter_mut() {
            if other.pc >= insert_at {
                other.pc += 1;
            }
            if other.operand_at >= insert_at {
                other.operand_at += 1;
            }
            if let Some(target) = other.target.as_mut() {
                if *target >= insert_at {
                    *target += 1;
                }
            }
        }
    }

    // ----- references ---------------------------------------------------

    /// Loads the value of a deferred reference onto the stack.
    fn materialize(&mut self, r: Ref) {
        match r {
            Ref::None => {}
            Ref::Ident(ident) => self.emit_op_lit(Opcode::PushIdent, ident.lit),
            Ref::IdentProp { base, name } => {
                self.emit_op_lit_lit(Opcode::PropLiteralLiteralGet, base.lit, name)
            }
            Ref::StackProp { name } => self.emit_op_lit(Opcode::PropLiteralGet, name),
            Ref::Member => self.emit_op(Opcode::PropGet),
        }
    }

    /// Pushes the base object and key of a property reference so a
    /// plain `ASSIGN` can store through it.
    fn push_store_site(&mut self, r: Ref) {
        match r {
            Ref::IdentProp { base, name } => {
                self.emit_op_lit(Opcode::PushIdent, base.lit);
                self.emit_push_literal(name);
            }
            Ref::StackProp { name } => self.emit_push_literal(name),
            Ref::Member => {}
            Ref::None | Ref::Ident(_) => unreachable!("not a property reference"),
        }
    }

    /// Emits the compound-assignment load: base and key stay on the
    /// stack below the current value.
    fn emit_compound_get(&mut self, r: Ref) {
        match r {
            Ref::IdentProp { base, name } => {
                self.emit_op_lit(Opcode::PushIdent, base.lit);
                self.emit_op_lit(Opcode::AssignPropLiteralGet, name);
            }
            Ref::StackProp { name } => self.emit_op_lit(Opcode::AssignPropLiteralGet, name),
            Ref::Member => self.emit_op(Opcode::AssignPropGet),
            Ref::None | Ref::Ident(_) => unreachable!("not a property reference"),
        }
    }

    fn check_strict_assign_target(
        &self,
        ident: IdentRef,
        position: SourcePosition,
    ) -> Result<(), ParseError> {
        if self.strict && (ident.is_eval || ident.is_arguments) {
            let name = if ident.is_eval { "eval" } else { "arguments" };
            return Err(ParseError::syntax(
                format!("cannot assign to '{}' in strict mode", name),
                position,
            ));
        }
        Ok(())
    }

    fn check_strict_binding_name(
        &self,
        name: &str,
        position: SourcePosition,
    ) -> Result<(), ParseError> {
        if self.strict && (name == "eval" || name == "arguments") {
            return Err(ParseError::syntax(
                format!("'{}' cannot be bound in strict mode", name),
                position,
            ));
        }
        Ok(())
    }

    fn ident_ref(&mut self, name: &str) -> Result<IdentRef, ParseError> {
        let lit = self.add_string_literal(name)?;
        Ok(IdentRef {
            lit,
            is_eval: name == "eval",
            is_arguments: name == "arguments",
        })
    }

    // ----- expressions --------------------------------------------------

    /// Full `Expression` (comma operator included); one value stays on
    /// the stack.
    fn parse_expression(&mut self, no_in: bool) -> Result<(), ParseError> {
        self.parse_assignment(no_in)?;
        while self.eat_punct(Punct::Comma) {
            self.emit_op(Opcode::Pop);
            self.parse_assignment(no_in)?;
        }
        Ok(())
    }

    fn parse_assignment(&mut self, no_in: bool) -> Result<(), ParseError> {
        let r = self.parse_unary(no_in)?;
        self.parse_assignment_from_ref(r, no_in)
    }

    fn assignment_binary_op(punct: Punct) -> Option<Option<BinaryOp>> {
        match punct {
            Punct::Assign => Some(None),
            Punct::PlusAssign => Some(Some(BinaryOp::Add)),
            Punct::MinusAssign => Some(Some(BinaryOp::Sub)),
            Punct::StarAssign => Some(Some(BinaryOp::Mul)),
            Punct::SlashAssign => Some(Some(BinaryOp::Div)),
            Punct::PercentAssign => Some(Some(BinaryOp::Mod)),
            Punct::ShlAssign => Some(Some(BinaryOp::ShiftLeft)),
            Punct::ShrAssign => Some(Some(BinaryOp::ShiftRight)),
            Punct::UShrAssign => Some(Some(BinaryOp::ShiftRightUnsigned)),
            Punct::AndAssign => Some(Some(BinaryOp::BitAnd)),
            Punct::OrAssign => Some(Some(BinaryOp::BitOr)),
            Punct::XorAssign => Some(Some(BinaryOp::BitXor)),
            _ => None,
        }
    }

    fn parse_assignment_from_ref(&mut self, r: Ref, no_in: bool) -> Result<(), ParseError> {
        let position = self.position();
        let assignment = match self.kind() {
            TokenKind::Punct(p) => Self::assignment_binary_op(*p),
            _ => None,
        };

        if let Some(compound) = assignment {
            match r {
                Ref::Ident(ident) => {
                    self.check_strict_assign_target(ident, position)?;
                    self.bump();
                    if let Some(op) = compound {
                        self.emit_op_lit(Opcode::PushIdent, ident.lit);
                        self.parse_assignment(no_in)?;
                        self.emit_binary(op);
                    } else {
                        self.parse_assignment(no_in)?;
                    }
                    self.emit_op_lit(Opcode::AssignIdent, ident.lit);
                }
                Ref::IdentProp { .. } | Ref::StackProp { .. } | Ref::Member => {
                    self.bump();
                    if let Some(op) = compound {
                        self.emit_compound_get(r);
                        self.parse_assignment(no_in)?;
                        self.emit_binary(op);
                    } else {
                        self.push_store_site(r);
                        self.parse_assignment(no_in)?;
                    }
                    self.emit_op(Opcode::Assign);
                }
                Ref::None => {
                    return Err(ParseError::reference(
                        "invalid assignment target",
                        position,
                    ));
                }
            }
            return Ok(());
        }

        self.materialize(r);
        self.parse_binary_continue(5, no_in)?;
        self.parse_conditional_tail(no_in)
    }

    fn binary_op_for(&self, no_in: bool) -> Option<(BinaryOp, u8)> {
        match self.kind() {
            TokenKind::Punct(p) => {
                let entry = match p {
                    Punct::BitOr => (BinaryOp::BitOr, 7),
                    Punct::BitXor => (BinaryOp::BitXor, 8),
                    Punct::BitAnd => (BinaryOp::BitAnd, 9),
                    Punct::EqEq => (BinaryOp::Equals, 10),
                    Punct::NotEq => (BinaryOp::NotEquals, 10),
                    Punct::EqEqEq => (BinaryOp::StrictEquals, 10),
                    Punct::NotEqEq => (BinaryOp::StrictNotEquals, 10),
                    Punct::Lt => (BinaryOp::Less, 11),
                    Punct::Gt => (BinaryOp::Greater, 11),
                    Punct::Le => (BinaryOp::LessEqual, 11),
                    Punct::Ge => (BinaryOp::GreaterEqual, 11),
                    Punct::Shl => (BinaryOp::ShiftLeft, 12),
                    Punct::Shr => (BinaryOp::ShiftRight, 12),
                    Punct::UShr => (BinaryOp::ShiftRightUnsigned, 12),
                    Punct::Plus => (BinaryOp::Add, 13),
                    Punct::Minus => (BinaryOp::Sub, 13),
                    Punct::Star => (BinaryOp::Mul, 14),
                    Punct::Slash => (BinaryOp::Div, 14),
                    Punct::Percent => (BinaryOp::Mod, 14),
                    _ => return None,
                };
                Some(entry)
            }
            TokenKind::Keyword(Keyword::Instanceof) => Some((BinaryOp::InstanceOf, 11)),
            TokenKind::Keyword(Keyword::In) if !no_in => Some((BinaryOp::In, 11)),
            _ => None,
        }
    }

    /// Precedence-climbing loop over the binary levels (5 and up).
    /// The left operand is on the stack.
    fn parse_binary_continue(&mut self, min_prec: u8, no_in: bool) -> Result<(), ParseError> {
        loop {
            if self.check_punct(Punct::OrOr) {
                if min_prec > 5 {
                    return Ok(());
                }
                self.bump();
                let join = self.emit_forward_branch(Opcode::BranchIfLogicalTrue);
                // The not-taken path pops the left value.
                self.pop_depth(1);
                let r = self.parse_unary(no_in)?;
                self.materialize(r);
                self.parse_binary_continue(6, no_in)?;
                self.set_branch_target_here(join);
                continue;
            }
            if self.check_punct(Punct::AndAnd) {
                if min_prec > 6 {
                    return Ok(());
                }
                self.bump();
                let join = self.emit_forward_branch(Opcode::BranchIfLogicalFalse);
                self.pop_depth(1);
                let r = self.parse_unary(no_in)?;
                self.materialize(r);
                self.parse_binary_continue(7, no_in)?;
                self.set_branch_target_here(join);
                continue;
            }

            let Some((op, prec)) = self.binary_op_for(no_in) else {
                return Ok(());
            };
            if prec < min_prec {
                return Ok(());
            }
            self.bump();
            let r = self.parse_unary(no_in)?;
            self.materialize(r);
            self.parse_binary_continue(prec + 1, no_in)?;
            self.emit_binary(op);
        }
    }

    fn parse_conditional_tail(&mut self, no_in: bool) -> Result<(), ParseError> {
        if !self.eat_punct(Punct::Question) {
            return Ok(());
        }
        let base = self.depth - 1;
        let to_else = self.emit_forward_branch(Opcode::BranchIfFalse);
        self.parse_assignment(false)?;
        let to_end = self.emit_forward_branch(Opcode::JumpForward);
        self.set_branch_target_here(to_else);
        self.set_depth(base);
        self.expect_punct(Punct::Colon, "':'")?;
        self.parse_assignment(no_in)?;
        self.set_branch_target_here(to_end);
        Ok(())
    }

    fn parse_unary(&mut self, no_in: bool) -> Result<Ref, ParseError> {
        let position = self.position();
        match self.kind().clone() {
            TokenKind::Punct(Punct::Not) => {
                self.bump();
                let r = self.parse_unary(no_in)?;
                self.materialize(r);
                self.emit_op(Opcode::Not);
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::BitNot) => {
                self.bump();
                let r = self.parse_unary(no_in)?;
                self.materialize(r);
                self.emit_op(Opcode::BitNot);
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::Plus) => {
                self.bump();
                let r = self.parse_unary(no_in)?;
                self.materialize(r);
                self.emit_op(Opcode::ToNumber);
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::Minus) => {
                self.bump();
                // Fold a directly negated numeric literal, unless a
                // suffix binds tighter than the minus.
                if let TokenKind::Number(n) = self.kind() {
                    let n = *n;
                    let extends = matches!(
                        self.tokens[self.pos + 1].kind,
                        TokenKind::Punct(Punct::Dot)
                            | TokenKind::Punct(Punct::LBracket)
                            | TokenKind::Punct(Punct::LParen)
                    );
                    if !extends {
                        self.bump();
                        self.emit_number(-n)?;
                        return Ok(Ref::None);
                    }
                }
                let r = self.parse_unary(no_in)?;
                self.materialize(r);
                self.emit_op(Opcode::Negate);
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::PlusPlus) => {
                self.bump();
                let r = self.parse_unary(no_in)?;
                self.emit_prefix_incdec(r, true, position)?;
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::MinusMinus) => {
                self.bump();
                let r = self.parse_unary(no_in)?;
                self.emit_prefix_incdec(r, false, position)?;
                Ok(Ref::None)
            }
            TokenKind::Keyword(Keyword::Typeof) => {
                self.bump();
                let r = self.parse_unary(no_in)?;
                match r {
                    Ref::Ident(ident) => self.emit_op_lit(Opcode::TypeofIdent, ident.lit),
                    other => {
                        self.materialize(other);
                        self.emit_op(Opcode::Typeof);
                    }
                }
                Ok(Ref::None)
            }
            TokenKind::Keyword(Keyword::Void) => {
                self.bump();
                let r = self.parse_unary(no_in)?;
                self.materialize(r);
                self.emit_op(Opcode::Pop);
                self.emit_op(Opcode::PushUndefined);
                Ok(Ref::None)
            }
            TokenKind::Keyword(Keyword::Delete) => {
                self.bump();
                let r = self.parse_unary(no_in)?;
                match r {
                    Ref::Ident(ident) => {
                        if self.strict {
                            return Err(ParseError::syntax(
                                "cannot delete an unqualified identifier in strict mode",
                                position,
                            ));
                        }
                        self.emit_op_lit(Opcode::DeleteIdent, ident.lit);
                    }
                    Ref::IdentProp { base, name } => {
                        self.emit_op_lit(Opcode::PushIdent, base.lit);
                        self.emit_push_literal(name);
                        self.emit_op(Opcode::Delete);
                    }
                    Ref::StackProp { name } => {
                        self.emit_push_literal(name);
                        self.emit_op(Opcode::Delete);
                    }
                    Ref::Member => self.emit_op(Opcode::Delete),
                    Ref::None => {
                        // `delete <value>` evaluates the operand and
                        // yields true.
                        self.emit_op(Opcode::Pop);
                        self.emit_op(Opcode::PushTrue);
                    }
                }
                Ok(Ref::None)
            }
            TokenKind::Keyword(Keyword::New) => {
                let r = self.parse_new_expression()?;
                let r = self.parse_suffixes(r)?;
                self.parse_postfix(r, no_in)
            }
            _ => {
                let r = self.parse_primary()?;
                let r = self.parse_suffixes(r)?;
                self.parse_postfix(r, no_in)
            }
        }
    }

    fn emit_prefix_incdec(
        &mut self,
        r: Ref,
        increment: bool,
        position: SourcePosition,
    ) -> Result<(), ParseError> {
        match r {
            Ref::Ident(ident) => {
                self.check_strict_assign_target(ident, position)?;
                let op = if increment {
                    Opcode::PreIncrIdent
                } else {
                    Opcode::PreDecrIdent
                };
                self.emit_op_lit(op, ident.lit);
            }
            Ref::IdentProp { .. } | Ref::StackProp { .. } | Ref::Member => {
                self.push_store_site(r);
                let op = if increment {
                    Opcode::PreIncrProp
                } else {
                    Opcode::PreDecrProp
                };
                self.emit_op(op);
            }
            Ref::None => {
                return Err(ParseError::reference(
                    "invalid increment or decrement target",
                    position,
                ));
            }
        }
        Ok(())
    }

    fn parse_postfix(&mut self, r: Ref, _no_in: bool) -> Result<Ref, ParseError> {
        let is_incr = self.check_punct(Punct::PlusPlus);
        let is_decr = self.check_punct(Punct::MinusMinus);
        if (!is_incr && !is_decr) || self.newline_before() {
            return Ok(r);
        }
        let position = self.position();
        self.bump();
        match r {
            Ref::Ident(ident) => {
                self.check_strict_assign_target(ident, position)?;
                let op = if is_incr {
                    Opcode::PostIncrIdent
                } else {
                    Opcode::PostDecrIdent
                };
                self.emit_op_lit(op, ident.lit);
            }
            Ref::IdentProp { .. } | Ref::StackProp { .. } | Ref::Member => {
                self.push_store_site(r);
                let op = if is_incr {
                    Opcode::PostIncrProp
                } else {
                    Opcode::PostDecrProp
                };
                self.emit_op(op);
            }
            Ref::None => {
                return Err(ParseError::reference(
                    "invalid increment or decrement target",
                    position,
                ));
            }
        }
        Ok(Ref::None)
    }

    /// `new MemberExpression ( Arguments? )`.
    fn parse_new_expression(&mut self) -> Result<Ref, ParseError> {
        debug_assert!(self.check_keyword(Keyword::New));
        self.bump();
        let callee = if self.check_keyword(Keyword::New) {
            self.parse_new_expression()?
        } else {
            self.parse_primary()?
        };
        let callee = self.parse_member_suffixes(callee)?;
        self.materialize(callee);
        let argc = if self.check_punct(Punct::LParen) {
            self.parse_arguments()?
        } else {
            0
        };
        self.emit_call(Opcode::New, argc);
        Ok(Ref::None)
    }

    /// Member accesses only (for `new` callees).
    fn parse_member_suffixes(&mut self, mut r: Ref) -> Result<Ref, ParseError> {
        loop {
            if self.eat_punct(Punct::Dot) {
                let name = self.parse_property_name_ident()?;
                let name_lit = self.add_string_literal(&name)?;
                r = match r {
                    Ref::Ident(base) => Ref::IdentProp {
                        base,
                        name: name_lit,
                    },
                    other => {
                        self.materialize(other);
                        Ref::StackProp { name: name_lit }
                    }
                };
            } else if self.eat_punct(Punct::LBracket) {
                self.materialize(r);
                self.parse_expression(false)?;
                self.expect_punct(Punct::RBracket, "']'")?;
                r = Ref::Member;
            } else {
                return Ok(r);
            }
        }
    }

    /// Member and call suffixes.
    fn parse_suffixes(&mut self, mut r: Ref) -> Result<Ref, ParseError> {
        loop {
            r = self.parse_member_suffixes(r)?;
            if !self.check_punct(Punct::LParen) {
                return Ok(r);
            }
            match r {
                Ref::Ident(ident) => {
                    self.emit_op_lit(Opcode::PushIdent, ident.lit);
                    let argc = self.parse_arguments()?;
                    if ident.is_eval {
                        self.emit_call(Opcode::CallEval, argc);
                    } else if argc == 0 {
                        self.emit_op(Opcode::Call0);
                    } else {
                        self.emit_call(Opcode::Call, argc);
                    }
                }
                Ref::None => {
                    let argc = self.parse_arguments()?;
                    if argc == 0 {
                        self.emit_op(Opcode::Call0);
                    } else {
                        self.emit_call(Opcode::Call, argc);
                    }
                }
                Ref::IdentProp { .. } | Ref::StackProp { .. } | Ref::Member => {
                    self.push_store_site(r);
                    let argc = self.parse_arguments()?;
                    if argc == 0 {
                        self.emit_op(Opcode::Call0Prop);
                    } else {
                        self.emit_call(Opcode::CallProp, argc);
                    }
                }
            }
            r = Ref::None;
        }
    }

    fn parse_arguments(&mut self) -> Result<u8, ParseError> {
        self.expect_punct(Punct::LParen, "'('")?;
        let mut argc: u16 = 0;
        if !self.check_punct(Punct::RParen) {
            loop {
                self.parse_assignment(false)?;
                argc += 1;
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen, "')'")?;
        if argc > 0xFF {
            return Err(ParseError::syntax("too many arguments", self.position()));
        }
        Ok(argc as u8)
    }

    /// A property name after `.`: identifiers and reserved words.
    fn parse_property_name_ident(&mut self) -> Result<String, ParseError> {
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            TokenKind::Keyword(keyword) => {
                self.bump();
                Ok(keyword_text(keyword).to_string())
            }
            _ => Err(ParseError::syntax(
                "expected a property name",
                self.position(),
            )),
        }
    }

    fn parse_primary(&mut self) -> Result<Ref, ParseError> {
        let position = self.position();
        match self.kind().clone() {
            TokenKind::Number(n) => {
                self.bump();
                self.emit_number(n)?;
                Ok(Ref::None)
            }
            TokenKind::Str(s) => {
                self.bump();
                let lit = self.add_string_literal(&s)?;
                self.emit_push_literal(lit);
                Ok(Ref::None)
            }
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Ref::Ident(self.ident_ref(&name)?))
            }
            TokenKind::Keyword(Keyword::This) => {
                self.bump();
                self.emit_op(Opcode::PushThis);
                Ok(Ref::None)
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                self.emit_op(Opcode::PushTrue);
                Ok(Ref::None)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                self.emit_op(Opcode::PushFalse);
                Ok(Ref::None)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.bump();
                self.emit_op(Opcode::PushNull);
                Ok(Ref::None)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.parse_function_literal(FunctionKind::Expression)?;
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::LParen) => {
                self.bump();
                self.parse_expression(false)?;
                self.expect_punct(Punct::RParen, "')'")?;
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.parse_array_literal()?;
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.parse_object_literal()?;
                Ok(Ref::None)
            }
            TokenKind::Punct(Punct::Slash) | TokenKind::Punct(Punct::SlashAssign) => {
                Err(ParseError::syntax(
                    "regular expression literals are not supported in this build",
                    position,
                ))
            }
            _ => Err(ParseError::syntax("unexpected token", position)),
        }
    }

    fn parse_array_literal(&mut self) -> Result<(), ParseError> {
        self.expect_punct(Punct::LBracket, "'['")?;
        self.emit_op(Opcode::CreateArray);
        let mut pending: u16 = 0;
        loop {
            if self.check_punct(Punct::RBracket) {
                break;
            }
            if self.eat_punct(Punct::Comma) {
                // An elision before the next element or the end.
                if self.check_punct(Punct::RBracket) {
                    break;
                }
                self.emit_op(Opcode::PushElision);
                pending += 1;
            } else {
                self.parse_assignment(false)?;
                pending += 1;
                if !self.check_punct(Punct::RBracket) {
                    self.expect_punct(Punct::Comma, "',' or ']'")?;
                    // A comma directly before ']' is a trailing comma.
                    if self.check_punct(Punct::RBracket) {
                        break;
                    }
                    // Elisions between elements are handled by the
                    // comma branch above on the next iteration.
                    if self.check_punct(Punct::Comma) {
                        continue;
                    }
                    // Fall through to parse the next element.
                    self.flush_array_chunk(&mut pending)?;
                    continue;
                }
            }
            self.flush_array_chunk(&mut pending)?;
        }
        self.expect_punct(Punct::RBracket, "']'")?;
        if pending > 0 {
            self.emit_array_append(pending);
        }
        Ok(())
    }

    fn flush_array_chunk(&mut self, pending: &mut u16) -> Result<(), ParseError> {
        if *pending >= ARRAY_APPEND_CHUNK {
            self.emit_array_append(*pending);
            *pending = 0;
        }
        Ok(())
    }

    fn emit_array_append(&mut self, count: u16) {
        debug_assert!(count > 0 && count <= 0xFF);
        self.flush_last();
        self.code.code.push(Opcode::ArrayAppend.to_byte());
        self.code.code.push(count as u8);
        self.pop_depth(count);
    }

    fn parse_object_literal(&mut self) -> Result<(), ParseError> {
        self.expect_punct(Punct::LBrace, "'{'")?;
        self.emit_op(Opcode::CreateObject);
        loop {
            if self.check_punct(Punct::RBrace) {
                break;
            }

            // get/set accessor properties: `get name() {}` has a
            // property name right after the keyword-like identifier.
            let accessor = match self.kind() {
                TokenKind::Ident(word) if word == "get" || word == "set" => {
                    let is_getter = word == "get";
                    if !matches!(
                        self.tokens[self.pos + 1].kind,
                        TokenKind::Punct(Punct::Colon) | TokenKind::Punct(Punct::Comma)
                            | TokenKind::Punct(Punct::RBrace) | TokenKind::Punct(Punct::LParen)
                    ) {
                        Some(is_getter)
                    } else {
                        None
                    }
                }
                _ => None,
            };

            if let Some(is_getter) = accessor {
                self.bump();
                let name_lit = self.parse_property_name()?;
                let kind = if is_getter {
                    FunctionKind::Getter
                } else {
                    FunctionKind::Setter
                };
                self.parse_accessor_function(kind)?;
                let op = if is_getter {
                    Opcode::Ext(ExtOpcode::SetGetter)
                } else {
                    Opcode::Ext(ExtOpcode::SetSetter)
                };
                self.emit_ext_lit(op, name_lit);
            } else {
                let name_lit = self.parse_property_name()?;
                self.expect_punct(Punct::Colon, "':'")?;
                self.parse_assignment(false)?;
                self.emit_op_lit(Opcode::SetProperty, name_lit);
            }

            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace, "'}'")?;
        Ok(())
    }

    fn emit_ext_lit(&mut self, op: Opcode, lit: u16) {
        let Opcode::Ext(ext) = op else {
            unreachable!("expected an extended opcode")
        };
        self.flush_last();
        self.code.code.push(EXT_PREFIX);
        self.code.code.push(ext.to_byte());
        self.write_literal_operand(lit);
        self.apply_effect(ext.stack_effect());
    }

    /// A property name in an object literal: identifier, reserved
    /// word, string, or number.
    fn parse_property_name(&mut self) -> Result<u16, ParseError> {
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                self.add_string_literal(&name)
            }
            TokenKind::Keyword(keyword) => {
                self.bump();
                let text = keyword_text(keyword).to_string();
                self.add_string_literal(&text)
            }
            TokenKind::Str(s) => {
                self.bump();
                self.add_string_literal(&s)
            }
            TokenKind::Number(n) => {
                self.bump();
                let text = compile_time_number_to_string(n);
                self.add_string_literal(&text)
            }
            _ => Err(ParseError::syntax(
                "expected a property name",
                self.position(),
            )),
        }
    }

    // ----- functions ----------------------------------------------------

    fn parse_accessor_function(&mut self, kind: FunctionKind) -> Result<(), ParseError> {
        self.parse_function_common(None, kind)
    }

    /// Parses `function name? (params) { body }` starting at the
    /// `function` keyword (expressions and accessors) and emits the
    /// closure-creating literal push.
    fn parse_function_literal(&mut self, kind: FunctionKind) -> Result<(), ParseError> {
        debug_assert!(self.check_keyword(Keyword::Function));
        self.bump();
        let name = match self.kind() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                Some(name)
            }
            _ => None,
        };
        self.parse_function_common(name, kind)
    }

    fn parse_function_common(
        &mut self,
        name: Option<String>,
        kind: FunctionKind,
    ) -> Result<(), ParseError> {
        let position = self.position();
        if let Some(ref name) = name {
            self.check_strict_binding_name(name, position)?;
        }

        self.expect_punct(Punct::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check_punct(Punct::RParen) {
            loop {
                let param_position = self.position();
                let param = self.expect_ident("a parameter name")?;
                self.check_strict_binding_name(&param, param_position)?;
                params.push(param);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen, "')'")?;

        match kind {
            FunctionKind::Getter if !params.is_empty() => {
                return Err(ParseError::syntax("getters take no parameters", position));
            }
            FunctionKind::Setter if params.len() != 1 => {
                return Err(ParseError::syntax(
                    "setters take exactly one parameter",
                    position,
                ));
            }
            _ => {}
        }

        if params.len() > 0xFF {
            return Err(ParseError::syntax("too many parameters", position));
        }

        let body_open = self.pos;
        if !self.check_punct(Punct::LBrace) {
            return Err(ParseError::syntax("expected '{'", self.position()));
        }
        let body_close = find_matching_brace(self.tokens, body_open)
            .ok_or_else(|| ParseError::syntax("unterminated function body", position))?;

        let child = Compiler::new(
            self.tokens,
            body_open + 1,
            body_close,
            self.strict,
            BodyKind::Function,
        );
        let named_expression = kind == FunctionKind::Expression && name.is_some();
        let mut body = child.compile_body(&params, name.as_deref(), named_expression)?;

        // Parameter restrictions depend on the body's final
        // strictness (a directive prologue can promote it).
        if body.is_strict() {
            let mut seen = Vec::new();
            for param in &params {
                if param == "eval" || param == "arguments" {
                    return Err(ParseError::syntax(
                        format!("'{}' cannot be bound in strict mode", param),
                        position,
                    ));
                }
                if seen.contains(&param) {
                    return Err(ParseError::syntax(
                        format!("duplicate parameter name '{}'", param),
                        position,
                    ));
                }
                seen.push(param);
            }
            if let Some(ref fn_name) = name {
                if fn_name == "eval" || fn_name == "arguments" {
                    return Err(ParseError::syntax(
                        format!("'{}' cannot be bound in strict mode", fn_name),
                        position,
                    ));
                }
            }
        }

        self.pos = body_close + 1;

        if kind == FunctionKind::Declaration {
            let decl_name = name.expect("function declarations are named");
            body.flags.remove(CodeFlags::NAMED_EXPRESSION);
            let lit = self.add_function_literal(body)?;
            let name_lit = self.add_string_literal(&decl_name)?;
            if let Some(entry) = self
                .code
                .declarations
                .iter_mut()
                .find(|d| d.name == name_lit)
            {
                entry.function = Some(lit);
            } else {
                self.code.declarations.push(Declaration {
                    name: name_lit,
                    function: Some(lit),
                });
            }
            self.code.flags.insert(CodeFlags::HAS_DECLARATIONS);
        } else {
            let lit = self.add_function_literal(body)?;
            self.emit_push_literal(lit);
            // A function literal push is not a data literal; it must
            // not fuse into binary operand encodings.
            self.flush_last();
        }
        Ok(())
    }

    // ----- statements ---------------------------------------------------

    fn emit_statement_value(&mut self) {
        match self.body_kind {
            BodyKind::Global | BodyKind::Eval => {
                self.emit_op(Opcode::Ext(ExtOpcode::StoreCompletion))
            }
            BodyKind::Function => self.emit_op(Opcode::Pop),
        }
    }

    fn parse_statement(&mut self) -> Result<(), ParseError> {
        debug_assert_eq!(self.depth, 0, "statements start with an empty stack");
        match self.kind().clone() {
            TokenKind::Punct(Punct::LBrace) => self.parse_block(),
            TokenKind::Punct(Punct::Semicolon) => {
                self.bump();
                Ok(())
            }
            TokenKind::Keyword(Keyword::Var) => {
                self.bump();
                self.parse_var_declarators(false)?;
                self.expect_semicolon()
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.parse_function_literal(FunctionKind::Declaration)
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(Vec::new()),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(Vec::new()),
            TokenKind::Keyword(Keyword::For) => self.parse_for(Vec::new()),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Throw) => self.parse_throw(),
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::With) => self.parse_with(),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(Vec::new()),
            TokenKind::Keyword(Keyword::Break) => self.parse_break(),
            TokenKind::Keyword(Keyword::Continue) => self.parse_continue(),
            TokenKind::Keyword(Keyword::Debugger) => {
                self.bump();
                self.expect_semicolon()
            }
            TokenKind::Ident(name)
                if matches!(
                    self.tokens[self.pos + 1].kind,
                    TokenKind::Punct(Punct::Colon)
                ) =>
            {
                self.parse_labeled(name)
            }
            _ => {
                self.parse_expression(false)?;
                self.emit_statement_value();
                self.expect_semicolon()
            }
        }
    }

    fn parse_block(&mut self) -> Result<(), ParseError> {
        self.expect_punct(Punct::LBrace, "'{'")?;
        while !self.check_punct(Punct::RBrace) {
            if matches!(self.kind(), TokenKind::Eof) {
                return Err(ParseError::syntax("unterminated block", self.position()));
            }
            self.parse_statement()?;
        }
        self.bump();
        Ok(())
    }

    fn parse_var_declarators(&mut self, no_in: bool) -> Result<(), ParseError> {
        loop {
            let position = self.position();
            let name = self.expect_ident("a variable name")?;
            self.check_strict_binding_name(&name, position)?;
            let ident = self.ident_ref(&name)?;
            if self.eat_punct(Punct::Assign) {
                self.parse_assignment(no_in)?;
                self.emit_op_lit(Opcode::AssignIdent, ident.lit);
                self.emit_op(Opcode::Pop);
            }
            if !self.eat_punct(Punct::Comma) {
                return Ok(());
            }
        }
    }

    fn parse_paren_expression(&mut self) -> Result<(), ParseError> {
        self.expect_punct(Punct::LParen, "'('")?;
        self.parse_expression(false)?;
        self.expect_punct(Punct::RParen, "')'")
    }

    fn parse_if(&mut self) -> Result<(), ParseError> {
        self.bump();
        self.parse_paren_expression()?;
        let to_else = self.emit_forward_branch(Opcode::BranchIfFalse);
        self.parse_statement()?;
        if self.eat_keyword(Keyword::Else) {
            let to_end = self.emit_forward_branch(Opcode::JumpForward);
            self.set_branch_target_here(to_else);
            self.parse_statement()?;
            self.set_branch_target_here(to_end);
        } else {
            self.set_branch_target_here(to_else);
        }
        Ok(())
    }

    fn push_loop(&mut self, labels: Vec<String>, continue_target: Option<usize>) {
        self.flow.push(FlowContext {
            labels,
            breakable: true,
            is_loop: true,
            breaks: Vec::new(),
            continues: Vec::new(),
            continue_target,
            ctx_depth_break: self.ctx_depth,
            ctx_depth_continue: self.ctx_depth,
        });
    }

    /// Resolves the recorded break (and forward continue) branches of
    /// the popped context.
    fn resolve_breaks_here(&mut self, context: FlowContext) {
        for id in context.breaks {
            self.set_branch_target_here(id);
        }
        debug_assert!(context.continues.is_empty(), "continues resolved earlier");
    }

    fn parse_while(&mut self, labels: Vec<String>) -> Result<(), ParseError> {
        self.bump();
        let condition = self.label_here();
        self.parse_paren_expression()?;
        let exit = self.emit_forward_branch(Opcode::BranchIfFalse);
        self.push_loop(labels, Some(condition));
        self.parse_statement()?;
        self.emit_backward_jump(condition);
        let context = self.flow.pop().expect("loop context");
        self.set_branch_target_here(exit);
        self.resolve_breaks_here(context);
        Ok(())
    }

    fn parse_do_while(&mut self, labels: Vec<String>) -> Result<(), ParseError> {
        self.bump();
        let start = self.label_here();
        self.push_loop(labels, None);
        self.parse_statement()?;
        let mut context = self.flow.pop().expect("loop context");
        // `continue` in do-while targets the condition check.
        let condition = self.label_here();
        for id in context.continues.drain(..) {
            self.set_branch_target(id, condition);
        }
        if !self.eat_keyword(Keyword::While) {
            return Err(ParseError::syntax("expected 'while'", self.position()));
        }
        self.parse_paren_expression()?;
        let exit = self.emit_forward_branch(Opcode::BranchIfFalse);
        self.emit_backward_jump(start);
        self.set_branch_target_here(exit);
        self.resolve_breaks_here(context);
        // The trailing semicolon of do-while is optional.
        let _ = self.eat_punct(Punct::Semicolon);
        Ok(())
    }

    fn parse_for(&mut self, labels: Vec<String>) -> Result<(), ParseError> {
        self.bump();
        self.expect_punct(Punct::LParen, "'('")?;

        if self.eat_keyword(Keyword::Var) {
            let position = self.position();
            let name = self.expect_ident("a variable name")?;
            self.check_strict_binding_name(&name, position)?;
            let ident = self.ident_ref(&name)?;
            if self.eat_punct(Punct::Assign) {
                self.parse_assignment(true)?;
                self.emit_op_lit(Opcode::AssignIdent, ident.lit);
                self.emit_op(Opcode::Pop);
                if self.check_keyword(Keyword::In) {
                    return Err(ParseError::syntax(
                        "for-in declarations may not have initializers",
                        self.position(),
                    ));
                }
            }
            if self.eat_keyword(Keyword::In) {
                return self.parse_for_in_tail(ident, labels);
            }
            if self.eat_punct(Punct::Comma) {
                self.parse_var_declarators(true)?;
            }
            self.expect_punct(Punct::Semicolon, "';'")?;
            return self.parse_for_classic_tail(labels);
        }

        if self.eat_punct(Punct::Semicolon) {
            return self.parse_for_classic_tail(labels);
        }

        // Expression init, possibly the target of for-in.
        let r = self.parse_unary(true)?;
        if self.check_keyword(Keyword::In) {
            let Ref::Ident(ident) = r else {
                return Err(ParseError::syntax(
                    "for-in target must be an identifier",
                    self.position(),
                ));
            };
            let position = self.position();
            self.check_strict_assign_target(ident, position)?;
            self.bump();
            return self.parse_for_in_tail(ident, labels);
        }
        self.parse_assignment_from_ref(r, true)?;
        while self.eat_punct(Punct::Comma) {
            self.emit_op(Opcode::Pop);
            self.parse_assignment(true)?;
        }
        self.emit_op(Opcode::Pop);
        self.expect_punct(Punct::Semicolon, "';'")?;
        self.parse_for_classic_tail(labels)
    }

    /// `for (init; <here> cond; update) body` with the update range
    /// replayed after the body.
    fn parse_for_classic_tail(&mut self, labels: Vec<String>) -> Result<(), ParseError> {
        let condition = self.label_here();
        let exit = if self.check_punct(Punct::Semicolon) {
            None
        } else {
            self.parse_expression(false)?;
            Some(self.emit_forward_branch(Opcode::BranchIfFalse))
        };
        self.expect_punct(Punct::Semicolon, "';'")?;

        // Save the update range and skip past it.
        let update_start = self.pos;
        let has_update = !self.check_punct(Punct::RParen);
        let mut depth = 1usize;
        while depth > 0 {
            match self.kind() {
                TokenKind::Punct(Punct::LParen) => depth += 1,
                TokenKind::Punct(Punct::RParen) => depth -= 1,
                TokenKind::Eof => {
                    return Err(ParseError::syntax("unterminated for head", self.position()))
                }
                _ => {}
            }
            self.bump();
        }

        self.push_loop(labels, None);
        self.parse_statement()?;
        let mut context = self.flow.pop().expect("loop context");

        // `continue` lands on the update expression.
        let update_pc = self.label_here();
        for id in context.continues.drain(..) {
            self.set_branch_target(id, update_pc);
        }
        if has_update {
            let resume = self.pos;
            self.pos = update_start;
            self.parse_expression(false)?;
            self.emit_op(Opcode::Pop);
            self.pos = resume;
        }
        self.emit_backward_jump(condition);

        if let Some(exit) = exit {
            self.set_branch_target_here(exit);
        }
        self.resolve_breaks_here(context);
        Ok(())
    }

    fn parse_for_in_tail(
        &mut self,
        target: IdentRef,
        labels: Vec<String>,
    ) -> Result<(), ParseError> {
        self.parse_expression(false)?;
        self.expect_punct(Punct::RParen, "')'")?;

        let break_ctx_depth = self.ctx_depth;
        let init_exit = self.emit_ext_branch(ExtOpcode::ForInInit);
        self.ctx_depth += 1;

        let next_pc = self.label_here();
        let next_exit = self.emit_ext_branch(ExtOpcode::ForInNext);
        self.emit_op_lit(Opcode::AssignIdent, target.lit);
        self.emit_op(Opcode::Pop);

        self.flow.push(FlowContext {
            labels,
            breakable: true,
            is_loop: true,
            breaks: Vec::new(),
            continues: Vec::new(),
            continue_target: Some(next_pc),
            ctx_depth_break: break_ctx_depth,
            ctx_depth_continue: self.ctx_depth,
        });
        self.parse_statement()?;
        let context = self.flow.pop().expect("loop context");

        self.emit_backward_jump(next_pc);
        self.set_branch_target_here(init_exit);
        self.set_branch_target_here(next_exit);
        self.resolve_breaks_here(context);
        self.ctx_depth -= 1;
        Ok(())
    }

    fn parse_return(&mut self) -> Result<(), ParseError> {
        let position = self.position();
        if self.body_kind != BodyKind::Function {
            return Err(ParseError::syntax(
                "'return' outside of a function",
                position,
            ));
        }
        self.bump();
        if self.check_punct(Punct::Semicolon)
            || self.check_punct(Punct::RBrace)
            || matches!(self.kind(), TokenKind::Eof)
            || self.newline_before()
        {
            self.emit_op(Opcode::Return);
        } else {
            self.parse_expression(false)?;
            self.emit_op(Opcode::ReturnValue);
        }
        self.expect_semicolon()
    }

    fn parse_throw(&mut self) -> Result<(), ParseError> {
        self.bump();
        if self.newline_before() {
            return Err(ParseError::syntax(
                "no line break is allowed after 'throw'",
                self.position(),
            ));
        }
        self.parse_expression(false)?;
        self.emit_op(Opcode::Throw);
        self.expect_semicolon()
    }

    fn parse_with(&mut self) -> Result<(), ParseError> {
        let position = self.position();
        if self.strict {
            return Err(ParseError::syntax(
                "'with' statements are not allowed in strict mode",
                position,
            ));
        }
        self.bump();
        self.parse_paren_expression()?;
        self.emit_op(Opcode::Ext(ExtOpcode::WithEnter));
        self.ctx_depth += 1;
        self.parse_statement()?;
        self.emit_op(Opcode::Ext(ExtOpcode::LexEnvExit));
        self.ctx_depth -= 1;
        Ok(())
    }

    fn parse_try(&mut self) -> Result<(), ParseError> {
        self.bump();
        let (catch_entry, finally_entry) = self.emit_try();
        self.ctx_depth += 1;
        self.parse_block()?;
        self.emit_op(Opcode::TryEnd);
        self.ctx_depth -= 1;

        let has_catch = self.check_keyword(Keyword::Catch);
        let has_finally_ahead = {
            // Peek: catch may be followed by finally.
            has_catch || self.check_keyword(Keyword::Finally)
        };
        if !has_finally_ahead {
            return Err(ParseError::syntax(
                "missing catch or finally after try",
                self.position(),
            ));
        }

        let mut skip_catch = None;
        let mut has_finally = false;

        if has_catch {
            // Normal try completion jumps past the catch block when
            // there is no finally; with a finally, TRY_END routes
            // through it.
            skip_catch = Some(self.emit_forward_branch(Opcode::JumpForward));
            self.bump();
            self.expect_punct(Punct::LParen, "'('")?;
            let position = self.position();
            let param = self.expect_ident("a catch parameter")?;
            self.check_strict_binding_name(&param, position)?;
            let param_lit = self.add_string_literal(&param)?;
            self.expect_punct(Punct::RParen, "')'")?;

            self.set_branch_target_here(catch_entry);
            // The VM pushes the thrown value before entering.
            self.set_depth(1);
            self.emit_ext_lit(Opcode::Ext(ExtOpcode::CatchEnter), param_lit);
            self.ctx_depth += 2; // handler still active + catch environment
            self.parse_block()?;
            self.emit_op(Opcode::Ext(ExtOpcode::LexEnvExit));
            self.emit_op(Opcode::CatchEnd);
            self.ctx_depth -= 2;
        }

        if self.eat_keyword(Keyword::Finally) {
            has_finally = true;
            if let Some(skip) = skip_catch.take() {
                self.set_branch_target_here(skip);
            }
            self.set_branch_target_here(finally_entry);
            self.parse_block()?;
            self.emit_op(Opcode::FinallyEnd);
        }

        if let Some(skip) = skip_catch {
            self.set_branch_target_here(skip);
        }
        if !has_catch && !has_finally {
            return Err(ParseError::syntax(
                "missing catch or finally after try",
                self.position(),
            ));
        }
        Ok(())
    }

    fn parse_switch(&mut self, labels: Vec<String>) -> Result<(), ParseError> {
        self.bump();
        self.parse_paren_expression()?;
        self.expect_punct(Punct::LBrace, "'{'")?;

        // First pass over the clause ranges; emission replays them.
        struct Clause {
            expr_start: Option<usize>, // None for default
            body_start: usize,
            body_end: usize,
        }
        let mut clauses: Vec<Clause> = Vec::new();
        let open = self.pos;
        let mut i = self.pos;
        let mut depth = 0usize;
        let close;
        loop {
            match &self.tokens[i].kind {
                TokenKind::Eof => {
                    return Err(ParseError::syntax(
                        "unterminated switch block",
                        self.tokens[open].position,
                    ))
                }
                TokenKind::Punct(Punct::LBrace)
                | TokenKind::Punct(Punct::LParen)
                | TokenKind::Punct(Punct::LBracket) => {
                    depth += 1;
                    i += 1;
                }
                TokenKind::Punct(Punct::RBrace)
                | TokenKind::Punct(Punct::RParen)
                | TokenKind::Punct(Punct::RBracket) => {
                    if depth == 0 {
                        close = i;
                        break;
                    }
                    depth -= 1;
                    i += 1;
                }
                TokenKind::Keyword(Keyword::Case) if depth == 0 => {
                    if let Some(last) = clauses.last_mut() {
                        last.body_end = i;
                    }
                    let expr_start = i + 1;
                    // Find the clause-terminating colon; conditional
                    // expressions consume their own colons.
                    let mut pending_questions = 0usize;
                    let mut inner = 0usize;
                    let mut j = expr_start;
                    loop {
                        match &self.tokens[j].kind {
                            TokenKind::Eof => {
                                return Err(ParseError::syntax(
                                    "unterminated case clause",
                                    self.tokens[i].position,
                                ))
                            }
                            TokenKind::Punct(Punct::LParen)
                            | TokenKind::Punct(Punct::LBracket)
                            | TokenKind::Punct(Punct::LBrace) => inner += 1,
                            TokenKind::Punct(Punct::RParen)
                            | TokenKind::Punct(Punct::RBracket)
                            | TokenKind::Punct(Punct::RBrace) => inner -= 1,
                            TokenKind::Punct(Punct::Question) if inner == 0 => {
                                pending_questions += 1
                            }
                            TokenKind::Punct(Punct::Colon) if inner == 0 => {
                                if pending_questions == 0 {
                                    break;
                                }
                                pending_questions -= 1;
                            }
                            _ => {}
                        }
                        j += 1;
                    }
                    clauses.push(Clause {
                        expr_start: Some(expr_start),
                        body_start: j + 1,
                        body_end: close_placeholder(),
                    });
                    i = j + 1;
                }
                TokenKind::Keyword(Keyword::Default) if depth == 0 => {
                    if let Some(last) = clauses.last_mut() {
                        last.body_end = i;
                    }
                    if !matches!(self.tokens[i + 1].kind, TokenKind::Punct(Punct::Colon)) {
                        return Err(ParseError::syntax(
                            "expected ':' after 'default'",
                            self.tokens[i].position,
                        ));
                    }
                    clauses.push(Clause {
                        expr_start: None,
                        body_start: i + 2,
                        body_end: close_placeholder(),
                    });
                    i += 2;
                }
                _ => i += 1,
            }
        }
        if let Some(last) = clauses.last_mut() {
            last.body_end = close;
        }
        if clauses.iter().filter(|c| c.expr_start.is_none()).count() > 1 {
            return Err(ParseError::syntax(
                "more than one default clause in switch",
                self.tokens[open].position,
            ));
        }

        // Dispatch chain: the discriminant stays on the stack while the
        // case expressions are compared.
        let mut case_branches = Vec::new();
        for clause in &clauses {
            let Some(expr_start) = clause.expr_start else {
                case_branches.push(None);
                continue;
            };
            self.emit_op(Opcode::Dup);
            let resume = self.pos;
            self.pos = expr_start;
            self.parse_expression(false)?;
            self.pos = resume;
            self.emit_binary(BinaryOp::StrictEquals);
            case_branches.push(Some(self.emit_forward_branch(Opcode::BranchIfTrue)));
        }
        self.emit_op(Opcode::Pop);
        let no_match = self.emit_forward_branch(Opcode::JumpForward);

        // Per-clause entry stubs drop the retained discriminant.
        let mut body_jumps = Vec::new();
        for branch in &case_branches {
            if let Some(id) = *branch {
                self.set_branch_target_here(id);
                self.set_depth(1);
                self.emit_op(Opcode::Pop);
                body_jumps.push(Some(self.emit_forward_branch(Opcode::JumpForward)));
            } else {
                body_jumps.push(None);
            }
        }

        self.flow.push(FlowContext {
            labels,
            breakable: true,
            is_loop: false,
            breaks: Vec::new(),
            continues: Vec::new(),
            continue_target: None,
            ctx_depth_break: self.ctx_depth,
            ctx_depth_continue: self.ctx_depth,
        });

        // Bodies in source order; fall-through is the natural layout.
        let mut default_entry = None;
        for (index, clause) in clauses.iter().enumerate() {
            let entry = self.label_here();
            match body_jumps[index] {
                Some(id) => self.set_branch_target(id, entry),
                None => default_entry = Some(entry),
            }
            let resume = self.pos;
            self.pos = clause.body_start;
            while self.pos < clause.body_end {
                self.parse_statement()?;
            }
            self.pos = resume;
        }

        match default_entry {
            Some(entry) => self.set_branch_target(no_match, entry),
            None => self.set_branch_target_here(no_match),
        }

        let context = self.flow.pop().expect("switch context");
        self.resolve_breaks_here(context);

        self.pos = close + 1;
        Ok(())
    }

    fn find_break_context(&self, label: Option<&str>) -> Option<usize> {
        for (index, context) in self.flow.iter().enumerate().rev() {
            match label {
                Some(label) => {
                    if context.labels.iter().any(|l| l == label) {
                        return Some(index);
                    }
                }
                None => {
                    if context.breakable {
                        return Some(index);
                    }
                }
            }
        }
        None
    }

    fn find_continue_context(&self, label: Option<&str>) -> Option<usize> {
        for (index, context) in self.flow.iter().enumerate().rev() {
            if !context.is_loop {
                continue;
            }
            match label {
                Some(label) => {
                    if context.labels.iter().any(|l| l == label) {
                        return Some(index);
                    }
                }
                None => return Some(index),
            }
        }
        None
    }

    fn parse_break(&mut self) -> Result<(), ParseError> {
        let position = self.position();
        self.bump();
        let label = match self.kind() {
            TokenKind::Ident(name) if !self.newline_before() => {
                let name = name.clone();
                self.bump();
                Some(name)
            }
            _ => None,
        };
        self.expect_semicolon()?;
        let index = self
            .find_break_context(label.as_deref())
            .ok_or_else(|| ParseError::syntax("illegal break statement", position))?;
        let count = self.ctx_depth - self.flow[index].ctx_depth_break;
        let id = if count == 0 {
            self.emit_forward_branch(Opcode::JumpForward)
        } else {
            self.emit_jump_via_finally(count)
        };
        self.flow[index].breaks.push(id);
        Ok(())
    }

    fn parse_continue(&mut self) -> Result<(), ParseError> {
        let position = self.position();
        self.bump();
        let label = match self.kind() {
            TokenKind::Ident(name) if !self.newline_before() => {
                let name = name.clone();
                self.bump();
                Some(name)
            }
            _ => None,
        };
        self.expect_semicolon()?;
        let index = self
            .find_continue_context(label.as_deref())
            .ok_or_else(|| ParseError::syntax("illegal continue statement", position))?;
        let count = self.ctx_depth - self.flow[index].ctx_depth_continue;
        let target = self.flow[index].continue_target;
        let id = if count == 0 {
            match target {
                Some(pc) => {
                    self.emit_backward_jump(pc);
                    return Ok(());
                }
                None => self.emit_forward_branch(Opcode::JumpForward),
            }
        } else {
            let id = self.emit_jump_via_finally(count);
            if let Some(pc) = target {
                self.set_branch_target(id, pc);
                return Ok(());
            }
            id
        };
        self.flow[index].continues.push(id);
        Ok(())
    }

    fn parse_labeled(&mut self, first: String) -> Result<(), ParseError> {
        let mut labels = vec![first];
        self.bump();
        self.bump(); // ident, colon
        loop {
            match self.kind().clone() {
                TokenKind::Ident(name)
                    if matches!(
                        self.tokens[self.pos + 1].kind,
                        TokenKind::Punct(Punct::Colon)
                    ) =>
                {
                    labels.push(name);
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }

        match self.kind().clone() {
            TokenKind::Keyword(Keyword::While) => self.parse_while(labels),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(labels),
            TokenKind::Keyword(Keyword::For) => self.parse_for(labels),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(labels),
            _ => {
                self.flow.push(FlowContext {
                    labels,
                    breakable: true,
                    is_loop: false,
                    breaks: Vec::new(),
                    continues: Vec::new(),
                    continue_target: None,
                    ctx_depth_break: self.ctx_depth,
                    ctx_depth_continue: self.ctx_depth,
                });
                self.parse_statement()?;
                let context = self.flow.pop().expect("label context");
                self.resolve_breaks_here(context);
                Ok(())
            }
        }
    }

    // ----- body ---------------------------------------------------------

    fn compile_body(
        mut self,
        params: &[String],
        name: Option<&str>,
        named_expression: bool,
    ) -> Result<CompiledCode, ParseError> {
        let info = prescan(self.tokens, self.pos, self.end);

        // Decide literal operand width from the pre-scan estimate; the
        // estimate over-counts (duplicates are interned), so narrow
        // encodings are only chosen when they cannot overflow.
        let estimate = info.literal_estimate + params.len() + 8;
        if estimate > 250 {
            self.wide_literals = true;
            self.code.flags.insert(CodeFlags::UINT16_LITERALS);
        }

        for param in params {
            let lit = self.add_string_literal(param)?;
            self.code.parameters.push(lit);
        }
        self.code.argument_count = params.len() as u8;

        for var_name in &info.var_names {
            let lit = self.add_string_literal(var_name)?;
            self.code.declarations.push(Declaration {
                name: lit,
                function: None,
            });
        }

        if let Some(name) = name {
            let lit = self.add_string_literal(name)?;
            self.code.function_name = Some(lit);
        }
        if named_expression {
            self.code.flags.insert(CodeFlags::NAMED_EXPRESSION);
        }

        match self.body_kind {
            BodyKind::Global => self.code.flags.insert(CodeFlags::GLOBAL_CODE),
            BodyKind::Eval => self.code.flags.insert(CodeFlags::EVAL_CODE),
            BodyKind::Function => {}
        }

        // Directive prologue.
        loop {
            let text = match self.kind() {
                TokenKind::Str(text) => text.clone(),
                _ => break,
            };
            let next = &self.tokens[self.pos + 1];
            let terminated = matches!(
                next.kind,
                TokenKind::Punct(Punct::Semicolon) | TokenKind::Punct(Punct::RBrace) | TokenKind::Eof
            ) || next.newline_before;
            if !terminated {
                break;
            }
            if text == "use strict" {
                self.strict = true;
            }
            self.bump();
            let lit = self.add_string_literal(&text)?;
            self.emit_push_literal(lit);
            self.emit_statement_value();
            let _ = self.eat_punct(Punct::Semicolon);
        }

        while self.pos < self.end && !matches!(self.kind(), TokenKind::Eof) {
            self.parse_statement()?;
        }

        self.emit_op(Opcode::Return);
        self.finalize_branches()?;

        if self.strict {
            self.code.flags.insert(CodeFlags::STRICT);
        }
        if self.body_kind == BodyKind::Function
            && (info.references_arguments || info.references_eval)
        {
            self.code.flags.insert(CodeFlags::ARGUMENTS_NEEDED);
        }
        if !self.code.declarations.is_empty() {
            self.code.flags.insert(CodeFlags::HAS_DECLARATIONS);
        }
        if self.body_kind == BodyKind::Function
            && self.code.declarations.is_empty()
            && params.is_empty()
            && !self.code.flags.contains(CodeFlags::ARGUMENTS_NEEDED)
            && !info.references_eval
        {
            self.code.flags.insert(CodeFlags::LEX_ENV_NOT_NEEDED);
        }

        self.code.register_count = self.max_depth;
        Ok(self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Declaration,
    Expression,
    Getter,
    Setter,
}

fn close_placeholder() -> usize {
    usize::MAX
}

fn keyword_text(keyword: Keyword) -> &'static str {
    match keyword {
        Keyword::Var => "var",
        Keyword::Function => "function",
        Keyword::Return => "return",
        Keyword::If => "if",
        Keyword::Else => "else",
        Keyword::While => "while",
        Keyword::Do => "do",
        Keyword::For => "for",
        Keyword::Break => "break",
        Keyword::Continue => "continue",
        Keyword::New => "new",
        Keyword::This => "this",
        Keyword::Typeof => "typeof",
        Keyword::Void => "void",
        Keyword::Delete => "delete",
        Keyword::Instanceof => "instanceof",
        Keyword::In => "in",
        Keyword::Try => "try",
        Keyword::Catch => "catch",
        Keyword::Finally => "finally",
        Keyword::Throw => "throw",
        Keyword::With => "with",
        Keyword::Switch => "switch",
        Keyword::Case => "case",
        Keyword::Default => "default",
        Keyword::True => "true",
        Keyword::False => "false",
        Keyword::Null => "null",
        Keyword::Debugger => "debugger",
    }
}

/// Number-to-string for compile-time property keys; mirrors the
/// runtime conversion for the values object literals can contain.
fn compile_time_number_to_string(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode_system::disassemble;

    fn compile(source: &str) -> CompiledCode {
        parse_program(source, false, ProgramKind::Global).unwrap()
    }

    fn compile_err(source: &str) -> ParseError {
        parse_program(source, false, ProgramKind::Global).unwrap_err()
    }

    #[test]
    fn test_two_literal_fusion() {
        let code = compile("'a' + 'b'");
        let listing = disassemble(&code);
        assert!(
            listing.contains("BINARY_LIT_LIT +"),
            "adjacent literal pushes fuse into the combined form:\n{}",
            listing
        );
    }

    #[test]
    fn test_single_literal_fusion() {
        let code = compile("x * 'k'");
        let listing = disassemble(&code);
        assert!(listing.contains("BINARY_LIT *"), "{}", listing);
    }

    #[test]
    fn test_small_numbers_avoid_literal_pool() {
        let code = compile("1 + 0");
        let listing = disassemble(&code);
        assert!(listing.contains("PUSHNUMBER1"), "{}", listing);
        assert!(listing.contains("PUSHNUMBER0"), "{}", listing);
    }

    #[test]
    fn test_branch_targets_resolve() {
        let code = compile("if (a) { b(); } else { c(); }");
        // Every conditional branch lands inside the byte stream.
        let mut pc = 0;
        while pc < code.code.len() {
            let ins = code.decode_at(pc).expect("well-formed stream");
            pc += ins.length;
        }
        assert_eq!(pc, code.code.len());
    }

    #[test]
    fn test_branch_widening() {
        // A then-branch longer than 255 bytes forces the wide form.
        let mut body = String::from("if (a) { ");
        for i in 0..80 {
            body.push_str(&format!("x = 'padding padding {}'; ", i));
        }
        body.push('}');
        let code = compile(&body);
        let listing = disassemble(&code);
        assert!(listing.contains("BRANCHIFFALSEWIDE"), "{}", listing);
    }

    #[test]
    fn test_register_count_bounds_depth() {
        let code = compile("f(1, 2, 3, g(4, 5))");
        assert!(code.register_count >= 5);
        let simple = compile("x");
        assert!(simple.register_count >= 1);
    }

    #[test]
    fn test_strict_directive_sets_flag() {
        let code = compile("'use strict'; var x;");
        assert!(code.is_strict());
        let sloppy = compile("var x;");
        assert!(!sloppy.is_strict());
    }

    #[test]
    fn test_strict_assignment_to_arguments_rejected() {
        let error = compile_err("'use strict'; function g() { arguments = 2; }");
        assert_eq!(error.kind, core_types::ErrorKind::SyntaxError);
    }

    #[test]
    fn test_strict_checks_inside_functions() {
        assert!(parse_program(
            "function g() { 'use strict'; eval = 1; }",
            false,
            ProgramKind::Global
        )
        .is_err());
        assert!(parse_program(
            "'use strict'; function f(a, a) {}",
            false,
            ProgramKind::Global
        )
        .is_err());
        assert!(parse_program("'use strict'; with (o) {}", false, ProgramKind::Global).is_err());
        assert!(parse_program("'use strict'; delete x;", false, ProgramKind::Global).is_err());
    }

    #[test]
    fn test_function_declaration_hoisted() {
        let code = compile("var a = f(); function f() { return 1; }");
        assert_eq!(code.declarations.len(), 2);
        let func_decl = code
            .declarations
            .iter()
            .find(|d| d.function.is_some())
            .expect("hoisted function entry");
        assert!(matches!(
            code.literals[func_decl.function.unwrap() as usize],
            Literal::Function(_)
        ));
    }

    #[test]
    fn test_function_flags() {
        let code = compile("function uses_args() { return arguments[0]; } function pure() { return 1; }");
        let blobs: Vec<_> = code
            .literals
            .iter()
            .filter_map(|l| match l {
                Literal::Function(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(blobs.len(), 2);
        let uses_args = blobs
            .iter()
            .find(|b| b.name_string() == Some("uses_args"))
            .unwrap();
        assert!(uses_args.flags.contains(CodeFlags::ARGUMENTS_NEEDED));
        let pure = blobs
            .iter()
            .find(|b| b.name_string() == Some("pure"))
            .unwrap();
        assert!(pure.flags.contains(CodeFlags::LEX_ENV_NOT_NEEDED));
    }

    #[test]
    fn test_parameters_recorded() {
        let code = compile("function f(a, b, c) { return a; }");
        let Literal::Function(body) = &code.literals[code
            .declarations
            .iter()
            .find_map(|d| d.function)
            .unwrap() as usize]
        else {
            panic!("expected function literal");
        };
        assert_eq!(body.argument_count, 3);
        assert_eq!(body.parameters.len(), 3);
    }

    #[test]
    fn test_direct_eval_call_site() {
        let code = compile("eval('1 + 1')");
        let listing = disassemble(&code);
        assert!(listing.contains("CALLEVAL"), "{}", listing);
    }

    #[test]
    fn test_call_specializations() {
        let listing = disassemble(&compile("f(); o.m(); f(1); o.m(1);"));
        assert!(listing.contains("CALL0PROP"), "{}", listing);
        assert!(listing.contains("CALL0"), "{}", listing);
        assert!(listing.contains("CALLPROP"), "{}", listing);
    }

    #[test]
    fn test_member_forms() {
        let listing = disassemble(&compile("a.b; a.b.c; x[i];"));
        assert!(listing.contains("PROPLITERALLITERALGET"), "{}", listing);
        assert!(listing.contains("PROPLITERALGET"), "{}", listing);
        assert!(listing.contains("PROPGET"), "{}", listing);
    }

    #[test]
    fn test_compound_member_assignment_uses_fused_get() {
        let listing = disassemble(&compile("a.b += 1;"));
        assert!(listing.contains("ASSIGNPROPLITERALGET"), "{}", listing);
        let listing = disassemble(&compile("a[k] -= 1;"));
        assert!(listing.contains("ASSIGNPROPGET"), "{}", listing);
    }

    #[test]
    fn test_statement_forms_compile() {
        compile("do { x++; } while (x < 10);");
        compile("for (var i = 0; i < 3; i++) { t += i; }");
        compile("for (;;) { break; }");
        compile("for (var k in o) { s += k; }");
        compile("outer: for (;;) { for (;;) { continue outer; } }");
        compile("switch (v) { case 1: a(); case 2: b(); break; default: c(); }");
        compile("with (o) { x = y; }");
        compile("try { f(); } catch (e) { g(e); } finally { h(); }");
        compile("try { f(); } finally { h(); }");
        compile("lbl: { break lbl; }");
        compile("var o = { a: 1, 'b': 2, 3: 'three', get x() { return 1; }, set x(v) {} };");
        compile("var a = [1, , 2, ];");
        compile("debugger;");
    }

    #[test]
    fn test_error_forms() {
        assert!(parse_program("return 1;", false, ProgramKind::Global).is_err());
        assert!(parse_program("break;", false, ProgramKind::Global).is_err());
        assert!(parse_program("continue;", false, ProgramKind::Global).is_err());
        assert!(parse_program("1 = 2;", false, ProgramKind::Global).is_err());
        assert!(parse_program("try { }", false, ProgramKind::Global).is_err());
        assert!(parse_program("/abc/", false, ProgramKind::Global).is_err());
        assert!(parse_program("for (a.b in o) {}", false, ProgramKind::Global).is_err());
    }

    #[test]
    fn test_eval_kind_allows_completion() {
        let code = parse_program("1 + 2", false, ProgramKind::Eval).unwrap();
        assert!(code.flags.contains(CodeFlags::EVAL_CODE));
        let listing = disassemble(&code);
        assert!(listing.contains("STORE_COMPLETION"), "{}", listing);
    }

    #[test]
    fn test_wide_literal_pool() {
        let mut source = String::new();
        for i in 0..300 {
            source.push_str(&format!("var name_{} = 'value_{}';\n", i, i));
        }
        let code = compile(&source);
        assert!(code.uses_wide_literals());
        assert!(code.literals.len() > 255);
    }

    #[test]
    fn test_asi() {
        compile("a = 1\nb = 2");
        compile("return_like()\nc()");
        assert!(parse_program("a = 1 b = 2", false, ProgramKind::Global).is_err());
    }

    #[test]
    fn test_logical_short_circuit_layout() {
        let listing = disassemble(&compile("a || b; c && d;"));
        assert!(listing.contains("BRANCHIFLOGICALTRUE"), "{}", listing);
        assert!(listing.contains("BRANCHIFLOGICALFALSE"), "{}", listing);
    }

    #[test]
    fn test_named_function_expression_flag() {
        let code = compile("var f = function helper() { return helper; };");
        let blob = code
            .literals
            .iter()
            .find_map(|l| match l {
                Literal::Function(f) => Some(f),
                _ => None,
            })
            .unwrap();
        assert!(blob.flags.contains(CodeFlags::NAMED_EXPRESSION));
        assert_eq!(blob.name_string(), Some("helper"));
    }
}
