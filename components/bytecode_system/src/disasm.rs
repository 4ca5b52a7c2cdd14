//! Human-readable byte-code listings.

use crate::code::{CompiledCode, Literal};
use crate::opcode::{Opcode, OperandKind};
use std::fmt::Write;

/// Renders a compiled-code blob as a byte-code listing.
///
/// Nested function literals are disassembled recursively after the
/// owning blob, the way the CLI's `--print-bytecode` output shows a
/// whole program.
pub fn disassemble(code: &CompiledCode) -> String {
    let mut out = String::new();
    disassemble_into(code, "<main>", &mut out);
    out
}

fn disassemble_into(code: &CompiledCode, label: &str, out: &mut String) {
    let _ = writeln!(
        out,
        "function {} (args: {}, registers: {}, flags: {:#06x}, literals: {})",
        code.name_string().unwrap_or(label),
        code.argument_count,
        code.register_count,
        code.flags.bits(),
        code.literals.len()
    );

    let mut pc = 0;
    while pc < code.code.len() {
        let Some(ins) = code.decode_at(pc) else {
            let _ = writeln!(out, "  {:04}  <invalid byte {:#04x}>", pc, code.code[pc]);
            break;
        };
        let _ = write!(out, "  {:04}  {}", pc, ins.opcode.name());
        for (slot, kind) in ins.opcode.operands().iter().enumerate() {
            let value = ins.operands[slot];
            match kind {
                OperandKind::Literal => {
                    let _ = write!(out, " lit:{}", value);
                    if let Some(lit) = code.literals.get(value as usize) {
                        match lit {
                            Literal::Number(n) => {
                                let _ = write!(out, " ({})", n);
                            }
                            Literal::String(s) => {
                                let _ = write!(out, " ({:?})", s);
                            }
                            Literal::Function(_) => {
                                let _ = write!(out, " (function)");
                            }
                        }
                    }
                }
                OperandKind::Imm8 | OperandKind::Imm16 => {
                    let _ = write!(out, " {}", value);
                }
                OperandKind::BranchForward8 | OperandKind::BranchForward16 => {
                    // Zero offsets appear in TRY operands meaning "absent".
                    if matches!(ins.opcode, Opcode::Try) && value == 0 {
                        let _ = write!(out, " -");
                    } else {
                        let _ = write!(out, " -> {}", pc + value as usize);
                    }
                }
                OperandKind::BranchBackward8 | OperandKind::BranchBackward16 => {
                    let _ = write!(out, " -> {}", pc - value as usize);
                }
            }
        }
        let _ = writeln!(out);
        pc += ins.length;
    }

    for (index, literal) in code.literals.iter().enumerate() {
        if let Literal::Function(nested) = literal {
            let _ = writeln!(out);
            disassemble_into(nested, &format!("<literal {}>", index), out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::BinaryOp;

    #[test]
    fn test_disassemble_listing() {
        let mut code = CompiledCode::new();
        code.literals.push(Literal::Number(40.0));
        code.literals.push(Literal::Number(2.0));
        code.register_count = 1;
        code.code = vec![
            Opcode::BinaryWithTwoLiterals(BinaryOp::Add).to_byte(),
            0,
            1,
            Opcode::ReturnValue.to_byte(),
        ];

        let listing = disassemble(&code);
        assert!(listing.contains("BINARY_LIT_LIT +"));
        assert!(listing.contains("lit:0 (40)"));
        assert!(listing.contains("RETURNVALUE"));
    }

    #[test]
    fn test_disassemble_nested_function() {
        let mut inner = CompiledCode::new();
        inner.code = vec![Opcode::Return.to_byte()];

        let mut outer = CompiledCode::new();
        outer.literals.push(Literal::Function(std::rc::Rc::new(inner)));
        outer.code = vec![Opcode::PushLiteral.to_byte(), 0, Opcode::Return.to_byte()];

        let listing = disassemble(&outer);
        assert!(listing.contains("<literal 0>"));
    }
}
