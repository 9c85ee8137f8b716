//! Debug utilities for bytecode→IR compilation
//!
//! Tools for inspecting generated and lowered IR.

use super::ir::{IrInstruction, IrProgram};
use std::fmt::Write;

/// Print IR program in human-readable format
pub fn dump_ir(program: &IrProgram) {
    print!("{}", format_program(program));
}

/// Render an IR program as text
pub fn format_program(program: &IrProgram) -> String {
    let mut out = String::new();
    let rule = "═══════════════════════════════════════════════════════════";
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "                    IR DUMP: {}", program.name);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Entry: {}", program.entry);
    for (name, tag) in &program.decls {
        let _ = writeln!(out, "  var {}: {}", name, tag);
    }
    let _ = writeln!(out, "───────────────────────────────────────────────────────────");

    for block in program.blocks.values() {
        let _ = writeln!(out, "{}:", block.id);
        for instr in &block.instructions {
            format_instr(&mut out, instr, 1);
        }
    }
    let _ = writeln!(out, "{}", rule);
    out
}

fn format_instr(out: &mut String, instr: &IrInstruction, depth: usize) {
    let indent = "    ".repeat(depth);
    match instr {
        IrInstruction::Ite {
            cond,
            then_branch,
            else_branch,
        } => {
            let _ = writeln!(out, "{}if {} {{", indent, cond);
            for inner in then_branch {
                format_instr(out, inner, depth + 1);
            }
            let _ = writeln!(out, "{}}} else {{", indent);
            for inner in else_branch {
                format_instr(out, inner, depth + 1);
            }
            let _ = writeln!(out, "{}}}", indent);
        }
        other => {
            let _ = writeln!(out, "{}{}", indent, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BasicBlock, BlockId, Expr, Tag, Var};

    #[test]
    fn test_format_nested_ite() {
        let x = Var::new("x", Tag::Bool);
        let mut p = IrProgram::new("f", BlockId(0));
        p.add_block(BasicBlock::new(
            BlockId(0),
            vec![IrInstruction::Ite {
                cond: Expr::var(&x),
                then_branch: vec![IrInstruction::Nop],
                else_branch: vec![IrInstruction::trap("Corrupt reference")],
            }],
        ));
        p.collect_decls().unwrap();
        let text = format_program(&p);
        assert!(text.contains("IR DUMP: f"));
        assert!(text.contains("var x: bool"));
        assert!(text.contains("} else {"));
    }
}
