//! IR instruction definitions
//!
//! A program is built in two stages. The bytecode compiler emits *memory-level* code, in which
//! structured values and references are single `Move`-tagged variables manipulated through
//! [`MemoryOp`]s. Lowering then expands every [`MemoryOp`] (and every `Move`-tagged assign or
//! havoc) into core instructions over scalars and flat maps.

use super::expr::{Expr, HashFamily};
use super::program::BlockId;
use super::var::Var;
use crate::compiler::calltrace::TraceValue;
use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Abstract memory operation (memory-level programs only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryOp {
    // Borrows
    /// `reference := &loc`
    BorrowLoc {
        /// Destination reference
        reference: Var,
        /// Borrowed top-level variable
        loc: Var,
    },
    /// `dst_ref := &src_ref.field`
    BorrowField {
        /// Destination reference
        dst_ref: Var,
        /// Struct reference
        src_ref: Var,
        /// Field index
        field: usize,
    },
    /// `dst_ref := &src_ref[index]`
    VecBorrow {
        /// Destination reference
        dst_ref: Var,
        /// Vector reference
        src_ref: Var,
        /// Element index (u64)
        index: Var,
        /// Emit an "Index out of bounds" assertion
        bounds_check: bool,
    },
    /// `dst_ref := &array_ref[index]`
    GhostArrayBorrow {
        /// Destination reference
        dst_ref: Var,
        /// Ghost array reference
        array_ref: Var,
        /// Element index (u256)
        index: Var,
    },

    // Reference access
    /// `dst := *reference`
    ReadRef {
        /// Destination value
        dst: Var,
        /// Source reference
        reference: Var,
    },
    /// `*reference := src`
    WriteRef {
        /// Destination reference
        reference: Var,
        /// Source value
        src: Var,
    },

    // Structs
    /// `dst := S { srcs.. }`
    PackStruct {
        /// Destination struct
        dst: Var,
        /// Field values, in declaration order
        srcs: Vec<Var>,
    },
    /// `S { dsts.. } := src`
    UnpackStruct {
        /// Field destinations, in declaration order
        dsts: Vec<Var>,
        /// Source struct
        src: Var,
    },

    // Vectors
    /// `dst := vector[srcs..]`
    VecPack {
        /// Destination vector
        dst: Var,
        /// Elements
        srcs: Vec<Var>,
    },
    /// `[dsts..] := src`, asserting the length matches
    VecUnpack {
        /// Element destinations
        dsts: Vec<Var>,
        /// Source vector
        src: Var,
    },
    /// `dst := len(*reference)`
    VecLen {
        /// Destination (u64)
        dst: Var,
        /// Vector reference
        reference: Var,
    },
    /// `(*reference).push(src)`
    VecPushBack {
        /// Vector reference
        reference: Var,
        /// Pushed element
        src: Var,
    },
    /// `dst := (*reference).pop()`
    VecPopBack {
        /// Popped element
        dst: Var,
        /// Vector reference
        reference: Var,
    },

    // Enums
    /// `dst := E::variant { srcs.. }`
    PackVariant {
        /// Destination enum
        dst: Var,
        /// Field values
        srcs: Vec<Var>,
        /// Variant index
        variant: usize,
    },
    /// `E::variant { dsts.. } := src`
    UnpackVariant {
        /// Field destinations
        dsts: Vec<Var>,
        /// Source enum
        src: Var,
        /// Variant index
        variant: usize,
        /// Emit a "Variant tag mismatch" assertion
        check: bool,
    },
    /// `dsts := &(*src_ref as E::variant).fields`
    UnpackVariantRef {
        /// Field reference destinations
        dsts: Vec<Var>,
        /// Enum reference
        src_ref: Var,
        /// Variant index
        variant: usize,
        /// Emit a "Variant tag mismatch" assertion
        check: bool,
    },
    /// `index := variant_of(*reference)`
    VariantIndex {
        /// Destination (Bit256)
        index: Var,
        /// Enum reference
        reference: Var,
    },

    // Value-level
    /// `dst := hash_family(loc)`
    Hash {
        /// Destination (Bit256)
        dst: Var,
        /// Hashed value
        loc: Var,
        /// Hash family
        family: HashFamily,
    },
    /// `dst := (a == b)`, structurally
    Eq {
        /// Destination (Bool)
        dst: Var,
        /// Left operand
        a: Var,
        /// Right operand
        b: Var,
    },
}

impl MemoryOp {
    /// Operation name, used in errors and dumps
    pub fn name(&self) -> &'static str {
        match self {
            MemoryOp::BorrowLoc { .. } => "borrow_loc",
            MemoryOp::BorrowField { .. } => "borrow_field",
            MemoryOp::VecBorrow { .. } => "vec_borrow",
            MemoryOp::GhostArrayBorrow { .. } => "ghost_array_borrow",
            MemoryOp::ReadRef { .. } => "read_ref",
            MemoryOp::WriteRef { .. } => "write_ref",
            MemoryOp::PackStruct { .. } => "pack",
            MemoryOp::UnpackStruct { .. } => "unpack",
            MemoryOp::VecPack { .. } => "vec_pack",
            MemoryOp::VecUnpack { .. } => "vec_unpack",
            MemoryOp::VecLen { .. } => "vec_len",
            MemoryOp::VecPushBack { .. } => "vec_push_back",
            MemoryOp::VecPopBack { .. } => "vec_pop_back",
            MemoryOp::PackVariant { .. } => "pack_variant",
            MemoryOp::UnpackVariant { .. } => "unpack_variant",
            MemoryOp::UnpackVariantRef { .. } => "unpack_variant_ref",
            MemoryOp::VariantIndex { .. } => "variant_index",
            MemoryOp::Hash { .. } => "hash",
            MemoryOp::Eq { .. } => "eq",
        }
    }

    /// Visits every variable the operation mentions
    pub fn for_each_var(&self, f: &mut dyn FnMut(&Var)) {
        match self {
            MemoryOp::BorrowLoc { reference, loc } => {
                f(reference);
                f(loc);
            }
            MemoryOp::BorrowField { dst_ref, src_ref, .. } => {
                f(dst_ref);
                f(src_ref);
            }
            MemoryOp::VecBorrow {
                dst_ref,
                src_ref,
                index,
                ..
            } => {
                f(dst_ref);
                f(src_ref);
                f(index);
            }
            MemoryOp::GhostArrayBorrow {
                dst_ref,
                array_ref,
                index,
            } => {
                f(dst_ref);
                f(array_ref);
                f(index);
            }
            MemoryOp::ReadRef { dst, reference } | MemoryOp::VecLen { dst, reference } => {
                f(dst);
                f(reference);
            }
            MemoryOp::WriteRef { reference, src } | MemoryOp::VecPushBack { reference, src } => {
                f(reference);
                f(src);
            }
            MemoryOp::VecPopBack { dst, reference } => {
                f(dst);
                f(reference);
            }
            MemoryOp::PackStruct { dst, srcs }
            | MemoryOp::VecPack { dst, srcs }
            | MemoryOp::PackVariant { dst, srcs, .. } => {
                f(dst);
                srcs.iter().for_each(|v| f(v));
            }
            MemoryOp::UnpackStruct { dsts, src }
            | MemoryOp::VecUnpack { dsts, src }
            | MemoryOp::UnpackVariant { dsts, src, .. } => {
                dsts.iter().for_each(|v| f(v));
                f(src);
            }
            MemoryOp::UnpackVariantRef { dsts, src_ref, .. } => {
                dsts.iter().for_each(|v| f(v));
                f(src_ref);
            }
            MemoryOp::VariantIndex { index, reference } => {
                f(index);
                f(reference);
            }
            MemoryOp::Hash { dst, loc, .. } => {
                f(dst);
                f(loc);
            }
            MemoryOp::Eq { dst, a, b } => {
                f(dst);
                f(a);
                f(b);
            }
        }
    }
}

fn join_vars(vars: &[Var]) -> String {
    vars.iter()
        .map(|v| v.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for MemoryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryOp::BorrowLoc { reference, loc } => write!(f, "{} := &{}", reference, loc),
            MemoryOp::BorrowField {
                dst_ref,
                src_ref,
                field,
            } => write!(f, "{} := &{}.{}", dst_ref, src_ref, field),
            MemoryOp::VecBorrow {
                dst_ref,
                src_ref,
                index,
                bounds_check,
            } => write!(
                f,
                "{} := &{}[{}]{}",
                dst_ref,
                src_ref,
                index,
                if *bounds_check { "" } else { " (unchecked)" }
            ),
            MemoryOp::GhostArrayBorrow {
                dst_ref,
                array_ref,
                index,
            } => write!(f, "{} := &ghost {}[{}]", dst_ref, array_ref, index),
            MemoryOp::ReadRef { dst, reference } => write!(f, "{} := *{}", dst, reference),
            MemoryOp::WriteRef { reference, src } => write!(f, "*{} := {}", reference, src),
            MemoryOp::PackStruct { dst, srcs } => write!(f, "{} := pack({})", dst, join_vars(srcs)),
            MemoryOp::UnpackStruct { dsts, src } => {
                write!(f, "({}) := unpack({})", join_vars(dsts), src)
            }
            MemoryOp::VecPack { dst, srcs } => write!(f, "{} := vector[{}]", dst, join_vars(srcs)),
            MemoryOp::VecUnpack { dsts, src } => write!(f, "[{}] := {}", join_vars(dsts), src),
            MemoryOp::VecLen { dst, reference } => write!(f, "{} := len(*{})", dst, reference),
            MemoryOp::VecPushBack { reference, src } => {
                write!(f, "push_back(*{}, {})", reference, src)
            }
            MemoryOp::VecPopBack { dst, reference } => {
                write!(f, "{} := pop_back(*{})", dst, reference)
            }
            MemoryOp::PackVariant { dst, srcs, variant } => {
                write!(f, "{} := pack_variant#{}({})", dst, variant, join_vars(srcs))
            }
            MemoryOp::UnpackVariant {
                dsts, src, variant, ..
            } => write!(f, "({}) := unpack_variant#{}({})", join_vars(dsts), variant, src),
            MemoryOp::UnpackVariantRef {
                dsts,
                src_ref,
                variant,
                ..
            } => write!(
                f,
                "({}) := &unpack_variant#{}(*{})",
                join_vars(dsts),
                variant,
                src_ref
            ),
            MemoryOp::VariantIndex { index, reference } => {
                write!(f, "{} := variant_index(*{})", index, reference)
            }
            MemoryOp::Hash { dst, loc, family } => write!(f, "{} := {}({})", dst, family, loc),
            MemoryOp::Eq { dst, a, b } => write!(f, "{} := eq({}, {})", dst, a, b),
        }
    }
}

/// Call-trace and constant annotations (no semantic effect)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Annotation {
    /// Entry into an inlined call
    FuncStart {
        /// Unique id pairing this start with its end
        call_id: u32,
        /// Callee display name
        name: String,
        /// Callee parameter types
        params: Vec<Type>,
        /// Callee return types
        return_types: Vec<Type>,
        /// Argument values
        args: Vec<TraceValue>,
    },
    /// Return from an inlined call
    FuncEnd {
        /// Id of the matching start
        call_id: u32,
        /// Callee display name
        name: String,
        /// Returned values
        returns: Vec<TraceValue>,
    },
    /// A string constant was materialized into `var`
    ConstString {
        /// String variable
        var: Var,
        /// Decoded text (lossy UTF-8)
        text: String,
    },
}

impl Annotation {
    /// Visits every variable the annotation mentions
    pub fn for_each_var(&self, f: &mut dyn FnMut(&Var)) {
        match self {
            Annotation::FuncStart { args, .. } => args.iter().for_each(|a| a.for_each_var(f)),
            Annotation::FuncEnd { returns, .. } => returns.iter().for_each(|r| r.for_each_var(f)),
            Annotation::ConstString { var, .. } => f(var),
        }
    }
}

/// IR instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrInstruction {
    // Data
    /// `dst := expr`
    Assign {
        /// Destination
        dst: Var,
        /// Value
        expr: Expr,
    },
    /// `dst := *` (unconstrained)
    Havoc(Var),

    // Verification
    /// Prune executions where the condition is false
    Assume(Expr),
    /// Fail with `message` when the condition is false
    Assert {
        /// Checked condition
        cond: Expr,
        /// Failure message
        message: String,
    },

    // Control flow
    /// Unconditional jump
    Jump(BlockId),
    /// Two-way branch on a Bool variable
    JumpIf {
        /// Condition
        cond: Var,
        /// Target when true
        then_block: BlockId,
        /// Target when false
        else_block: BlockId,
    },
    /// Structured conditional (used for reference dispatch)
    Ite {
        /// Condition
        cond: Expr,
        /// Executed when true
        then_branch: Vec<IrInstruction>,
        /// Executed when false
        else_branch: Vec<IrInstruction>,
    },

    // Metadata
    /// Free-form marker
    Label(String),
    /// Trace annotation
    Annotation(Annotation),
    /// Abstract memory operation (memory-level only)
    Memory(MemoryOp),
    /// No operation
    Nop,
}

impl IrInstruction {
    /// `dst := expr`
    pub fn assign(dst: &Var, expr: Expr) -> Self {
        IrInstruction::Assign {
            dst: dst.clone(),
            expr,
        }
    }

    /// Assertion with a message
    pub fn assert(cond: Expr, message: impl Into<String>) -> Self {
        IrInstruction::Assert {
            cond,
            message: message.into(),
        }
    }

    /// Unconditional failure
    pub fn trap(message: impl Into<String>) -> Self {
        IrInstruction::assert(Expr::Bool(false), message)
    }

    /// True for instructions that end a basic block
    pub fn is_terminator(&self) -> bool {
        matches!(self, IrInstruction::Jump(_) | IrInstruction::JumpIf { .. })
    }

    /// True for `assert false`
    pub fn is_trap(&self) -> bool {
        matches!(
            self,
            IrInstruction::Assert {
                cond: Expr::Bool(false),
                ..
            }
        )
    }

    /// Jump targets of a terminator
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            IrInstruction::Jump(b) => vec![*b],
            IrInstruction::JumpIf {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            _ => vec![],
        }
    }

    /// Rewrites jump targets through `f`
    pub fn remap_targets(&mut self, f: &mut impl FnMut(BlockId) -> BlockId) {
        match self {
            IrInstruction::Jump(b) => *b = f(*b),
            IrInstruction::JumpIf {
                then_block,
                else_block,
                ..
            } => {
                *then_block = f(*then_block);
                *else_block = f(*else_block);
            }
            _ => {}
        }
    }

    /// Rewrites the call ids of call-trace annotations
    pub fn remap_call_ids(&mut self, f: &mut impl FnMut(u32) -> u32) {
        if let IrInstruction::Annotation(
            Annotation::FuncStart { call_id, .. } | Annotation::FuncEnd { call_id, .. },
        ) = self
        {
            *call_id = f(*call_id);
        }
    }

    /// Visits every variable the instruction mentions, nested branches included
    pub fn for_each_var(&self, f: &mut dyn FnMut(&Var)) {
        match self {
            IrInstruction::Assign { dst, expr } => {
                f(dst);
                expr.for_each_var(f);
            }
            IrInstruction::Havoc(v) => f(v),
            IrInstruction::Assume(e) | IrInstruction::Assert { cond: e, .. } => e.for_each_var(f),
            IrInstruction::JumpIf { cond, .. } => f(cond),
            IrInstruction::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.for_each_var(f);
                for i in then_branch.iter().chain(else_branch.iter()) {
                    i.for_each_var(f);
                }
            }
            IrInstruction::Annotation(a) => a.for_each_var(f),
            IrInstruction::Memory(op) => op.for_each_var(f),
            IrInstruction::Jump(_) | IrInstruction::Label(_) | IrInstruction::Nop => {}
        }
    }
}

impl fmt::Display for IrInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrInstruction::Assign { dst, expr } => write!(f, "{} := {}", dst, expr),
            IrInstruction::Havoc(v) => write!(f, "{} := havoc", v),
            IrInstruction::Assume(e) => write!(f, "assume {}", e),
            IrInstruction::Assert { cond, message } => write!(f, "assert {} \"{}\"", cond, message),
            IrInstruction::Jump(b) => write!(f, "jump {}", b),
            IrInstruction::JumpIf {
                cond,
                then_block,
                else_block,
            } => write!(f, "if {} jump {} else {}", cond, then_block, else_block),
            IrInstruction::Ite { cond, .. } => write!(f, "ite {} {{ .. }}", cond),
            IrInstruction::Label(s) => write!(f, "// {}", s),
            IrInstruction::Annotation(Annotation::FuncStart { call_id, name, .. }) => {
                write!(f, "@start #{} {}", call_id, name)
            }
            IrInstruction::Annotation(Annotation::FuncEnd { call_id, name, .. }) => {
                write!(f, "@end #{} {}", call_id, name)
            }
            IrInstruction::Annotation(Annotation::ConstString { var, text }) => {
                write!(f, "@string {} = {:?}", var, text)
            }
            IrInstruction::Memory(op) => write!(f, "{}", op),
            IrInstruction::Nop => write!(f, "nop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::Tag;

    #[test]
    fn test_successors_and_remap() {
        let c = Var::new("c", Tag::Bool);
        let mut jump = IrInstruction::JumpIf {
            cond: c,
            then_block: BlockId(1),
            else_block: BlockId(2),
        };
        assert!(jump.is_terminator());
        jump.remap_targets(&mut |b| BlockId(b.0 + 10));
        assert_eq!(jump.successors(), vec![BlockId(11), BlockId(12)]);
    }

    #[test]
    fn test_trap() {
        let t = IrInstruction::trap("Abort");
        assert!(t.is_trap());
        assert_eq!(t.to_string(), "assert false \"Abort\"");
    }
}
