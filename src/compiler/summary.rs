//! Native function summaries
//!
//! A native function registered in [`CompileOptions::summaries`](crate::compiler::CompileOptions)
//! is expanded in place instead of being havoced.
//!
//! | Kind    | Result                                                               |
//! |---------|----------------------------------------------------------------------|
//! | `Hash`  | deterministic keyed hash of the type and value arguments (one u256) |
//! | `Ghost` | reference to (or value of) a global ghost slot keyed by the args     |

use crate::compiler::bytecode::Function;
use crate::compiler::context::CompileContext;
use crate::compiler::ir::{Expr, HashFamily, IrInstruction, MemoryOp, Tag, Var};
use crate::types::{Type, ValueType};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// How a native function is expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeSummary {
    /// Keyed hash of all arguments
    Hash,
    /// Global ghost storage indexed by the arguments
    Ghost,
}

impl NativeSummary {
    /// Expands a call to `function` with `args` into `returns`
    pub fn expand(
        self,
        ctx: &mut CompileContext,
        function: &Function,
        args: &[Var],
        returns: &[Var],
    ) -> Result<Vec<IrInstruction>> {
        match self {
            NativeSummary::Hash => hash_summary(ctx, function, args, returns),
            NativeSummary::Ghost => ghost_summary(ctx, function, args, returns),
        }
    }
}

fn single_return<'r>(function: &Function, returns: &'r [Var]) -> Result<&'r Var> {
    match returns {
        [ret] if function.returns.len() == 1 => Ok(ret),
        _ => Err(Error::ArityMismatch {
            function: function.id.to_string(),
            what: "results",
            expected: 1,
            got: returns.len(),
        }),
    }
}

/// `dst := hash_f(type ids, args)`, hashing aggregates individually first
pub fn hash_arguments(
    ctx: &mut CompileContext,
    function: &Function,
    args: &[Var],
    dst: &Var,
) -> Vec<IrInstruction> {
    let fn_name = function.id.to_var_name();
    let mut out = Vec::new();
    let mut hash_args: Vec<Expr> = function
        .id
        .type_args
        .iter()
        .map(|t| Expr::num(ctx.type_id(t)))
        .collect();

    for arg in args {
        let value = match arg.move_type() {
            Some(Type::Reference(ty)) => {
                let unwrapped = ctx.tmp("unwrapped", ty.tag());
                out.push(IrInstruction::Memory(MemoryOp::ReadRef {
                    dst: unwrapped.clone(),
                    reference: arg.clone(),
                }));
                unwrapped
            }
            _ => arg.clone(),
        };
        if value.tag.is_move() {
            let simplified = ctx.tmp("simplified", Tag::Bit256);
            out.push(IrInstruction::Memory(MemoryOp::Hash {
                dst: simplified.clone(),
                loc: value,
                family: HashFamily::Argument(fn_name.clone()),
            }));
            hash_args.push(Expr::var(&simplified));
        } else if value.tag == Tag::Bool {
            hash_args.push(Expr::ite(Expr::var(&value), Expr::num(1u8), Expr::zero()));
        } else {
            hash_args.push(Expr::var(&value));
        }
    }

    out.push(IrInstruction::assign(
        dst,
        Expr::hash(HashFamily::Function(fn_name), hash_args),
    ));
    out
}

fn hash_summary(
    ctx: &mut CompileContext,
    function: &Function,
    args: &[Var],
    returns: &[Var],
) -> Result<Vec<IrInstruction>> {
    let dst = single_return(function, returns)?;
    if function.returns[0] != Type::Value(ValueType::U256) {
        return Err(Error::type_mismatch(
            format!("hash summary of {}", function.id),
            "u256 result",
            &function.returns[0],
        ));
    }
    Ok(hash_arguments(ctx, function, args, dst))
}

/// Ghost storage: one variable per function instantiation
///
/// - no parameters: the variable holds the value directly
/// - one integer parameter: a ghost array indexed by it
/// - otherwise: a ghost array indexed by the hash of the arguments
///
/// A reference result points into the storage; a value result is read out of it.
fn ghost_summary(
    ctx: &mut CompileContext,
    function: &Function,
    args: &[Var],
    returns: &[Var],
) -> Result<Vec<IrInstruction>> {
    let dst = single_return(function, returns)?;
    let (is_ref, value_ty) = match &function.returns[0] {
        Type::Reference(ty) => (true, ty.clone()),
        Type::Value(ty) => (false, ty.clone()),
    };
    let reference = if is_ref {
        dst.clone()
    } else {
        ctx.tmp("ghostRef", Type::Reference(value_ty.clone()).tag())
    };
    let name = format!("ghost!{}", function.id.to_var_name());
    let mut out = Vec::new();

    let index = match (function.params.as_slice(), args) {
        ([], _) => None,
        ([Type::Value(ValueType::Bits(_))], [arg]) => Some(arg.clone()),
        _ => {
            let hash = ctx.tmp("ghostIndex", Tag::Bit256);
            out.extend(hash_arguments(ctx, function, args, &hash));
            Some(hash)
        }
    };

    match index {
        None => {
            let storage = ctx.ensure_havoc_init(Var::new(name, value_ty.tag()));
            out.push(IrInstruction::Memory(MemoryOp::BorrowLoc {
                reference: reference.clone(),
                loc: storage,
            }));
        }
        Some(index) => {
            let array_ty = ValueType::ghost_array(value_ty);
            let storage = ctx.ensure_havoc_init(Var::new(name, array_ty.tag()));
            let array_ref = ctx.tmp("ghostArrayRef", Type::Reference(array_ty).tag());
            out.push(IrInstruction::Memory(MemoryOp::BorrowLoc {
                reference: array_ref.clone(),
                loc: storage,
            }));
            out.push(IrInstruction::Memory(MemoryOp::GhostArrayBorrow {
                dst_ref: reference.clone(),
                array_ref,
                index,
            }));
        }
    }

    if !is_ref {
        out.push(IrInstruction::Memory(MemoryOp::ReadRef {
            dst: dst.clone(),
            reference,
        }));
    }
    Ok(out)
}
