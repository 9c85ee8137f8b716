//! # Reference Alias Resolution
//!
//! Lowering needs to know, at every memory operation, which storage each reference may point
//! into. A *target* is a top-level variable plus the access path from that variable to the
//! referenced value:
//!
//! ```text
//! v: vector<Point>
//! r1 = &v              {(v, [])}
//! r2 = &r1[i]          {(v, [VecElem])}
//! r3 = &r2.y           {(v, [VecElem, Field(1)])}
//! ```
//!
//! [`AliasResolver`] is the seam; [`ReferenceAnalysis`] is the built-in forward dataflow
//! implementation over memory-level programs. Its join is set union, so a reference that may
//! come from several borrows carries several targets, and lowering dispatches over them.

use crate::compiler::ir::{BlockId, IrInstruction, IrProgram, MemoryOp, Var};
use crate::types::{Type, ValueType};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// One step of an access path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathComponent {
    /// Struct field
    Field(usize),
    /// Field of a specific enum variant
    EnumField {
        /// Variant index
        variant: usize,
        /// Field index within the variant
        field: usize,
    },
    /// Some vector element
    VecElem,
    /// Some ghost array element
    GhostArrayElem,
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathComponent::Field(i) => write!(f, ".{}", i),
            PathComponent::EnumField { variant, field } => write!(f, ".#{}.{}", variant, field),
            PathComponent::VecElem => write!(f, "[*]"),
            PathComponent::GhostArrayElem => write!(f, "{{*}}"),
        }
    }
}

/// A location a reference may point into
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefTarget {
    /// Top-level variable holding the storage
    pub loc: Var,
    /// Access path, root first
    pub path: Vec<PathComponent>,
}

impl RefTarget {
    /// Target covering the whole of `loc`
    pub fn root(loc: Var) -> Self {
        Self { loc, path: vec![] }
    }

    /// Target one step deeper
    pub fn child(&self, component: PathComponent) -> Self {
        let mut path = self.path.clone();
        path.push(component);
        Self {
            loc: self.loc.clone(),
            path,
        }
    }

    /// Type of the storage variable
    pub fn base_type(&self) -> Option<&ValueType> {
        match self.loc.move_type() {
            Some(Type::Value(v)) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.loc)?;
        for c in &self.path {
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Position of an instruction within a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CmdPointer {
    /// Block
    pub block: BlockId,
    /// Index within the block
    pub pos: usize,
}

impl CmdPointer {
    /// Creates a pointer
    pub fn new(block: BlockId, pos: usize) -> Self {
        Self { block, pos }
    }
}

impl fmt::Display for CmdPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.pos)
    }
}

/// Points-to oracle consumed by lowering
pub trait AliasResolver {
    /// Targets of `reference` just before the instruction at `point`
    fn targets_before(&self, point: CmdPointer, reference: &Var) -> &BTreeSet<RefTarget>;

    /// Targets of `reference` just after the instruction at `point`
    fn targets_after(&self, point: CmdPointer, reference: &Var) -> &BTreeSet<RefTarget>;
}

type RefState = BTreeMap<Var, BTreeSet<RefTarget>>;

/// Forward points-to analysis over a memory-level program
///
/// States are recorded only around [`MemoryOp`] instructions, the only places lowering asks.
#[derive(Debug, Default)]
pub struct ReferenceAnalysis {
    before: BTreeMap<CmdPointer, RefState>,
    after: BTreeMap<CmdPointer, RefState>,
    empty: BTreeSet<RefTarget>,
}

impl ReferenceAnalysis {
    /// Runs the analysis to a fixpoint
    pub fn analyze(program: &IrProgram) -> Result<Self> {
        let mut block_in: BTreeMap<BlockId, RefState> = BTreeMap::new();
        block_in.insert(program.entry, RefState::new());
        let mut worklist: VecDeque<BlockId> = VecDeque::from([program.entry]);
        let mut queued: BTreeSet<BlockId> = BTreeSet::from([program.entry]);

        while let Some(id) = worklist.pop_front() {
            queued.remove(&id);
            let block = program.block(id)?;
            let mut state = block_in.get(&id).cloned().unwrap_or_default();
            for inst in &block.instructions {
                state = transfer(state, inst)?;
            }
            for succ in &block.successors {
                let changed = match block_in.get_mut(succ) {
                    Some(existing) => join_into(existing, &state),
                    None => {
                        block_in.insert(*succ, state.clone());
                        true
                    }
                };
                if changed && queued.insert(*succ) {
                    worklist.push_back(*succ);
                }
            }
        }

        // Replay each block once with its final in-state to record per-command states
        let mut analysis = ReferenceAnalysis::default();
        for (id, in_state) in block_in {
            let block = program.block(id)?;
            let mut state = in_state;
            for (pos, inst) in block.instructions.iter().enumerate() {
                let is_memory = matches!(inst, IrInstruction::Memory(_));
                if is_memory {
                    analysis.before.insert(CmdPointer::new(id, pos), state.clone());
                }
                state = transfer(state, inst)?;
                if is_memory {
                    analysis.after.insert(CmdPointer::new(id, pos), state.clone());
                }
            }
        }
        tracing::debug!(
            "reference analysis of {}: {} memory operations",
            program.name,
            analysis.before.len()
        );
        Ok(analysis)
    }

    fn lookup<'a>(
        &'a self,
        states: &'a BTreeMap<CmdPointer, RefState>,
        point: CmdPointer,
        reference: &Var,
    ) -> &'a BTreeSet<RefTarget> {
        states
            .get(&point)
            .and_then(|s| s.get(reference))
            .unwrap_or(&self.empty)
    }
}

impl AliasResolver for ReferenceAnalysis {
    fn targets_before(&self, point: CmdPointer, reference: &Var) -> &BTreeSet<RefTarget> {
        self.lookup(&self.before, point, reference)
    }

    fn targets_after(&self, point: CmdPointer, reference: &Var) -> &BTreeSet<RefTarget> {
        self.lookup(&self.after, point, reference)
    }
}

/// Unions `other` into `into`, reporting whether anything was added
fn join_into(into: &mut RefState, other: &RefState) -> bool {
    let mut changed = false;
    for (var, targets) in other {
        let entry = into.entry(var.clone()).or_default();
        for t in targets {
            changed |= entry.insert(t.clone());
        }
    }
    changed
}

fn derive(state: &RefState, src: &Var, component: PathComponent) -> BTreeSet<RefTarget> {
    state
        .get(src)
        .map(|targets| targets.iter().map(|t| t.child(component)).collect())
        .unwrap_or_default()
}

fn transfer(mut state: RefState, inst: &IrInstruction) -> Result<RefState> {
    match inst {
        IrInstruction::Assign { dst, expr } if dst.tag.is_reference() => match expr {
            crate::compiler::ir::Expr::Var(src) if src.tag.is_reference() => {
                let targets = state.get(src).cloned().unwrap_or_default();
                state.insert(dst.clone(), targets);
            }
            _ => {
                return Err(Error::MalformedProgram(format!(
                    "illegal reference assignment: {}",
                    inst
                )))
            }
        },
        IrInstruction::Memory(op) => match op {
            MemoryOp::BorrowLoc { reference, loc } => {
                state.insert(
                    reference.clone(),
                    BTreeSet::from([RefTarget::root(loc.clone())]),
                );
            }
            MemoryOp::BorrowField {
                dst_ref,
                src_ref,
                field,
            } => {
                let targets = derive(&state, src_ref, PathComponent::Field(*field));
                state.insert(dst_ref.clone(), targets);
            }
            MemoryOp::VecBorrow {
                dst_ref, src_ref, ..
            } => {
                let targets = derive(&state, src_ref, PathComponent::VecElem);
                state.insert(dst_ref.clone(), targets);
            }
            MemoryOp::GhostArrayBorrow {
                dst_ref, array_ref, ..
            } => {
                let targets = derive(&state, array_ref, PathComponent::GhostArrayElem);
                state.insert(dst_ref.clone(), targets);
            }
            MemoryOp::UnpackVariantRef {
                dsts,
                src_ref,
                variant,
                ..
            } => {
                for (field, dst) in dsts.iter().enumerate() {
                    let targets = derive(
                        &state,
                        src_ref,
                        PathComponent::EnumField {
                            variant: *variant,
                            field,
                        },
                    );
                    state.insert(dst.clone(), targets);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(state)
}
