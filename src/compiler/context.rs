//! Per-compilation state
//!
//! One [`CompileContext`] exists per entry function being compiled. It owns every allocator
//! and every piece of program-global state, so independent compilations never share anything
//! mutable and may run on separate threads.

use crate::compiler::alias::RefTarget;
use crate::compiler::ir::{BlockId, Expr, IrInstruction, MemoryOp, Tag, Var};
use crate::types::ValueType;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Allocators and entry-time initialization for one compilation
#[derive(Debug, Default)]
pub struct CompileContext {
    next_block: u32,
    next_tmp: u64,
    next_call: u32,
    havoc_init: BTreeSet<Var>,
    string_inits: BTreeMap<Var, Vec<u8>>,
    target_ids: BTreeMap<RefTarget, u32>,
    type_ids: BTreeMap<ValueType, u32>,
    warnings: Vec<String>,
}

impl CompileContext {
    /// Fresh context
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a block id
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    /// Number of block ids handed out so far
    pub fn block_count(&self) -> usize {
        self.next_block as usize
    }

    /// Allocates a uniquely named temporary
    pub fn tmp(&mut self, hint: &str, tag: Tag) -> Var {
        let n = self.next_tmp;
        self.next_tmp += 1;
        Var::new(format!("tmp!{}!{}", hint, n), tag)
    }

    /// Allocates a call id for trace annotations
    pub fn new_call_id(&mut self) -> u32 {
        let id = self.next_call;
        self.next_call += 1;
        id
    }

    /// Ensures `var` is havoced once at program entry, returning it
    pub fn ensure_havoc_init(&mut self, var: Var) -> Var {
        self.havoc_init.insert(var.clone());
        var
    }

    /// Variables registered for entry havoc
    pub fn havoc_init_vars(&self) -> &BTreeSet<Var> {
        &self.havoc_init
    }

    /// Shared variable holding the constant byte string `bytes`
    ///
    /// The variable is initialized once at program entry, however many times the constant
    /// is loaded.
    pub fn string_constant(&mut self, bytes: &[u8]) -> Var {
        let digest = hex::encode(Sha256::digest(bytes));
        let var = Var::new(
            format!("str!{}", &digest[..16]),
            ValueType::vector(ValueType::U8).tag(),
        );
        self.string_inits
            .entry(var.clone())
            .or_insert_with(|| bytes.to_vec());
        var
    }

    /// Drains all pending entry-time initialization: havocs first, then constant strings
    pub fn take_initialization(&mut self) -> Vec<IrInstruction> {
        let mut out: Vec<IrInstruction> = std::mem::take(&mut self.havoc_init)
            .into_iter()
            .map(IrInstruction::Havoc)
            .collect();
        for (var, bytes) in std::mem::take(&mut self.string_inits) {
            let mut elems = Vec::with_capacity(bytes.len());
            for byte in &bytes {
                let elem = self.tmp("byte", Tag::Bit256);
                out.push(IrInstruction::assign(&elem, Expr::num(*byte)));
                elems.push(elem);
            }
            out.push(IrInstruction::Memory(MemoryOp::VecPack {
                dst: var.clone(),
                srcs: elems,
            }));
            out.push(IrInstruction::Annotation(
                crate::compiler::ir::Annotation::ConstString {
                    var,
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                },
            ));
        }
        out
    }

    /// Small integer identifying an alias target; stored in a reference's `!loc` variable
    pub fn target_id(&mut self, target: &RefTarget) -> u32 {
        let next = self.target_ids.len() as u32;
        *self.target_ids.entry(target.clone()).or_insert(next)
    }

    /// Small integer identifying a type, used when hashing type arguments
    pub fn type_id(&mut self, ty: &ValueType) -> u32 {
        let next = self.type_ids.len() as u32;
        *self.type_ids.entry(ty.clone()).or_insert(next)
    }

    /// Logs an approximation and keeps it for the compile result
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    /// Approximations recorded so far
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Takes the recorded approximations
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}
