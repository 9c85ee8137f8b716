//! IR program and basic block definitions

use super::instruction::IrInstruction;
use super::var::{Tag, Var};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Placeholder target of `Ret` inside a compiled function body; replaced per call site
    pub const EXIT: BlockId = BlockId(u32::MAX);

    /// Creates a block id
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == BlockId::EXIT {
            write!(f, "EXIT")
        } else {
            write!(f, "B{}", self.0)
        }
    }
}

/// Basic block in the control flow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Identifier
    pub id: BlockId,
    /// Instructions, ending in a jump unless the block is terminal
    pub instructions: Vec<IrInstruction>,
    /// Successor block ids
    pub successors: Vec<BlockId>,
}

impl BasicBlock {
    /// Creates a block, deriving successors from its final instruction
    pub fn new(id: BlockId, instructions: Vec<IrInstruction>) -> Self {
        let mut successors = instructions
            .last()
            .map(|i| i.successors())
            .unwrap_or_default();
        successors.dedup();
        Self {
            id,
            instructions,
            successors,
        }
    }

    /// True when the block ends the program (trap or final block)
    pub fn is_terminal(&self) -> bool {
        self.successors.is_empty()
    }
}

/// Complete IR program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrProgram {
    /// Program name (the entry function)
    pub name: String,
    /// Entry block
    pub entry: BlockId,
    /// Blocks by id
    pub blocks: BTreeMap<BlockId, BasicBlock>,
    /// Declared variables and their tags
    pub decls: BTreeMap<String, Tag>,
}

impl IrProgram {
    /// Create a new empty IR program
    pub fn new(name: impl Into<String>, entry: BlockId) -> Self {
        Self {
            name: name.into(),
            entry,
            blocks: BTreeMap::new(),
            decls: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) a block
    pub fn add_block(&mut self, block: BasicBlock) {
        self.blocks.insert(block.id, block);
    }

    /// Block by id
    pub fn block(&self, id: BlockId) -> Result<&BasicBlock> {
        self.blocks
            .get(&id)
            .ok_or_else(|| Error::MalformedProgram(format!("missing block {}", id)))
    }

    /// Predecessor map
    pub fn predecessors(&self) -> BTreeMap<BlockId, Vec<BlockId>> {
        let mut preds: BTreeMap<BlockId, Vec<BlockId>> =
            self.blocks.keys().map(|id| (*id, Vec::new())).collect();
        for block in self.blocks.values() {
            for succ in &block.successors {
                preds.entry(*succ).or_default().push(block.id);
            }
        }
        preds
    }

    /// Blocks reachable from the entry, in depth-first order
    pub fn reachable(&self) -> Vec<BlockId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(block) = self.blocks.get(&id) {
                for succ in block.successors.iter().rev() {
                    stack.push(*succ);
                }
            }
        }
        order
    }

    /// Drops blocks unreachable from the entry
    pub fn prune_unreachable(&mut self) {
        let live: BTreeSet<BlockId> = self.reachable().into_iter().collect();
        self.blocks.retain(|id, _| live.contains(id));
    }

    /// Records a variable declaration; a conflicting tag for the same name is an error
    pub fn declare(&mut self, var: &Var) -> Result<()> {
        match self.decls.get(&var.name) {
            Some(tag) if *tag != var.tag => Err(Error::MalformedProgram(format!(
                "variable {} declared as both {} and {}",
                var.name, tag, var.tag
            ))),
            Some(_) => Ok(()),
            None => {
                self.decls.insert(var.name.clone(), var.tag.clone());
                Ok(())
            }
        }
    }

    /// Rebuilds the declaration table from the instructions
    pub fn collect_decls(&mut self) -> Result<()> {
        let mut vars = Vec::new();
        for block in self.blocks.values() {
            for inst in &block.instructions {
                inst.for_each_var(&mut |v: &Var| vars.push(v.clone()));
            }
        }
        self.decls.clear();
        for v in &vars {
            self.declare(v)?;
        }
        Ok(())
    }

    /// Checks that the entry and every jump target exist
    pub fn validate(&self) -> Result<()> {
        self.block(self.entry)?;
        for block in self.blocks.values() {
            for succ in &block.successors {
                if !self.blocks.contains_key(succ) {
                    return Err(Error::MalformedProgram(format!(
                        "block {} jumps to missing block {}",
                        block.id, succ
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total instruction count
    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(|b| b.instructions.len()).sum()
    }

    /// Serializes the program to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::MalformedProgram(e.to_string()))
    }
}

impl Default for IrProgram {
    fn default() -> Self {
        Self::new("", BlockId(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::Expr;

    fn diamond() -> IrProgram {
        let c = Var::new("c", Tag::Bool);
        let mut p = IrProgram::new("diamond", BlockId(0));
        p.add_block(BasicBlock::new(
            BlockId(0),
            vec![
                IrInstruction::Havoc(c.clone()),
                IrInstruction::JumpIf {
                    cond: c,
                    then_block: BlockId(1),
                    else_block: BlockId(2),
                },
            ],
        ));
        p.add_block(BasicBlock::new(BlockId(1), vec![IrInstruction::Jump(BlockId(3))]));
        p.add_block(BasicBlock::new(BlockId(2), vec![IrInstruction::Jump(BlockId(3))]));
        p.add_block(BasicBlock::new(BlockId(3), vec![IrInstruction::Nop]));
        p
    }

    #[test]
    fn test_predecessors() {
        let p = diamond();
        let preds = p.predecessors();
        assert_eq!(preds[&BlockId(3)], vec![BlockId(1), BlockId(2)]);
        assert!(preds[&BlockId(0)].is_empty());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_prune_unreachable() {
        let mut p = diamond();
        p.add_block(BasicBlock::new(BlockId(9), vec![IrInstruction::Nop]));
        p.prune_unreachable();
        assert_eq!(p.blocks.len(), 4);
    }

    #[test]
    fn test_conflicting_decls() {
        let mut p = IrProgram::new("p", BlockId(0));
        p.add_block(BasicBlock::new(
            BlockId(0),
            vec![
                IrInstruction::assign(&Var::new("x", Tag::Int), Expr::zero()),
                IrInstruction::assign(&Var::new("x", Tag::Bool), Expr::Bool(true)),
            ],
        ));
        assert!(matches!(p.collect_decls(), Err(Error::MalformedProgram(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let p = diamond();
        let json = p.to_json().unwrap();
        let back: IrProgram = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_missing_target() {
        let mut p = IrProgram::new("p", BlockId(0));
        p.add_block(BasicBlock::new(BlockId(0), vec![IrInstruction::Jump(BlockId(5))]));
        assert!(p.validate().is_err());
    }
}
