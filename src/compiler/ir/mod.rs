//! # Intermediate Representation (IR)
//!
//! Bytecode is compiled to a goto-style IR over named, tagged variables. The same instruction
//! set serves two levels:
//!
//! - **memory level**: variables may carry `Move` tags and blocks may contain [`MemoryOp`]s;
//! - **core level**: after lowering, only scalar and map variables remain.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── var.rs          # Tag, Var
//! ├── expr.rs         # BinOp, HashFamily, Expr (pure expressions)
//! ├── instruction.rs  # IrInstruction, MemoryOp, Annotation
//! ├── program.rs      # BlockId, BasicBlock, IrProgram (CFG representation)
//! ├── generator.rs    # IrGenerator: bytecode → memory-level IR, with inlining
//! └── interpreter.rs  # Concrete evaluator for core programs
//! ```
//!
//! ## Key Types
//!
//! - [`Var`] - Named variable with a [`Tag`] (Bool, Bit256, Int, GhostMap, or Move type)
//! - [`IrInstruction`] - Assignment, havoc, assume/assert, jumps, memory operations
//! - [`IrProgram`] - Blocks keyed by [`BlockId`] plus variable declarations
//! - [`IrGenerator`] - Stack simulation and call inlining

mod expr;
mod generator;
mod instruction;
pub mod interpreter;
mod program;
mod var;

pub use expr::{BinOp, Expr, HashFamily};
pub use generator::IrGenerator;
pub use instruction::{Annotation, IrInstruction, MemoryOp};
pub use interpreter::{Execution, HavocSource, Interpreter, Outcome, Value};
pub use program::{BasicBlock, BlockId, IrProgram};
pub use var::{Tag, Var};
