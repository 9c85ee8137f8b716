//! # Move Bytecode to Three-Address-Code Compiler
//!
//! This module compiles resolved Move bytecode into a goto-style IR whose structured values have
//! been flattened into scalar variables and integer-indexed maps, ready for a verifier.
//!
//! ## Architecture
//!
//! ```text
//! Scene + entry → IrGenerator → memory-level IR → ReferenceAnalysis → lower_program → core IR
//!                 (stack sim,                      (alias targets)     (layouts,
//!                  inlining)                                            locations)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use movetac::compiler::{Compiler, CompileOptions};
//!
//! let options = CompileOptions::default();
//! let compiler = Compiler::new(&scene, options);
//! let result = compiler.compile(&entry)?;
//! println!("{}", result.program.to_json()?);
//! ```

pub mod alias;
pub mod bytecode;
pub mod calltrace;
pub mod context;
pub mod debug;
pub mod ir;
pub mod memory;
pub mod summary;

pub use alias::{AliasResolver, CmdPointer, PathComponent, RefTarget, ReferenceAnalysis};
pub use bytecode::{Bytecode, Code, Function, FunctionId, Scene};
pub use context::CompileContext;
pub use debug::{dump_ir, format_program};
pub use ir::{IrGenerator, IrInstruction, IrProgram};
pub use memory::lower_program;
pub use summary::NativeSummary;

use crate::{Error, Result};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Default bound on the blocks produced for one entry function
pub const DEFAULT_MAX_BLOCKS: usize = 100_000;

/// Compilation options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Emit bounds assertions on vector borrows
    pub check_vector_bounds: bool,
    /// Bracket inlined calls with `FuncStart` / `FuncEnd` annotations
    pub call_trace: bool,
    /// Leading vector elements shown in call-trace values
    pub call_trace_vec_elem_count: usize,
    /// Datatypes whose internals may not be accessed, by display name (`0x1::m::S`)
    pub shadowed_types: BTreeSet<String>,
    /// Native functions expanded by summary, by display name (`0x1::m::f`)
    pub summaries: BTreeMap<String, NativeSummary>,
    /// Bound on generated blocks; exceeding it fails the compilation
    pub max_blocks: usize,
}

impl CompileOptions {
    /// Options with all defaults
    pub fn new() -> Self {
        Self {
            check_vector_bounds: true,
            call_trace: true,
            call_trace_vec_elem_count: 4,
            shadowed_types: BTreeSet::new(),
            summaries: BTreeMap::new(),
            max_blocks: DEFAULT_MAX_BLOCKS,
        }
    }

    /// Parses options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Compilation result with metadata
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Memory-level program, before lowering
    pub memory_program: IrProgram,
    /// Lowered core program
    pub program: IrProgram,
    /// Approximations made during compilation (havoced calls, recursion, ...)
    pub warnings: Vec<String>,
}

impl CompileResult {
    /// Number of core IR instructions
    pub fn instruction_count(&self) -> usize {
        self.program.instruction_count()
    }
}

/// Move bytecode to core IR compiler
pub struct Compiler<'s> {
    scene: &'s Scene,
    options: CompileOptions,
}

impl<'s> Compiler<'s> {
    /// Create a compiler over `scene`
    pub fn new(scene: &'s Scene, options: CompileOptions) -> Self {
        Self { scene, options }
    }

    /// Options in effect
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile one entry function
    pub fn compile(&self, entry: &FunctionId) -> Result<CompileResult> {
        // Phase 1: Bytecode to memory-level IR
        let mut generator = IrGenerator::new(self.scene, &self.options);
        let memory_program = generator.generate(entry)?;
        let mut ctx = generator.into_context();
        tracing::debug!(
            "{}: {} blocks, {} instructions at memory level",
            entry,
            memory_program.blocks.len(),
            memory_program.instruction_count()
        );

        // Phase 2: Alias analysis
        let analysis = ReferenceAnalysis::analyze(&memory_program)?;

        // Phase 3: Lowering
        tracing::debug!("lowering {}", entry);
        let program = lower_program(&memory_program, &analysis, &mut ctx)?;

        Ok(CompileResult {
            memory_program,
            program,
            warnings: ctx.take_warnings(),
        })
    }

    /// Compile independent entry functions in parallel, one result per entry
    pub fn compile_all(&self, entries: &[FunctionId]) -> Vec<Result<CompileResult>> {
        entries.par_iter().map(|entry| self.compile(entry)).collect()
    }
}
