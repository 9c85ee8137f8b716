//! # movetac - Move Bytecode to Three-Address Code
//!
//! Compiles resolved Move bytecode into a goto-style intermediate representation suitable for
//! a verifier: operand stacks become named variables, calls are inlined, and structured values
//! (structs, enums, vectors, references) are flattened into scalar variables and
//! integer-indexed maps.
//!
//! ## Quick Start
//!
//! ```rust
//! use movetac::compiler::{Bytecode, Code, CompileOptions, Compiler, Function, FunctionId, Scene};
//! use movetac::types::{ModuleName, QualifiedName, ValueType};
//!
//! # fn main() -> movetac::Result<()> {
//! let name = QualifiedName::new(ModuleName::new(1u8, "math"), "add");
//! let add = Function::new(
//!     FunctionId::simple(name.clone()),
//!     vec![ValueType::U64.into(), ValueType::U64.into()],
//!     vec![ValueType::U64.into()],
//!     Code::new(
//!         vec![],
//!         vec![Bytecode::CopyLoc(0), Bytecode::CopyLoc(1), Bytecode::Add, Bytecode::Ret],
//!     ),
//! );
//!
//! let scene = Scene::from_functions([add]);
//! let compiler = Compiler::new(&scene, CompileOptions::default());
//! let result = compiler.compile(&FunctionId::simple(name))?;
//!
//! assert!(result.warnings.is_empty());
//! assert!(result.program.decls.contains_key("x1$math$add_arg_0"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Scene → IrGenerator → memory-level IR → ReferenceAnalysis → lower_program → core IR
//! ```
//!
//! ### Main Components
//!
//! - [`types`] - Resolved value and reference types, with composed-layout sizes
//! - [`compiler::Scene`] - The functions available for inlining
//! - [`compiler::IrGenerator`] - Stack simulation, block splitting and call inlining
//! - [`compiler::alias`] - Reference alias targets per program point
//! - [`compiler::memory`] - Layouts, locations and the lowering pass
//! - [`compiler::ir::interpreter`] - Concrete evaluator for lowered programs

#![allow(clippy::large_enum_variant)]

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;
pub mod types;

// Re-export main types
pub use compiler::{CompileOptions, CompileResult, Compiler};
pub use error::{Error, Result};
pub use types::{Type, ValueType};
