//! # Bytecode Model
//!
//! A resolved, monomorphized view of function bytecode. Generic type parameters are already
//! substituted and the immutable/mutable borrow pairs are collapsed into one instruction each.
//!
//! ## Basic blocks
//!
//! A block starts at offset 0 or at any branch target, and ends after a control transfer:
//!
//! | Ends a block                           | Why                               |
//! |----------------------------------------|-----------------------------------|
//! | `BrTrue`, `BrFalse`, `Branch`          | explicit control flow             |
//! | `VariantSwitch`                        | multi-way branch                  |
//! | `Call`                                 | callee is inlined between blocks  |
//! | `Ret`, `Abort`                         | leaves the function               |

use crate::types::{BitWidth, QualifiedName, Type, ValueType};
use crate::{Error, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A function together with its resolved type arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    /// Qualified function name
    pub name: QualifiedName,
    /// Resolved type arguments
    pub type_args: Vec<ValueType>,
}

impl FunctionId {
    /// Identifies a function instantiation
    pub fn new(name: QualifiedName, type_args: Vec<ValueType>) -> Self {
        Self { name, type_args }
    }

    /// Non-generic function
    pub fn simple(name: QualifiedName) -> Self {
        Self::new(name, vec![])
    }

    /// Identifier-safe rendering used as the prefix of every IR variable this function owns
    pub fn to_var_name(&self) -> String {
        let mut s = self.name.to_var_name();
        for arg in &self.type_args {
            s.push('$');
            s.push_str(&arg.sym_name_ext());
        }
        s
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.type_args.is_empty() {
            let args: Vec<String> = self.type_args.iter().map(|t| t.to_string()).collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        Ok(())
    }
}

/// Resolved bytecode instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bytecode {
    // Control flow
    /// No operation
    Nop,
    /// Drop the top of the stack
    Pop,
    /// Return the top `returns.len()` values
    Ret,
    /// Abort with the error code on the stack
    Abort,
    /// Branch to the target if the popped condition is true
    BrTrue(usize),
    /// Branch to the target if the popped condition is false
    BrFalse(usize),
    /// Unconditional branch
    Branch(usize),

    // Constants
    /// Push `true`
    LdTrue,
    /// Push `false`
    LdFalse,
    /// Push a u8
    LdU8(u8),
    /// Push a u16
    LdU16(u16),
    /// Push a u32
    LdU32(u32),
    /// Push a u64
    LdU64(u64),
    /// Push a u128
    LdU128(u128),
    /// Push a u256
    LdU256(BigUint),
    /// Push a BCS-encoded constant of the given type
    LdConst {
        /// Constant type
        ty: ValueType,
        /// BCS bytes
        data: Vec<u8>,
    },

    // Arithmetic
    /// Convert the top integer to the given width
    Cast(BitWidth),
    /// Checked addition
    Add,
    /// Checked subtraction
    Sub,
    /// Checked multiplication
    Mul,
    /// Checked remainder
    Mod,
    /// Checked division
    Div,
    /// Bitwise or
    BitOr,
    /// Bitwise and
    BitAnd,
    /// Bitwise xor
    Xor,
    /// Checked left shift (shift amount is a u8)
    Shl,
    /// Checked logical right shift (shift amount is a u8)
    Shr,

    // Logic and comparison
    /// Boolean or
    Or,
    /// Boolean and
    And,
    /// Boolean not
    Not,
    /// Structural equality
    Eq,
    /// Structural inequality
    Neq,
    /// Less than
    Lt,
    /// Greater than
    Gt,
    /// Less or equal
    Le,
    /// Greater or equal
    Ge,

    // Locals and references
    /// Push a copy of a local
    CopyLoc(usize),
    /// Push a local, leaving it invalid
    MoveLoc(usize),
    /// Pop into a local
    StLoc(usize),
    /// Replace a reference with the value it points to
    ReadRef,
    /// Pop a reference then a value and store the value through the reference
    WriteRef,
    /// Mutable to immutable reference (no effect)
    FreezeRef,
    /// Borrow a local
    BorrowLoc(usize),

    // Structs
    /// Pack fields into a struct value
    Pack(ValueType),
    /// Unpack a struct value into its fields
    Unpack(ValueType),
    /// Borrow field `field` of the struct behind the reference
    BorrowField {
        /// Struct type
        ty: ValueType,
        /// Field index
        field: usize,
    },

    // Vectors
    /// Pack `count` elements into a vector
    VecPack {
        /// Element type
        elem: ValueType,
        /// Element count
        count: u64,
    },
    /// Unpack a vector of exactly `count` elements
    VecUnpack {
        /// Expected length
        count: u64,
    },
    /// Length of the vector behind the reference
    VecLen,
    /// Borrow an element
    VecBorrow,
    /// Append an element
    VecPushBack,
    /// Remove and push the last element
    VecPopBack,
    /// Swap two elements
    VecSwap,

    // Enums
    /// Pack fields into an enum variant
    PackVariant {
        /// Enum type
        ty: ValueType,
        /// Variant index
        variant: usize,
    },
    /// Unpack an enum value that must hold `variant`
    UnpackVariant {
        /// Enum type
        ty: ValueType,
        /// Variant index
        variant: usize,
    },
    /// Borrow the fields of the enum behind the reference, which must hold `variant`
    UnpackVariantRef {
        /// Enum type
        ty: ValueType,
        /// Variant index
        variant: usize,
    },
    /// Jump to the target for the current variant of the enum behind the reference
    VariantSwitch(Vec<usize>),

    // Calls
    /// Call a function
    Call(FunctionId),
}

impl Bytecode {
    /// Offsets this instruction may jump to
    pub fn branch_targets(&self) -> Vec<usize> {
        match self {
            Bytecode::BrTrue(t) | Bytecode::BrFalse(t) | Bytecode::Branch(t) => vec![*t],
            Bytecode::VariantSwitch(targets) => targets.clone(),
            _ => vec![],
        }
    }

    /// True if no instruction of the same block follows this one
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Bytecode::BrTrue(_)
                | Bytecode::BrFalse(_)
                | Bytecode::Branch(_)
                | Bytecode::VariantSwitch(_)
                | Bytecode::Call(_)
                | Bytecode::Ret
                | Bytecode::Abort
        )
    }
}

/// Locals and instructions of a function with a body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    /// Types of the non-parameter locals
    pub locals: Vec<Type>,
    /// Instruction stream
    pub instructions: Vec<Bytecode>,
}

impl Code {
    /// Creates a code unit
    pub fn new(locals: Vec<Type>, instructions: Vec<Bytecode>) -> Self {
        Self {
            locals,
            instructions,
        }
    }

    /// Every offset some instruction branches to
    pub fn branch_targets(&self) -> BTreeSet<usize> {
        self.instructions
            .iter()
            .flat_map(|i| i.branch_targets())
            .collect()
    }

    /// Instructions of the basic block starting at `start`, paired with their offsets
    ///
    /// `targets` must be [`Code::branch_targets`]. Running off the end of the instruction
    /// stream is an error: well-formed code always ends a block with a transfer.
    pub fn block<'c>(
        &'c self,
        function: &FunctionId,
        start: usize,
        targets: &BTreeSet<usize>,
    ) -> Result<Vec<(usize, &'c Bytecode)>> {
        let mut out = Vec::new();
        let mut offset = start;
        loop {
            let inst = self
                .instructions
                .get(offset)
                .ok_or_else(|| Error::FellOffEnd {
                    function: function.to_string(),
                    start,
                    len: self.instructions.len(),
                })?;
            out.push((offset, inst));
            offset += 1;
            if inst.ends_block() || targets.contains(&offset) {
                return Ok(out);
            }
        }
    }
}

/// A resolved function instantiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Identity
    pub id: FunctionId,
    /// Parameter types
    pub params: Vec<Type>,
    /// Return types
    pub returns: Vec<Type>,
    /// Body, or `None` for native functions
    pub code: Option<Code>,
}

impl Function {
    /// Function with a body
    pub fn new(id: FunctionId, params: Vec<Type>, returns: Vec<Type>, code: Code) -> Self {
        Self {
            id,
            params,
            returns,
            code: Some(code),
        }
    }

    /// Native function (no body)
    pub fn native(id: FunctionId, params: Vec<Type>, returns: Vec<Type>) -> Self {
        Self {
            id,
            params,
            returns,
            code: None,
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// The resolved function table a compilation draws from
#[derive(Debug, Clone, Default)]
pub struct Scene {
    functions: BTreeMap<FunctionId, Function>,
}

impl Scene {
    /// Empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Scene holding `functions`
    pub fn from_functions(functions: impl IntoIterator<Item = Function>) -> Self {
        let mut scene = Self::new();
        for f in functions {
            scene.add(f);
        }
        scene
    }

    /// Adds (or replaces) a function
    pub fn add(&mut self, function: Function) {
        self.functions.insert(function.id.clone(), function);
    }

    /// Looks up a function
    pub fn function(&self, id: &FunctionId) -> Result<&Function> {
        self.functions
            .get(id)
            .ok_or_else(|| Error::UnknownFunction {
                name: id.to_string(),
            })
    }

    /// All functions
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }
}
