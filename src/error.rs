//! Error types for the movetac compiler

use thiserror::Error;

/// Compilation errors
///
/// Every variant is an internal-consistency failure: a violated invariant between the
/// bytecode, the compiler, the layout engine, or the alias analysis. Recoverable conditions
/// (native calls without a summary, recursion, shadowed types) never surface here; they are
/// compiled into havocs or traps instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Stack simulation errors
    /// Pop from an empty operand stack
    ///
    /// **Triggered by:** An instruction consuming more operands than the block has pushed
    /// **Example:** `Add` as the first instruction of a function
    #[error("Stack underflow in {function} at offset {offset}")]
    StackUnderflow {
        /// Function being compiled
        function: String,
        /// Instruction offset
        offset: usize,
    },

    /// Two predecessors reach the same block with different stack shapes
    #[error("Stack mismatch for block at offset {offset} in {function}: {expected} != {got}")]
    StackMismatch {
        /// Function being compiled
        function: String,
        /// Offset of the block whose entry shape conflicts
        offset: usize,
        /// Shape recorded first
        expected: String,
        /// Conflicting shape
        got: String,
    },

    /// Control reached the end of the instruction list without a terminator
    #[error("Reached end of instructions ({len}) while reading block at {start} in {function}")]
    FellOffEnd {
        /// Function being compiled
        function: String,
        /// Start offset of the block
        start: usize,
        /// Number of instructions in the function
        len: usize,
    },

    // Type errors
    /// Operand type does not match what the instruction requires
    ///
    /// **Triggered by:** Malformed bytecode, or a layout/type disagreement during lowering
    /// **Example:** `VecLen` applied to a `&u64`
    #[error("Type mismatch in {context}: expected {expected}, got {got}")]
    TypeMismatch {
        /// What was being compiled or lowered
        context: String,
        /// Expected type description
        expected: String,
        /// Actual type
        got: String,
    },

    /// Field-level access to a struct or enum whose fields are unknown
    #[error("Cannot {operation} native type {ty}")]
    NativeType {
        /// Operation that needed the fields
        operation: String,
        /// Display name of the type
        ty: String,
    },

    /// Field or variant index outside the declared range
    #[error("Index {index} out of bounds for {ty} ({len} entries)")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of fields or variants
        len: usize,
        /// Display name of the type
        ty: String,
    },

    // Memory model errors
    /// Copy or select between layouts of different shape
    #[error("Cannot combine layouts of different kinds: {dst} and {src}")]
    LayoutMismatch {
        /// Destination layout kind
        dst: String,
        /// Source layout kind
        src: String,
    },

    /// A memory operation was applied to a layout that cannot support it
    #[error("Cannot {operation} on {layout} layout")]
    InvalidLayoutAccess {
        /// Attempted operation
        operation: String,
        /// Layout kind
        layout: String,
    },

    /// Dereference of a reference the alias analysis knows nothing about
    #[error("No alias targets for {reference} at {point}")]
    NoAliasTargets {
        /// Reference variable
        reference: String,
        /// Program point
        point: String,
    },

    /// A borrow must produce exactly one target
    #[error("Expected a single target for {reference} at {point}, got {count}")]
    AmbiguousBorrow {
        /// Reference variable
        reference: String,
        /// Program point
        point: String,
        /// Number of targets found
        count: usize,
    },

    // Program structure errors
    /// Call to a function missing from the scene
    #[error("Unknown function: {name}")]
    UnknownFunction {
        /// Function identity
        name: String,
    },

    /// Arity disagreement between a call site and its callee
    #[error("Arity mismatch calling {function}: expected {expected} {what}, got {got}")]
    ArityMismatch {
        /// Callee
        function: String,
        /// "arguments" or "results"
        what: &'static str,
        /// Declared count
        expected: usize,
        /// Supplied count
        got: usize,
    },

    /// BCS constant data could not be decoded
    #[error("Constant decode error for {ty}: {message}")]
    ConstantDecode {
        /// Declared constant type
        ty: String,
        /// Decoder failure
        message: String,
    },

    /// An instruction is not valid in its position
    #[error("Invalid instruction at offset {offset}: {message}")]
    InvalidInstruction {
        /// Instruction offset
        offset: usize,
        /// Description
        message: String,
    },

    /// Compilation produced more blocks than allowed
    #[error("Block limit exceeded: {limit}")]
    BlockLimitExceeded {
        /// Configured limit
        limit: usize,
    },

    /// Structural problem in an IR program
    #[error("Malformed program: {0}")]
    MalformedProgram(String),

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a type mismatch
    pub fn type_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        got: impl ToString,
    ) -> Self {
        Error::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            got: got.to_string(),
        }
    }

    /// Shorthand for an invalid layout access
    pub fn layout_access(operation: impl Into<String>, layout: impl Into<String>) -> Self {
        Error::InvalidLayoutAccess {
            operation: operation.into(),
            layout: layout.into(),
        }
    }
}

/// Result type for movetac operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::StackUnderflow {
            function: "0x1::m::f".to_string(),
            offset: 3,
        };
        assert_eq!(err.to_string(), "Stack underflow in 0x1::m::f at offset 3");

        let err = Error::type_mismatch("VecLen", "vector reference", "&u64");
        assert_eq!(
            err.to_string(),
            "Type mismatch in VecLen: expected vector reference, got &u64"
        );
    }
}
