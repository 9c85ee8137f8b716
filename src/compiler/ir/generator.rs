//! IR Generator - compiles resolved bytecode into a memory-level IR program
//!
//! The generator simulates the operand stack of each function, splits its instruction stream
//! into basic blocks, and inlines every call. Structured values stay abstract here: packs,
//! borrows, reads and writes become [`MemoryOp`]s that the memory lowering pass expands later.
//!
//! ## Module Organization
//!
//! | Section | Search Term |
//! |---------|-------------|
//! | Entry program | `ENTRY PROGRAM` |
//! | Calls and inlining | `CALLS` |
//! | Function bodies | `FUNCTION BODIES` |
//! | Instruction lowering | `INSTRUCTIONS` |
//! | Constants | `CONSTANTS` |
//!
//! ## Naming
//!
//! ```text
//! {fn}!local!{i}              locals, parameters first
//! {fn}!ret!{i}                results of a body
//! {fn}!stack!{depth}!{type}   operand stack slots
//! {fn}_arg_{i}                arguments of the entry function
//! ```
//!
//! ## Inlining
//!
//! A body is compiled once per function and instantiated at each call site with fresh block
//! ids, its [`BlockId::EXIT`] placeholder mapped to a per-call epilog:
//!
//! ```text
//! caller ──▶ prolog (FuncStart, args → locals) ──▶ body ... ──▶ epilog (results → returns,
//!                                                                FuncEnd) ──▶ return block
//! ```

use super::instruction::{IrInstruction, MemoryOp};
use super::program::{BasicBlock, BlockId, IrProgram};
use super::{BinOp, Expr, Tag, Var};
use crate::compiler::bytecode::{Bytecode, Code, Function, FunctionId, Scene};
use crate::compiler::calltrace;
use crate::compiler::context::CompileContext;
use crate::compiler::CompileOptions;
use crate::types::{BitWidth, Composite, Type, ValueType};
use crate::{Error, Result};
use num_bigint::BigUint;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Functions whose treatment a compiled body depends on
///
/// A body compiled under one call stack may be reused under another only if every callee it
/// trapped as recursive is still on the stack and every callee it expanded is still off it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CallDeps {
    expanded: BTreeSet<FunctionId>,
    trapped: BTreeSet<FunctionId>,
}

impl CallDeps {
    fn merge(&mut self, other: &CallDeps) {
        self.expanded.extend(other.expanded.iter().cloned());
        self.trapped.extend(other.trapped.iter().cloned());
    }

    fn holds_under(&self, stack: &[FunctionId]) -> bool {
        self.trapped.iter().all(|f| stack.contains(f))
            && self.expanded.iter().all(|f| !stack.contains(f))
    }
}

/// A function body compiled once and instantiated per call
#[derive(Debug, Clone)]
struct CompiledBody {
    entry: BlockId,
    locals: Vec<Var>,
    results: Vec<Var>,
    blocks: Vec<BasicBlock>,
    deps: CallDeps,
}

/// One call site to compile
#[derive(Debug, Clone)]
struct Call {
    callee: FunctionId,
    args: Vec<Var>,
    returns: Vec<Var>,
    entry: BlockId,
    return_block: BlockId,
    /// Active callers, outermost first
    stack: Vec<FunctionId>,
}

/// Blocks implementing one call
struct CompiledCall {
    blocks: Vec<BasicBlock>,
    deps: CallDeps,
}

/// Bytecode to memory-level IR compiler for one entry function
pub struct IrGenerator<'s> {
    scene: &'s Scene,
    options: &'s CompileOptions,
    ctx: CompileContext,
    bodies: HashMap<FunctionId, CompiledBody>,
}

impl<'s> IrGenerator<'s> {
    /// Creates a generator drawing functions from `scene`
    pub fn new(scene: &'s Scene, options: &'s CompileOptions) -> Self {
        Self {
            scene,
            options,
            ctx: CompileContext::new(),
            bodies: HashMap::new(),
        }
    }

    /// The compilation context, for lowering the generated program
    pub fn into_context(self) -> CompileContext {
        self.ctx
    }

    // =========================================================================
    // ENTRY PROGRAM
    // =========================================================================

    /// Compiles `entry` with unconstrained arguments into a memory-level program
    pub fn generate(&mut self, entry: &FunctionId) -> Result<IrProgram> {
        let scene = self.scene;
        let function = scene.function(entry)?;
        let base = function.id.to_var_name();
        tracing::debug!("compiling entry {}", function.id);

        let args: Vec<Var> = function
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| Var::new(format!("{}_arg_{}", base, i), ty.tag()))
            .collect();
        let returns: Vec<Var> = function
            .returns
            .iter()
            .enumerate()
            .map(|(i, ty)| Var::new(format!("{}_ret_{}", base, i), ty.tag()))
            .collect();

        let start = self.ctx.new_block();
        let callee_entry = self.ctx.new_block();
        let exit = self.ctx.new_block();

        let call = self.compile_call(Call {
            callee: function.id.clone(),
            args: args.clone(),
            returns,
            entry: callee_entry,
            return_block: exit,
            stack: vec![],
        })?;

        let mut prelude = self.ctx.take_initialization();
        for (ty, arg) in function.params.iter().zip(&args) {
            prelude.extend(self.havoc_typed(ty, arg));
        }
        prelude.push(IrInstruction::Jump(callee_entry));

        let mut program = IrProgram::new(function.id.to_string(), start);
        program.add_block(BasicBlock::new(start, prelude));
        for block in call.blocks {
            program.add_block(block);
        }
        program.add_block(BasicBlock::new(
            exit,
            vec![IrInstruction::Label(format!("Exit from {}", function.id))],
        ));

        program.prune_unreachable();
        if program.blocks.len() > self.options.max_blocks {
            return Err(Error::BlockLimitExceeded {
                limit: self.options.max_blocks,
            });
        }
        program.collect_decls()?;
        program.validate()?;
        Ok(program)
    }

    /// Havoc of a variable of type `ty`, keeping integers within their width
    ///
    /// A reference is pointed at a fresh, havoced value.
    fn havoc_typed(&mut self, ty: &Type, var: &Var) -> Vec<IrInstruction> {
        match ty {
            Type::Reference(inner) => {
                let loc = self.ctx.tmp("havocLoc", inner.tag());
                let mut out = self.havoc_typed(&Type::Value(inner.clone()), &loc);
                out.push(IrInstruction::Memory(MemoryOp::BorrowLoc {
                    reference: var.clone(),
                    loc,
                }));
                out
            }
            Type::Value(value) => match value.bit_width() {
                Some(w) if w != BitWidth::W256 => vec![
                    IrInstruction::Havoc(var.clone()),
                    IrInstruction::Assume(Expr::le(Expr::var(var), Expr::Num(w.mask()))),
                ],
                _ => vec![IrInstruction::Havoc(var.clone())],
            },
        }
    }

    // =========================================================================
    // CALLS
    // =========================================================================

    fn compile_call(&mut self, call: Call) -> Result<CompiledCall> {
        let scene = self.scene;
        let function = scene.function(&call.callee)?;
        check_arity(function, "arguments", function.params.len(), call.args.len())?;
        check_arity(function, "results", function.returns.len(), call.returns.len())?;

        if self.ctx.block_count() > self.options.max_blocks {
            return Err(Error::BlockLimitExceeded {
                limit: self.options.max_blocks,
            });
        }

        if let Some(summary) = self.options.summaries.get(&function.id.name.to_string()) {
            tracing::debug!("summarizing {} as {:?}", function.id, summary);
            let mut code = summary.expand(&mut self.ctx, function, &call.args, &call.returns)?;
            code.push(IrInstruction::Jump(call.return_block));
            return Ok(CompiledCall {
                blocks: vec![BasicBlock::new(call.entry, code)],
                deps: CallDeps::default(),
            });
        }

        match &function.code {
            Some(code) => self.compile_code_call(call, function, code),
            None => Ok(self.havoc_call(&call, function, "Unrecognized native function")),
        }
    }

    fn havoc_call(&mut self, call: &Call, function: &Function, reason: &str) -> CompiledCall {
        let from = format_stack(&call.stack);
        self.ctx.warn(format!(
            "Havocing call to {} from {}: {}",
            function.id, from, reason
        ));
        let mut code = vec![IrInstruction::Label(format!(
            "Havoc'd call to {} from {}: {}",
            function.id, from, reason
        ))];
        for (ty, ret) in function.returns.iter().zip(&call.returns) {
            code.extend(self.havoc_typed(ty, ret));
        }
        code.push(IrInstruction::Jump(call.return_block));
        CompiledCall {
            blocks: vec![BasicBlock::new(call.entry, code)],
            deps: CallDeps::default(),
        }
    }

    fn compile_code_call(
        &mut self,
        call: Call,
        function: &Function,
        code: &Code,
    ) -> Result<CompiledCall> {
        if call.stack.contains(&function.id) {
            self.ctx.warn(format!(
                "Recursive function call to {} from {}",
                function.id,
                format_stack(&call.stack)
            ));
            let mut deps = CallDeps::default();
            deps.trapped.insert(function.id.clone());
            return Ok(CompiledCall {
                blocks: vec![BasicBlock::new(
                    call.entry,
                    vec![IrInstruction::trap(format!(
                        "Recursive function call to {}",
                        function.id
                    ))],
                )],
                deps,
            });
        }

        let mut body_stack = call.stack.clone();
        body_stack.push(function.id.clone());
        let body = match self.bodies.get(&function.id) {
            Some(body) if body.deps.holds_under(&body_stack) => {
                tracing::debug!("reusing body of {}", function.id);
                body.clone()
            }
            _ => {
                tracing::debug!("compiling body of {}", function.id);
                let body = self.compile_body(function, code, &body_stack)?;
                self.bodies.insert(function.id.clone(), body.clone());
                body
            }
        };

        // Fresh block ids for this instance
        let epilog = self.ctx.new_block();
        let mut ids = BTreeMap::new();
        ids.insert(BlockId::EXIT, epilog);
        for block in &body.blocks {
            let fresh = self.ctx.new_block();
            ids.insert(block.id, fresh);
        }
        let mut remap = |b: BlockId| ids.get(&b).copied().unwrap_or(b);
        let body_entry = remap(body.entry);

        // nested calls get fresh trace ids in every instance of the body
        let mut call_ids = BTreeMap::new();
        let mut blocks = Vec::with_capacity(body.blocks.len() + 2);
        for block in &body.blocks {
            let mut instructions = block.instructions.clone();
            for inst in &mut instructions {
                inst.remap_targets(&mut remap);
                inst.remap_call_ids(&mut |old| {
                    *call_ids.entry(old).or_insert_with(|| self.ctx.new_call_id())
                });
            }
            blocks.push(BasicBlock::new(remap(block.id), instructions));
        }

        let call_id = self.ctx.new_call_id();
        let elem_count = self.options.call_trace_vec_elem_count;

        let mut prolog = Vec::new();
        if self.options.call_trace {
            prolog.extend(calltrace::annotate_func_start(
                &mut self.ctx,
                call_id,
                function,
                &call.args,
                elem_count,
            ));
        }
        for (local, arg) in body.locals.iter().zip(&call.args) {
            prolog.push(IrInstruction::assign(local, Expr::var(arg)));
        }
        prolog.push(IrInstruction::Jump(body_entry));
        blocks.push(BasicBlock::new(call.entry, prolog));

        let mut epilog_code: Vec<IrInstruction> = call
            .returns
            .iter()
            .zip(&body.results)
            .map(|(ret, res)| IrInstruction::assign(ret, Expr::var(res)))
            .collect();
        if self.options.call_trace {
            epilog_code.extend(calltrace::annotate_func_end(
                &mut self.ctx,
                call_id,
                function,
                &call.returns,
                elem_count,
            ));
        }
        epilog_code.push(IrInstruction::Jump(call.return_block));
        blocks.push(BasicBlock::new(epilog, epilog_code));

        let mut deps = body.deps.clone();
        deps.expanded.insert(function.id.clone());
        Ok(CompiledCall { blocks, deps })
    }

    // =========================================================================
    // FUNCTION BODIES
    // =========================================================================

    fn compile_body(
        &mut self,
        function: &Function,
        code: &Code,
        stack: &[FunctionId],
    ) -> Result<CompiledBody> {
        let base = function.id.to_var_name();
        let locals: Vec<(Type, Var)> = function
            .params
            .iter()
            .chain(&code.locals)
            .enumerate()
            .map(|(i, ty)| (ty.clone(), Var::new(format!("{}!local!{}", base, i), ty.tag())))
            .collect();
        let results: Vec<(Type, Var)> = function
            .returns
            .iter()
            .enumerate()
            .map(|(i, ty)| (ty.clone(), Var::new(format!("{}!ret!{}", base, i), ty.tag())))
            .collect();

        let entry = self.ctx.new_block();
        let mut body = BodyCompiler {
            gen: self,
            function,
            code,
            call_stack: stack,
            base,
            locals,
            results,
            targets: code.branch_targets(),
            block_ids: BTreeMap::from([(0, entry)]),
            stacks_in: BTreeMap::from([(0, Vec::new())]),
            worklist: VecDeque::from([0]),
            blocks: Vec::new(),
            deps: CallDeps::default(),
        };
        body.run()?;

        Ok(CompiledBody {
            entry,
            locals: body.locals.into_iter().map(|(_, v)| v).collect(),
            results: body.results.into_iter().map(|(_, v)| v).collect(),
            blocks: body.blocks,
            deps: body.deps,
        })
    }
}

fn check_arity(function: &Function, what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::ArityMismatch {
            function: function.id.to_string(),
            what,
            expected,
            got,
        });
    }
    Ok(())
}

fn format_stack(stack: &[FunctionId]) -> String {
    if stack.is_empty() {
        return "<entry>".to_string();
    }
    stack
        .iter()
        .rev()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(" <- ")
}

fn format_types(types: &[Type]) -> String {
    let parts: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Whether compilation of the current block continues after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    End,
}

/// Stack simulation state for one function body
struct BodyCompiler<'g, 's, 'f> {
    gen: &'g mut IrGenerator<'s>,
    function: &'f Function,
    code: &'f Code,
    call_stack: &'f [FunctionId],
    base: String,
    locals: Vec<(Type, Var)>,
    results: Vec<(Type, Var)>,
    targets: BTreeSet<usize>,
    block_ids: BTreeMap<usize, BlockId>,
    stacks_in: BTreeMap<usize, Vec<Type>>,
    worklist: VecDeque<usize>,
    blocks: Vec<BasicBlock>,
    deps: CallDeps,
}

/// Per-block state
struct BlockState {
    offset: usize,
    stack: Vec<Type>,
    out: Vec<IrInstruction>,
}

impl<'g, 's, 'f> BodyCompiler<'g, 's, 'f> {
    fn run(&mut self) -> Result<()> {
        let mut done = BTreeSet::new();
        while let Some(start) = self.worklist.pop_front() {
            if !done.insert(start) {
                continue;
            }
            let id = self.block_id(start);
            let stack = self.stacks_in.get(&start).cloned().unwrap_or_default();
            let mut state = BlockState {
                offset: start,
                stack,
                out: Vec::new(),
            };

            let code = self.code;
            let function = self.function;
            let mut flow = Flow::Next;
            let mut next = start;
            for (offset, inst) in code.block(&function.id, start, &self.targets)? {
                state.offset = offset;
                tracing::trace!("{}/{}: {:?}", offset, state.stack.len(), inst);
                flow = self.instruction(&mut state, inst)?;
                next = offset + 1;
                if flow == Flow::End {
                    break;
                }
            }
            if flow == Flow::Next {
                let target = self.successor(next, &state.stack)?;
                state.out.push(IrInstruction::Jump(target));
            }
            self.blocks.push(BasicBlock::new(id, state.out));
        }
        Ok(())
    }

    fn block_id(&mut self, offset: usize) -> BlockId {
        if let Some(id) = self.block_ids.get(&offset) {
            return *id;
        }
        let id = self.gen.ctx.new_block();
        self.block_ids.insert(offset, id);
        id
    }

    /// Records the entry stack of the block at `offset` and schedules it
    fn successor(&mut self, offset: usize, stack: &[Type]) -> Result<BlockId> {
        match self.stacks_in.get(&offset) {
            Some(existing) if existing.as_slice() != stack => {
                return Err(Error::StackMismatch {
                    function: self.function.id.to_string(),
                    offset,
                    expected: format_types(existing),
                    got: format_types(stack),
                })
            }
            Some(_) => {}
            None => {
                self.stacks_in.insert(offset, stack.to_vec());
                self.worklist.push_back(offset);
            }
        }
        Ok(self.block_id(offset))
    }

    fn stack_var(&self, depth: usize, ty: &Type) -> Var {
        Var::new(
            format!("{}!stack!{}!{}", self.base, depth, ty.sym_name_ext()),
            ty.tag(),
        )
    }

    fn push(&self, state: &mut BlockState, ty: Type) -> Var {
        state.stack.push(ty);
        let depth = state.stack.len() - 1;
        self.stack_var(depth, &state.stack[depth])
    }

    fn push_value(&self, state: &mut BlockState, ty: impl Into<Type>, value: Expr) {
        let dst = self.push(state, ty.into());
        state.out.push(IrInstruction::assign(&dst, value));
    }

    fn top(&self, state: &BlockState) -> Result<Type> {
        state.stack.last().cloned().ok_or_else(|| Error::StackUnderflow {
            function: self.function.id.to_string(),
            offset: state.offset,
        })
    }

    fn pop(&self, state: &mut BlockState) -> Result<(Type, Var)> {
        let ty = self.top(state)?;
        let var = self.stack_var(state.stack.len() - 1, &ty);
        state.stack.pop();
        Ok((ty, var))
    }

    fn pop_expect(&self, state: &mut BlockState, expected: &Type) -> Result<Var> {
        let (ty, var) = self.pop(state)?;
        if &ty != expected {
            return Err(self.mismatch(state, expected.to_string(), &ty));
        }
        Ok(var)
    }

    fn pop_bits(&self, state: &mut BlockState) -> Result<(BitWidth, Var)> {
        match self.pop(state)? {
            (Type::Value(ValueType::Bits(w)), var) => Ok((w, var)),
            (ty, _) => Err(self.mismatch(state, "integer", &ty)),
        }
    }

    fn pop_ref(&self, state: &mut BlockState) -> Result<(ValueType, Var)> {
        match self.pop(state)? {
            (Type::Reference(ty), var) => Ok((ty, var)),
            (ty, _) => Err(self.mismatch(state, "reference", &ty)),
        }
    }

    fn pop_vec_ref(&self, state: &mut BlockState) -> Result<(ValueType, Var)> {
        match self.pop_ref(state)? {
            (ValueType::Vector(elem), var) => Ok((*elem, var)),
            (ty, _) => Err(self.mismatch(state, "vector reference", &ty)),
        }
    }

    fn mismatch(&self, state: &BlockState, expected: impl Into<String>, got: impl ToString) -> Error {
        Error::type_mismatch(
            format!("{} at offset {}", self.function.id, state.offset),
            expected,
            got,
        )
    }

    fn local(&self, state: &BlockState, index: usize) -> Result<(Type, Var)> {
        self.locals
            .get(index)
            .cloned()
            .ok_or_else(|| Error::InvalidInstruction {
                offset: state.offset,
                message: format!(
                    "local {} out of range ({} locals) in {}",
                    index,
                    self.locals.len(),
                    self.function.id
                ),
            })
    }

    /// Traps if `ty` is a datatype whose internals must not be accessed
    fn shadowed(&mut self, state: &mut BlockState, ty: &ValueType) -> Option<Flow> {
        let name = ty.datatype_name()?.to_string();
        if !self.gen.options.shadowed_types.contains(&name) {
            return None;
        }
        let message = format!("Illegal access to shadowed type {}", name);
        self.gen.ctx.warn(format!("{} in {}", message, self.function.id));
        state.out.push(IrInstruction::trap(message));
        Some(Flow::End)
    }

    // =========================================================================
    // INSTRUCTIONS
    // =========================================================================

    fn instruction(&mut self, state: &mut BlockState, inst: &Bytecode) -> Result<Flow> {
        let next = state.offset + 1;
        match inst {
            // Control flow
            Bytecode::BrTrue(target) => {
                let (_, cond) = self.pop(state)?;
                self.conditional_jump(state, cond, *target, next)
            }
            Bytecode::BrFalse(target) => {
                let (_, cond) = self.pop(state)?;
                self.conditional_jump(state, cond, next, *target)
            }
            Bytecode::Branch(target) => {
                let id = self.successor(*target, &state.stack)?;
                state.out.push(IrInstruction::Jump(id));
                Ok(Flow::End)
            }
            Bytecode::Call(callee) => self.call(state, callee),
            Bytecode::Ret => {
                for (ty, result) in self.results.clone().iter().rev() {
                    let value = self.pop_expect(state, ty)?;
                    state.out.push(IrInstruction::assign(result, Expr::var(&value)));
                }
                state.out.push(IrInstruction::Jump(BlockId::EXIT));
                Ok(Flow::End)
            }
            Bytecode::Abort => {
                self.pop(state)?;
                state.out.push(IrInstruction::trap("Abort"));
                Ok(Flow::End)
            }
            Bytecode::Nop | Bytecode::FreezeRef => Ok(Flow::Next),
            Bytecode::Pop => {
                self.pop(state)?;
                Ok(Flow::Next)
            }

            // Constants
            Bytecode::LdTrue => self.load(state, ValueType::Bool, Expr::Bool(true)),
            Bytecode::LdFalse => self.load(state, ValueType::Bool, Expr::Bool(false)),
            Bytecode::LdU8(v) => self.load(state, ValueType::U8, Expr::num(*v)),
            Bytecode::LdU16(v) => self.load(state, ValueType::U16, Expr::num(*v)),
            Bytecode::LdU32(v) => self.load(state, ValueType::U32, Expr::num(*v)),
            Bytecode::LdU64(v) => self.load(state, ValueType::U64, Expr::num(*v)),
            Bytecode::LdU128(v) => self.load(state, ValueType::U128, Expr::num(*v)),
            Bytecode::LdU256(v) => self.load(state, ValueType::U256, Expr::Num(v.clone())),
            Bytecode::LdConst { ty, data } => {
                let mut decoder = ConstDecoder { ty, data, pos: 0 };
                self.decode_const(state, &mut decoder, ty)?;
                if decoder.pos != data.len() {
                    return Err(decoder.error(format!(
                        "{} trailing bytes",
                        data.len() - decoder.pos
                    )));
                }
                Ok(Flow::Next)
            }

            // Arithmetic
            Bytecode::Cast(to) => {
                let (from, value) = self.pop_bits(state)?;
                if to.bits() < from.bits() {
                    state.out.push(IrInstruction::assert(
                        Expr::le(Expr::var(&value), Expr::Num(to.mask())),
                        format!("u{} overflow", to.bits()),
                    ));
                }
                self.load(state, ValueType::Bits(*to), Expr::var(&value))
            }
            Bytecode::Add
            | Bytecode::Sub
            | Bytecode::Mul
            | Bytecode::Div
            | Bytecode::Mod
            | Bytecode::BitOr
            | Bytecode::BitAnd
            | Bytecode::Xor
            | Bytecode::Lt
            | Bytecode::Gt
            | Bytecode::Le
            | Bytecode::Ge => self.math_op(state, inst),
            Bytecode::Shl | Bytecode::Shr => {
                let (_, shift) = self.pop_bits(state)?;
                let (width, value) = self.pop_bits(state)?;
                let bits = width.bits();
                if width != BitWidth::W256 {
                    state.out.push(IrInstruction::assert(
                        Expr::lt(Expr::var(&shift), Expr::num(bits)),
                        format!("u{} shift overflow", bits),
                    ));
                }
                let (value, shift) = (Expr::var(&value), Expr::var(&shift));
                let result = match inst {
                    Bytecode::Shl if width != BitWidth::W256 => Expr::binary(
                        BinOp::BitAnd,
                        Expr::binary(BinOp::Shl, value, shift),
                        Expr::Num(width.mask()),
                    ),
                    Bytecode::Shl => Expr::binary(BinOp::Shl, value, shift),
                    _ => Expr::binary(BinOp::Shr, value, shift),
                };
                self.load(state, ValueType::Bits(width), result)
            }

            // Logic and comparison
            Bytecode::Not => {
                let (_, v) = self.pop(state)?;
                self.load(state, ValueType::Bool, Expr::not(Expr::var(&v)))
            }
            Bytecode::Or | Bytecode::And => {
                let (_, b) = self.pop(state)?;
                let (_, a) = self.pop(state)?;
                let operands = vec![Expr::var(&a), Expr::var(&b)];
                let result = if matches!(inst, Bytecode::Or) {
                    Expr::or(operands)
                } else {
                    Expr::and(operands)
                };
                self.load(state, ValueType::Bool, result)
            }
            Bytecode::Eq | Bytecode::Neq => self.equality(state, matches!(inst, Bytecode::Neq)),

            // Locals and references
            Bytecode::CopyLoc(i) | Bytecode::MoveLoc(i) => {
                let (ty, local) = self.local(state, *i)?;
                let dst = self.push(state, ty);
                state.out.push(IrInstruction::assign(&dst, Expr::var(&local)));
                Ok(Flow::Next)
            }
            Bytecode::StLoc(i) => {
                let (ty, local) = self.local(state, *i)?;
                let value = self.pop_expect(state, &ty)?;
                state.out.push(IrInstruction::assign(&local, Expr::var(&value)));
                Ok(Flow::Next)
            }
            Bytecode::BorrowLoc(i) => {
                let (ty, local) = self.local(state, *i)?;
                let ty = match ty {
                    Type::Value(ty) => ty,
                    other => return Err(self.mismatch(state, "value local", other)),
                };
                if let Some(flow) = self.shadowed(state, &ty) {
                    return Ok(flow);
                }
                let reference = self.push(state, Type::Reference(ty));
                state.out.push(IrInstruction::Memory(MemoryOp::BorrowLoc {
                    reference,
                    loc: local,
                }));
                Ok(Flow::Next)
            }
            Bytecode::ReadRef => {
                let (ty, reference) = self.pop_ref(state)?;
                let dst = self.push(state, Type::Value(ty));
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::ReadRef { dst, reference }));
                Ok(Flow::Next)
            }
            Bytecode::WriteRef => {
                let (ty, reference) = self.pop_ref(state)?;
                let src = self.pop_expect(state, &Type::Value(ty))?;
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::WriteRef { reference, src }));
                Ok(Flow::Next)
            }

            // Structs
            Bytecode::Pack(ty) => {
                if let Some(flow) = self.shadowed(state, ty) {
                    return Ok(flow);
                }
                let st = ty
                    .as_struct()
                    .ok_or_else(|| self.mismatch(state, "struct", ty))?;
                let fields = st.fields("pack")?;
                let srcs = self.pop_fields(state, fields.iter().map(|f| &f.ty))?;
                let dst = self.push(state, Type::Value(ty.clone()));
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::PackStruct { dst, srcs }));
                Ok(Flow::Next)
            }
            Bytecode::Unpack(ty) => {
                if let Some(flow) = self.shadowed(state, ty) {
                    return Ok(flow);
                }
                let src = self.pop_expect(state, &Type::Value(ty.clone()))?;
                let st = ty
                    .as_struct()
                    .ok_or_else(|| self.mismatch(state, "struct", ty))?;
                let dsts = st
                    .fields("unpack")?
                    .iter()
                    .map(|f| self.push(state, Type::Value(f.ty.clone())))
                    .collect();
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::UnpackStruct { dsts, src }));
                Ok(Flow::Next)
            }
            Bytecode::BorrowField { ty, field } => {
                if let Some(flow) = self.shadowed(state, ty) {
                    return Ok(flow);
                }
                let (referent, src_ref) = self.pop_ref(state)?;
                let st = referent
                    .as_struct()
                    .ok_or_else(|| self.mismatch(state, "struct reference", &referent))?;
                let field_ty = st.field(*field, "borrow a field of")?.ty.clone();
                let dst_ref = self.push(state, Type::Reference(field_ty));
                state.out.push(IrInstruction::Memory(MemoryOp::BorrowField {
                    dst_ref,
                    src_ref,
                    field: *field,
                }));
                Ok(Flow::Next)
            }

            // Vectors
            Bytecode::VecPack { elem, count } => {
                let srcs = self.pop_fields(state, (0..*count).map(|_| elem))?;
                let dst = self.push(state, Type::Value(ValueType::vector(elem.clone())));
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::VecPack { dst, srcs }));
                Ok(Flow::Next)
            }
            Bytecode::VecUnpack { count } => {
                let (ty, src) = self.pop(state)?;
                let elem = match &ty {
                    Type::Value(ValueType::Vector(elem)) => (**elem).clone(),
                    other => return Err(self.mismatch(state, "vector", other)),
                };
                let dsts = (0..*count)
                    .map(|_| self.push(state, Type::Value(elem.clone())))
                    .collect();
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::VecUnpack { dsts, src }));
                Ok(Flow::Next)
            }
            Bytecode::VecLen => {
                let (_, reference) = self.pop_vec_ref(state)?;
                let dst = self.push(state, Type::Value(ValueType::U64));
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::VecLen { dst, reference }));
                Ok(Flow::Next)
            }
            Bytecode::VecBorrow => {
                let index = self.pop_expect(state, &Type::Value(ValueType::U64))?;
                let (elem, src_ref) = self.pop_vec_ref(state)?;
                let dst_ref = self.push(state, Type::Reference(elem));
                state.out.push(IrInstruction::Memory(MemoryOp::VecBorrow {
                    dst_ref,
                    src_ref,
                    index,
                    bounds_check: self.gen.options.check_vector_bounds,
                }));
                Ok(Flow::Next)
            }
            Bytecode::VecPushBack => {
                let (_, src) = self.pop(state)?;
                let (_, reference) = self.pop_vec_ref(state)?;
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::VecPushBack { reference, src }));
                Ok(Flow::Next)
            }
            Bytecode::VecPopBack => {
                let (elem, reference) = self.pop_vec_ref(state)?;
                let dst = self.push(state, Type::Value(elem));
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::VecPopBack { dst, reference }));
                Ok(Flow::Next)
            }
            Bytecode::VecSwap => self.vec_swap(state),

            // Enums
            Bytecode::PackVariant { ty, variant } => {
                if let Some(flow) = self.shadowed(state, ty) {
                    return Ok(flow);
                }
                let e = ty
                    .as_enum()
                    .ok_or_else(|| self.mismatch(state, "enum", ty))?;
                let fields = e.variant(*variant)?.fields("pack")?;
                let srcs = self.pop_fields(state, fields.iter().map(|f| &f.ty))?;
                let dst = self.push(state, Type::Value(ty.clone()));
                state.out.push(IrInstruction::Memory(MemoryOp::PackVariant {
                    dst,
                    srcs,
                    variant: *variant,
                }));
                Ok(Flow::Next)
            }
            Bytecode::UnpackVariant { ty, variant } => {
                if let Some(flow) = self.shadowed(state, ty) {
                    return Ok(flow);
                }
                let src = self.pop_expect(state, &Type::Value(ty.clone()))?;
                let e = ty
                    .as_enum()
                    .ok_or_else(|| self.mismatch(state, "enum", ty))?;
                let dsts = e
                    .variant(*variant)?
                    .fields("unpack")?
                    .iter()
                    .map(|f| self.push(state, Type::Value(f.ty.clone())))
                    .collect();
                state.out.push(IrInstruction::Memory(MemoryOp::UnpackVariant {
                    dsts,
                    src,
                    variant: *variant,
                    check: true,
                }));
                Ok(Flow::Next)
            }
            Bytecode::UnpackVariantRef { ty, variant } => {
                if let Some(flow) = self.shadowed(state, ty) {
                    return Ok(flow);
                }
                let src_ref = self.pop_expect(state, &Type::Reference(ty.clone()))?;
                let e = ty
                    .as_enum()
                    .ok_or_else(|| self.mismatch(state, "enum", ty))?;
                let dsts = e
                    .variant(*variant)?
                    .fields("unpack")?
                    .iter()
                    .map(|f| self.push(state, Type::Reference(f.ty.clone())))
                    .collect();
                state.out.push(IrInstruction::Memory(MemoryOp::UnpackVariantRef {
                    dsts,
                    src_ref,
                    variant: *variant,
                    check: true,
                }));
                Ok(Flow::Next)
            }
            Bytecode::VariantSwitch(targets) => self.variant_switch(state, targets),
        }
    }

    fn load(&self, state: &mut BlockState, ty: ValueType, value: Expr) -> Result<Flow> {
        self.push_value(state, ty, value);
        Ok(Flow::Next)
    }

    /// Pops one value per expected type (last on top), returning them in declaration order
    fn pop_fields<'t>(
        &self,
        state: &mut BlockState,
        types: impl DoubleEndedIterator<Item = &'t ValueType>,
    ) -> Result<Vec<Var>> {
        let mut vars = Vec::new();
        for ty in types.rev() {
            vars.push(self.pop_expect(state, &Type::Value(ty.clone()))?);
        }
        vars.reverse();
        Ok(vars)
    }

    fn conditional_jump(
        &mut self,
        state: &mut BlockState,
        cond: Var,
        if_true: usize,
        if_false: usize,
    ) -> Result<Flow> {
        let then_block = self.successor(if_true, &state.stack)?;
        let else_block = self.successor(if_false, &state.stack)?;
        state.out.push(if then_block == else_block {
            IrInstruction::Jump(then_block)
        } else {
            IrInstruction::JumpIf {
                cond,
                then_block,
                else_block,
            }
        });
        Ok(Flow::End)
    }

    fn math_op(&self, state: &mut BlockState, inst: &Bytecode) -> Result<Flow> {
        let (width, b) = self.pop_bits(state)?;
        let (a_width, a) = self.pop_bits(state)?;
        if a_width != width {
            return Err(self.mismatch(state, format!("u{}", width.bits()), format!("u{}", a_width.bits())));
        }
        let bits = width.bits();
        let mask = || Expr::Num(width.mask());
        let (a, b) = (Expr::var(&a), Expr::var(&b));
        let ty = ValueType::Bits(width);

        let guard = |cond: Expr, message: String| IrInstruction::assert(cond, message);
        match inst {
            Bytecode::Add => {
                state.out.push(guard(
                    Expr::ge(Expr::binary(BinOp::Sub, mask(), a.clone()), b.clone()),
                    format!("u{} overflow in addition", bits),
                ));
                self.load(state, ty, Expr::binary(BinOp::Add, a, b))
            }
            Bytecode::Sub => {
                state.out.push(guard(
                    Expr::ge(a.clone(), b.clone()),
                    format!("u{} overflow in subtraction", bits),
                ));
                self.load(state, ty, Expr::binary(BinOp::Sub, a, b))
            }
            Bytecode::Mul => {
                state.out.push(guard(
                    Expr::le(Expr::binary(BinOp::IntMul, a.clone(), b.clone()), mask()),
                    format!("u{} overflow in multiplication", bits),
                ));
                self.load(state, ty, Expr::binary(BinOp::Mul, a, b))
            }
            Bytecode::Div | Bytecode::Mod => {
                state.out.push(guard(
                    Expr::neq(b.clone(), Expr::zero()),
                    "Division by zero".to_string(),
                ));
                let op = if matches!(inst, Bytecode::Div) {
                    BinOp::Div
                } else {
                    BinOp::Mod
                };
                self.load(state, ty, Expr::binary(op, a, b))
            }
            Bytecode::BitOr => self.load(state, ty, Expr::binary(BinOp::BitOr, a, b)),
            Bytecode::BitAnd => self.load(state, ty, Expr::binary(BinOp::BitAnd, a, b)),
            Bytecode::Xor => self.load(state, ty, Expr::binary(BinOp::Xor, a, b)),
            Bytecode::Lt => self.load(state, ValueType::Bool, Expr::lt(a, b)),
            Bytecode::Gt => self.load(state, ValueType::Bool, Expr::gt(a, b)),
            Bytecode::Le => self.load(state, ValueType::Bool, Expr::le(a, b)),
            Bytecode::Ge => self.load(state, ValueType::Bool, Expr::ge(a, b)),
            other => Err(Error::InvalidInstruction {
                offset: state.offset,
                message: format!("{:?} is not an arithmetic operation", other),
            }),
        }
    }

    /// Both operands must have the same type; references compare their referents
    fn equality(&mut self, state: &mut BlockState, negate: bool) -> Result<Flow> {
        let (a, b) = match self.top(state)? {
            Type::Reference(ty) => {
                let (_, a_ref) = self.pop_ref(state)?;
                let b_ref = self.pop_expect(state, &Type::Reference(ty.clone()))?;
                let a = self.gen.ctx.tmp("a", ty.tag());
                let b = self.gen.ctx.tmp("b", ty.tag());
                state.out.push(IrInstruction::Memory(MemoryOp::ReadRef {
                    dst: a.clone(),
                    reference: a_ref,
                }));
                state.out.push(IrInstruction::Memory(MemoryOp::ReadRef {
                    dst: b.clone(),
                    reference: b_ref,
                }));
                (a, b)
            }
            Type::Value(_) => {
                let (ty, a) = self.pop(state)?;
                let b = self.pop_expect(state, &ty)?;
                (a, b)
            }
        };
        if negate {
            let eq = self.gen.ctx.tmp("eq", Tag::Bool);
            state.out.push(IrInstruction::Memory(MemoryOp::Eq {
                dst: eq.clone(),
                a,
                b,
            }));
            self.load(state, ValueType::Bool, Expr::not(Expr::var(&eq)))
        } else {
            let dst = self.push(state, Type::Value(ValueType::Bool));
            state
                .out
                .push(IrInstruction::Memory(MemoryOp::Eq { dst, a, b }));
            Ok(Flow::Next)
        }
    }

    fn vec_swap(&mut self, state: &mut BlockState) -> Result<Flow> {
        let u64_ty = Type::Value(ValueType::U64);
        let index2 = self.pop_expect(state, &u64_ty)?;
        let index1 = self.pop_expect(state, &u64_ty)?;
        let (elem, vec_ref) = self.pop_vec_ref(state)?;

        let ctx = &mut self.gen.ctx;
        let ref1 = ctx.tmp("swapRef", Type::Reference(elem.clone()).tag());
        let ref2 = ctx.tmp("swapRef", Type::Reference(elem.clone()).tag());
        let val1 = ctx.tmp("swapVal", elem.tag());
        let val2 = ctx.tmp("swapVal", elem.tag());
        let bounds_check = self.gen.options.check_vector_bounds;

        state.out.extend([
            IrInstruction::Memory(MemoryOp::VecBorrow {
                dst_ref: ref1.clone(),
                src_ref: vec_ref.clone(),
                index: index1,
                bounds_check,
            }),
            IrInstruction::Memory(MemoryOp::VecBorrow {
                dst_ref: ref2.clone(),
                src_ref: vec_ref,
                index: index2,
                bounds_check,
            }),
            IrInstruction::Memory(MemoryOp::ReadRef {
                dst: val1.clone(),
                reference: ref1.clone(),
            }),
            IrInstruction::Memory(MemoryOp::ReadRef {
                dst: val2.clone(),
                reference: ref2.clone(),
            }),
            IrInstruction::Memory(MemoryOp::WriteRef {
                reference: ref1,
                src: val2,
            }),
            IrInstruction::Memory(MemoryOp::WriteRef {
                reference: ref2,
                src: val1,
            }),
        ]);
        Ok(Flow::Next)
    }

    /// Chain of `idx == i` tests, one block each, ending in an "Invalid variant tag" trap
    fn variant_switch(&mut self, state: &mut BlockState, targets: &[usize]) -> Result<Flow> {
        let (ty, reference) = self.pop_ref(state)?;
        let e = ty
            .as_enum()
            .ok_or_else(|| self.mismatch(state, "enum reference", &ty))?;
        if targets.len() != e.variants.len() {
            return Err(Error::InvalidInstruction {
                offset: state.offset,
                message: format!(
                    "switch over {} has {} targets for {} variants",
                    ty,
                    targets.len(),
                    e.variants.len()
                ),
            });
        }

        let idx = self.gen.ctx.tmp("variant_idx", Tag::Bit256);
        let fail = self.gen.ctx.new_block();
        self.blocks.push(BasicBlock::new(
            fail,
            vec![IrInstruction::trap("Invalid variant tag")],
        ));

        let mut next = fail;
        for (i, target) in targets.iter().enumerate().rev() {
            let id = self.gen.ctx.new_block();
            let cond = self.gen.ctx.tmp("variant_switch_cond", Tag::Bool);
            let then_block = self.successor(*target, &state.stack)?;
            self.blocks.push(BasicBlock::new(
                id,
                vec![
                    IrInstruction::assign(&cond, Expr::eq(Expr::var(&idx), Expr::num(i))),
                    IrInstruction::JumpIf {
                        cond,
                        then_block,
                        else_block: next,
                    },
                ],
            ));
            next = id;
        }

        state.out.push(IrInstruction::Memory(MemoryOp::VariantIndex {
            index: idx,
            reference,
        }));
        state.out.push(IrInstruction::Jump(next));
        Ok(Flow::End)
    }

    fn call(&mut self, state: &mut BlockState, callee: &FunctionId) -> Result<Flow> {
        let scene = self.gen.scene;
        let function = scene.function(callee)?;
        let mut args = Vec::with_capacity(function.params.len());
        for ty in function.params.iter().rev() {
            args.push(self.pop_expect(state, ty)?);
        }
        args.reverse();
        let returns: Vec<Var> = function
            .returns
            .iter()
            .map(|ty| self.push(state, ty.clone()))
            .collect();

        let entry = self.gen.ctx.new_block();
        let return_block = self.successor(state.offset + 1, &state.stack)?;
        let compiled = self.gen.compile_call(Call {
            callee: callee.clone(),
            args,
            returns,
            entry,
            return_block,
            stack: self.call_stack.to_vec(),
        })?;
        self.deps.merge(&compiled.deps);
        self.blocks.extend(compiled.blocks);
        state.out.push(IrInstruction::Jump(entry));
        Ok(Flow::End)
    }

    // =========================================================================
    // CONSTANTS
    // =========================================================================

    /// Pushes a BCS-decoded value of type `ty`
    fn decode_const(
        &mut self,
        state: &mut BlockState,
        decoder: &mut ConstDecoder<'_>,
        ty: &ValueType,
    ) -> Result<()> {
        match ty {
            ValueType::Bool => {
                let value = match decoder.byte()? {
                    0 => false,
                    1 => true,
                    b => return Err(decoder.error(format!("invalid bool byte {}", b))),
                };
                self.push_value(state, ValueType::Bool, Expr::Bool(value));
            }
            ValueType::Bits(w) => {
                let bytes = decoder.take(w.bits() as usize / 8)?;
                self.push_value(state, ty.clone(), Expr::Num(BigUint::from_bytes_le(bytes)));
            }
            ValueType::Address | ValueType::Signer => {
                let bytes = decoder.take(32)?;
                self.push_value(state, ty.clone(), Expr::Num(BigUint::from_bytes_be(bytes)));
            }
            ValueType::Struct(st) => {
                let fields = st.fields("decode a constant of")?;
                for field in fields {
                    self.decode_const(state, decoder, &field.ty)?;
                }
                let srcs = self.pop_fields(state, fields.iter().map(|f| &f.ty))?;
                let dst = self.push(state, Type::Value(ty.clone()));
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::PackStruct { dst, srcs }));
            }
            ValueType::Vector(elem) if **elem == ValueType::U8 => {
                let len = decoder.uleb128()?;
                let bytes = decoder.take(len)?.to_vec();
                let string = self.gen.ctx.string_constant(&bytes);
                self.push_value(state, ty.clone(), Expr::var(&string));
            }
            ValueType::Vector(elem) => {
                let len = decoder.uleb128()?;
                for _ in 0..len {
                    self.decode_const(state, decoder, elem)?;
                }
                let srcs = self.pop_fields(state, (0..len).map(|_| &**elem))?;
                let dst = self.push(state, Type::Value(ty.clone()));
                state
                    .out
                    .push(IrInstruction::Memory(MemoryOp::VecPack { dst, srcs }));
            }
            ValueType::Enum(_) => {
                return Err(decoder.error("enum constants are not supported".to_string()))
            }
            ValueType::MathInt | ValueType::GhostArray(_) => {
                return Err(decoder.error(format!("{} cannot appear in a constant", ty)))
            }
        }
        Ok(())
    }
}

/// Cursor over BCS constant bytes
struct ConstDecoder<'d> {
    ty: &'d ValueType,
    data: &'d [u8],
    pos: usize,
}

impl<'d> ConstDecoder<'d> {
    fn error(&self, message: String) -> Error {
        Error::ConstantDecode {
            ty: self.ty.to_string(),
            message,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'d [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.error(format!("need {} bytes at {}", n, self.pos)))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn uleb128(&mut self) -> Result<usize> {
        let mut value: u64 = 0;
        for shift in (0..64).step_by(7) {
            let b = self.byte()?;
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return usize::try_from(value).map_err(|_| self.error("length overflow".to_string()));
            }
        }
        Err(self.error("ULEB128 length too long".to_string()))
    }
}
