//! Concrete interpreter for core IR programs
//!
//! Executes a lowered program on concrete values. Unconstrained values (havocs, reads of
//! never-written variables, fresh map contents) are drawn from a [`HavocSource`], so a run is
//! fully deterministic for a given source.
//!
//! ## Value Domain
//!
//! | Tag | Value |
//! |-----|-------|
//! | `Bool` | [`Value::Bool`] |
//! | `Bit256` | [`Value::Num`] in `0..2^256` |
//! | `Int` | [`Value::Num`], unbounded and signed |
//! | `GhostMap` | [`Value::Map`], lazily defined |
//!
//! An `Assume` that does not hold, or a `Narrow` of an out-of-range value, makes the run
//! [`Outcome::Infeasible`]. A failing `Assert` makes it [`Outcome::Violated`].
//!
//! Memory-level instructions are rejected: lower the program first.

use super::expr::{BinOp, Expr, HashFamily};
use super::instruction::IrInstruction;
use super::program::{BlockId, IrProgram};
use super::var::{Tag, Var};
use crate::{Error, Result};
use num_bigint::{BigInt, BigUint, Sign};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref TWO_256: BigInt = BigInt::from(1u8) << 256;
}

/// Default bound on executed instructions
pub const DEFAULT_MAX_STEPS: usize = 1_000_000;

/// Variable environment
pub type Env = HashMap<String, Value>;

/// Concrete value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Integer (Bit256 or Int)
    Num(BigInt),
    /// Map from key tuples to values
    Map(Arc<MapValue>),
}

impl Value {
    /// Numeric value, if any
    pub fn as_num(&self) -> Option<&BigInt> {
        match self {
            Value::Num(n) => Some(n),
            _ => None,
        }
    }

    /// Boolean value, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Map(_) => "map",
        }
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Num(BigInt::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Map value: explicit updates over a lazily evaluated base
#[derive(Debug, Clone, PartialEq)]
pub struct MapValue {
    base: MapBase,
    updates: BTreeMap<Vec<BigInt>, Value>,
}

#[derive(Debug, Clone, PartialEq)]
enum MapBase {
    /// Unconstrained contents; each key is drawn from the havoc source
    Havoc { id: String, value_tag: Tag },
    /// `\param. body`, closed over the environment at definition time
    Defined {
        param: Var,
        body: Expr,
        env: Arc<Env>,
    },
}

/// Supplier of unconstrained values
///
/// Must be deterministic in `key`: the interpreter may ask for the same key more than once
/// and expects the same answer.
pub trait HavocSource {
    /// Scalar value of sort `tag` for `key`
    fn scalar(&self, key: &str, tag: &Tag) -> Value;
}

/// Every unconstrained value is zero (or false)
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroHavoc;

impl HavocSource for ZeroHavoc {
    fn scalar(&self, _key: &str, tag: &Tag) -> Value {
        match tag {
            Tag::Bool => Value::Bool(false),
            _ => Value::Num(BigInt::from(0u8)),
        }
    }
}

/// Pseudo-random small values derived from SHA-256 of a seed and the key
///
/// Numbers stay below 256 so that width assumptions of every integer type can hold.
#[derive(Debug, Clone, Copy)]
pub struct SeededHavoc {
    seed: u64,
}

impl SeededHavoc {
    /// Creates a source from `seed`
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl HavocSource for SeededHavoc {
    fn scalar(&self, key: &str, tag: &Tag) -> Value {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        match tag {
            Tag::Bool => Value::Bool(digest[0] & 1 == 1),
            _ => Value::Num(BigInt::from(digest[0])),
        }
    }
}

/// Fixed values for chosen keys, falling back to another source
#[derive(Debug, Clone, Default)]
pub struct FixedHavoc<H> {
    values: HashMap<String, Value>,
    fallback: H,
}

impl<H: HavocSource> FixedHavoc<H> {
    /// Creates a source that defers to `fallback` for unset keys
    pub fn new(fallback: H) -> Self {
        Self {
            values: HashMap::new(),
            fallback,
        }
    }

    /// Fixes the value of `key` (a variable name for the first havoc of that variable)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl<H: HavocSource> HavocSource for FixedHavoc<H> {
    fn scalar(&self, key: &str, tag: &Tag) -> Value {
        match self.values.get(key) {
            Some(v) => v.clone(),
            None => self.fallback.scalar(key, tag),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Reached a block without successors
    Completed,
    /// An assertion failed
    Violated {
        /// Assertion message
        message: String,
        /// Block containing the assertion
        block: BlockId,
    },
    /// An assumption failed; the run is not a real execution
    Infeasible,
    /// The step bound was reached
    OutOfSteps,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct Execution {
    /// How the run ended
    pub outcome: Outcome,
    /// Final variable values
    pub env: Env,
    /// Executed instruction count
    pub steps: usize,
    /// Blocks in execution order
    pub path: Vec<BlockId>,
}

impl Execution {
    /// Final value of `name`
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.env.get(name)
    }
}

/// Early exit from straight-line code
enum Stop {
    Violated(String),
    Infeasible,
}

/// Concrete interpreter over one program
pub struct Interpreter<'p, H> {
    program: &'p IrProgram,
    havoc: H,
    max_steps: usize,
    fresh: u64,
    havoc_counts: HashMap<String, u64>,
}

impl<'p, H: HavocSource> Interpreter<'p, H> {
    /// Creates an interpreter drawing unconstrained values from `havoc`
    pub fn new(program: &'p IrProgram, havoc: H) -> Self {
        Self {
            program,
            havoc,
            max_steps: DEFAULT_MAX_STEPS,
            fresh: 0,
            havoc_counts: HashMap::new(),
        }
    }

    /// Sets the bound on executed instructions
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Runs the program from its entry block
    pub fn run(&mut self) -> Result<Execution> {
        let mut env = Env::new();
        let mut path = Vec::new();
        let mut steps = 0usize;
        let program = self.program;
        let mut current = program.entry;

        loop {
            path.push(current);
            let block = program.block(current)?;
            let mut next = None;
            for inst in &block.instructions {
                steps += 1;
                if steps > self.max_steps {
                    return Ok(Execution {
                        outcome: Outcome::OutOfSteps,
                        env,
                        steps,
                        path,
                    });
                }
                match inst {
                    IrInstruction::Jump(target) => next = Some(*target),
                    IrInstruction::JumpIf {
                        cond,
                        then_block,
                        else_block,
                    } => {
                        let taken = self.truth(&mut env, &Expr::var(cond))?;
                        next = Some(if taken { *then_block } else { *else_block });
                    }
                    other => {
                        if let Some(stop) = self.exec(&mut env, other)? {
                            let outcome = match stop {
                                Stop::Violated(message) => Outcome::Violated {
                                    message,
                                    block: current,
                                },
                                Stop::Infeasible => Outcome::Infeasible,
                            };
                            return Ok(Execution {
                                outcome,
                                env,
                                steps,
                                path,
                            });
                        }
                    }
                }
            }
            match next {
                Some(target) => current = target,
                None => {
                    return Ok(Execution {
                        outcome: Outcome::Completed,
                        env,
                        steps,
                        path,
                    })
                }
            }
        }
    }

    fn exec(&mut self, env: &mut Env, inst: &IrInstruction) -> Result<Option<Stop>> {
        match inst {
            IrInstruction::Assign { dst, expr } => match self.eval(env, expr) {
                Ok(value) => {
                    env.insert(dst.name.clone(), value);
                    Ok(None)
                }
                Err(EvalError::Infeasible) => Ok(Some(Stop::Infeasible)),
                Err(EvalError::Fatal(e)) => Err(e),
            },
            IrInstruction::Havoc(var) => {
                let count = self.havoc_counts.entry(var.name.clone()).or_insert(0);
                let key = if *count == 0 {
                    var.name.clone()
                } else {
                    format!("{}#{}", var.name, count)
                };
                *count += 1;
                let value = self.unconstrained(&key, &var.tag);
                env.insert(var.name.clone(), value);
                Ok(None)
            }
            IrInstruction::Assume(cond) => match self.truth_checked(env, cond)? {
                Some(true) => Ok(None),
                _ => Ok(Some(Stop::Infeasible)),
            },
            IrInstruction::Assert { cond, message } => match self.truth_checked(env, cond)? {
                Some(true) => Ok(None),
                Some(false) => Ok(Some(Stop::Violated(message.clone()))),
                None => Ok(Some(Stop::Infeasible)),
            },
            IrInstruction::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                let branch = match self.truth_checked(env, cond)? {
                    Some(true) => then_branch,
                    Some(false) => else_branch,
                    None => return Ok(Some(Stop::Infeasible)),
                };
                for inner in branch {
                    if let Some(stop) = self.exec(env, inner)? {
                        return Ok(Some(stop));
                    }
                }
                Ok(None)
            }
            IrInstruction::Label(_) | IrInstruction::Annotation(_) | IrInstruction::Nop => Ok(None),
            IrInstruction::Jump(_) | IrInstruction::JumpIf { .. } => Err(Error::MalformedProgram(
                "jump inside a structured conditional".to_string(),
            )),
            IrInstruction::Memory(op) => Err(Error::MalformedProgram(format!(
                "memory operation `{}` in a core program",
                op
            ))),
        }
    }

    /// Evaluates a condition; `None` when evaluation was infeasible
    fn truth_checked(&mut self, env: &mut Env, cond: &Expr) -> Result<Option<bool>> {
        match self.eval(env, cond) {
            Ok(Value::Bool(b)) => Ok(Some(b)),
            Ok(other) => Err(expect_kind("bool", &other)),
            Err(EvalError::Infeasible) => Ok(None),
            Err(EvalError::Fatal(e)) => Err(e),
        }
    }

    fn truth(&mut self, env: &mut Env, cond: &Expr) -> Result<bool> {
        self.truth_checked(env, cond)?
            .ok_or_else(|| Error::MalformedProgram("infeasible branch condition".to_string()))
    }

    fn unconstrained(&mut self, key: &str, tag: &Tag) -> Value {
        match tag {
            Tag::GhostMap(_, value_tag) => Value::Map(Arc::new(MapValue {
                base: MapBase::Havoc {
                    id: key.to_string(),
                    value_tag: (**value_tag).clone(),
                },
                updates: BTreeMap::new(),
            })),
            _ => self.havoc.scalar(key, tag),
        }
    }

    fn fresh_key(&mut self) -> String {
        self.fresh += 1;
        format!("!fresh!{}", self.fresh)
    }

    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    fn eval(&mut self, env: &mut Env, expr: &Expr) -> std::result::Result<Value, EvalError> {
        Ok(match expr {
            Expr::Var(v) => match env.get(&v.name) {
                Some(value) => value.clone(),
                None => {
                    // Never written: unconstrained, but stable for the rest of the run
                    let value = self.unconstrained(&v.name, &v.tag);
                    env.insert(v.name.clone(), value.clone());
                    value
                }
            },
            Expr::Num(n) => Value::Num(BigInt::from(n.clone())),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Unconstrained(tag) => {
                let key = self.fresh_key();
                self.unconstrained(&key, tag)
            }
            Expr::Binary(op, a, b) => {
                let a = self.num(env, a)?;
                let b = self.num(env, b)?;
                binary(*op, a, b)
            }
            Expr::Not(e) => Value::Bool(!self.boolean(env, e)?),
            Expr::And(es) => {
                for e in es {
                    if !self.boolean(env, e)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Value::Bool(true)
            }
            Expr::Or(es) => {
                for e in es {
                    if self.boolean(env, e)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Value::Bool(false)
            }
            Expr::Ite(c, t, e) => {
                if self.boolean(env, c)? {
                    self.eval(env, t)?
                } else {
                    self.eval(env, e)?
                }
            }
            Expr::Select { map, index } => {
                let map = self.map(env, map)?;
                let key = self.key(env, index)?;
                self.select(&map, &key)?
            }
            Expr::Store { map, index, value } => {
                let map = self.map(env, map)?;
                let key = self.key(env, index)?;
                let value = self.eval(env, value)?;
                let mut updated = (*map).clone();
                updated.updates.insert(key, value);
                Value::Map(Arc::new(updated))
            }
            Expr::MapDefinition { param, body } => Value::Map(Arc::new(MapValue {
                base: MapBase::Defined {
                    param: param.clone(),
                    body: (**body).clone(),
                    env: Arc::new(env.clone()),
                },
                updates: BTreeMap::new(),
            })),
            Expr::Hash { family, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(env, arg)?);
                }
                Value::Num(hash(family, &values)?)
            }
            Expr::Narrow { value, max } => {
                let bound = match max {
                    Some(m) => BigInt::from(m.clone()),
                    None => &*TWO_256 - BigInt::from(1u8),
                };
                // A fresh value is chosen inside the bound rather than rejected
                let n = if let Expr::Unconstrained(tag) = value.as_ref() {
                    let key = self.fresh_key();
                    let raw = self.havoc.scalar(&key, tag);
                    let raw = as_num(&raw)?;
                    raw.magnitude().clone() % (bound.magnitude() + BigUint::from(1u8))
                } else {
                    let n = self.num(env, value)?;
                    if n.sign() == Sign::Minus || n > bound {
                        return Err(EvalError::Infeasible);
                    }
                    n.magnitude().clone()
                };
                Value::Num(BigInt::from(n))
            }
        })
    }

    fn num(&mut self, env: &mut Env, expr: &Expr) -> std::result::Result<BigInt, EvalError> {
        let value = self.eval(env, expr)?;
        Ok(as_num(&value)?.clone())
    }

    fn boolean(&mut self, env: &mut Env, expr: &Expr) -> std::result::Result<bool, EvalError> {
        match self.eval(env, expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(expect_kind("bool", &other).into()),
        }
    }

    fn map(&mut self, env: &mut Env, expr: &Expr) -> std::result::Result<Arc<MapValue>, EvalError> {
        match self.eval(env, expr)? {
            Value::Map(m) => Ok(m),
            other => Err(expect_kind("map", &other).into()),
        }
    }

    fn key(&mut self, env: &mut Env, index: &[Expr]) -> std::result::Result<Vec<BigInt>, EvalError> {
        index.iter().map(|e| self.num(env, e)).collect()
    }

    fn select(&mut self, map: &MapValue, key: &[BigInt]) -> std::result::Result<Value, EvalError> {
        if let Some(value) = map.updates.get(key) {
            return Ok(value.clone());
        }
        match &map.base {
            MapBase::Havoc { id, value_tag } => {
                let parts: Vec<String> = key.iter().map(|k| k.to_string()).collect();
                Ok(self.unconstrained(&format!("{}[{}]", id, parts.join(",")), value_tag))
            }
            MapBase::Defined { param, body, env } => {
                let [k] = key else {
                    return Err(Error::MalformedProgram(format!(
                        "map definition over {} applied to {} keys",
                        param.name,
                        key.len()
                    ))
                    .into());
                };
                let mut scope = (**env).clone();
                scope.insert(param.name.clone(), Value::Num(k.clone()));
                self.eval(&mut scope, body)
            }
        }
    }
}

/// Evaluation failure
enum EvalError {
    /// A narrowing assumption failed
    Infeasible,
    /// The program is ill-formed
    Fatal(Error),
}

impl From<Error> for EvalError {
    fn from(e: Error) -> Self {
        EvalError::Fatal(e)
    }
}

fn expect_kind(expected: &str, got: &Value) -> Error {
    Error::MalformedProgram(format!("expected a {}, found a {}", expected, got.kind()))
}

fn as_num(value: &Value) -> std::result::Result<&BigInt, EvalError> {
    value
        .as_num()
        .ok_or_else(|| expect_kind("number", value).into())
}

fn wrap(n: BigInt) -> BigInt {
    let r = n % &*TWO_256;
    if r.sign() == Sign::Minus {
        r + &*TWO_256
    } else {
        r
    }
}

fn binary(op: BinOp, a: BigInt, b: BigInt) -> Value {
    let zero = BigInt::from(0u8);
    match op {
        BinOp::Add => Value::Num(wrap(a + b)),
        BinOp::Sub => Value::Num(wrap(a - b)),
        BinOp::Mul => Value::Num(wrap(a * b)),
        // Division by zero yields zero; programs guard it with an assertion
        BinOp::Div => Value::Num(if b == zero { zero } else { a / b }),
        BinOp::Mod => Value::Num(if b == zero { zero } else { a % b }),
        BinOp::BitAnd => Value::Num(a & b),
        BinOp::BitOr => Value::Num(a | b),
        BinOp::Xor => Value::Num(a ^ b),
        BinOp::Shl => Value::Num(match u32::try_from(&b) {
            Ok(s) if s < 256 => wrap(a << s),
            _ => zero,
        }),
        BinOp::Shr => Value::Num(match u32::try_from(&b) {
            Ok(s) if s < 256 => a >> s,
            _ => zero,
        }),
        BinOp::IntAdd => Value::Num(a + b),
        BinOp::IntSub => Value::Num(a - b),
        BinOp::IntMul => Value::Num(a * b),
        BinOp::IntDiv => Value::Num(floor_div(a, b)),
        BinOp::Eq => Value::Bool(a == b),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Ge => Value::Bool(a >= b),
    }
}

fn floor_div(a: BigInt, b: BigInt) -> BigInt {
    let zero = BigInt::from(0u8);
    if b == zero {
        return zero;
    }
    let q = &a / &b;
    let r = &a % &b;
    if r != zero && ((r.sign() == Sign::Minus) != (b.sign() == Sign::Minus)) {
        q - BigInt::from(1u8)
    } else {
        q
    }
}

/// SHA-256 of the family name and the 32-byte big-endian encoding of each argument
fn hash(family: &HashFamily, args: &[Value]) -> std::result::Result<BigInt, EvalError> {
    let mut hasher = Sha256::new();
    hasher.update(family.to_string().as_bytes());
    hasher.update([0u8]);
    for arg in args {
        let n = match arg {
            Value::Bool(b) => BigInt::from(u8::from(*b)),
            Value::Num(n) => wrap(n.clone()),
            Value::Map(_) => return Err(expect_kind("hashable scalar", arg).into()),
        };
        let (_, bytes) = n.to_bytes_be();
        let mut word = [0u8; 32];
        word[32 - bytes.len()..].copy_from_slice(&bytes);
        hasher.update(word);
    }
    Ok(BigInt::from_bytes_be(Sign::Plus, &hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::program::BasicBlock;

    fn program(blocks: Vec<Vec<IrInstruction>>) -> IrProgram {
        let mut p = IrProgram::new("test", BlockId(0));
        for (i, instructions) in blocks.into_iter().enumerate() {
            p.add_block(BasicBlock::new(BlockId(i as u32), instructions));
        }
        p
    }

    fn num(v: &Value) -> u64 {
        u64::try_from(v.as_num().unwrap()).unwrap()
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let x = Var::new("x", Tag::Bit256);
        let p = program(vec![vec![IrInstruction::assign(
            &x,
            Expr::binary(BinOp::Sub, Expr::num(1u8), Expr::num(2u8)),
        )]]);
        let run = Interpreter::new(&p, ZeroHavoc).run().unwrap();
        assert_eq!(run.outcome, Outcome::Completed);
        let expected = Value::Num(&*TWO_256 - BigInt::from(1u8));
        assert_eq!(run.value("x"), Some(&expected));
    }

    #[test]
    fn test_assert_and_branch() {
        let c = Var::new("c", Tag::Bool);
        let p = program(vec![
            vec![
                IrInstruction::Havoc(c.clone()),
                IrInstruction::JumpIf {
                    cond: c,
                    then_block: BlockId(1),
                    else_block: BlockId(2),
                },
            ],
            vec![IrInstruction::trap("boom")],
            vec![IrInstruction::Nop],
        ]);
        let run = Interpreter::new(&p, ZeroHavoc).run().unwrap();
        assert_eq!(run.outcome, Outcome::Completed);
        assert_eq!(run.path, vec![BlockId(0), BlockId(2)]);

        let run = Interpreter::new(&p, FixedHavoc::new(ZeroHavoc).with("c", true))
            .run()
            .unwrap();
        assert_eq!(
            run.outcome,
            Outcome::Violated {
                message: "boom".to_string(),
                block: BlockId(1)
            }
        );
    }

    #[test]
    fn test_narrow_out_of_range_is_infeasible() {
        let x = Var::new("x", Tag::Bit256);
        let p = program(vec![vec![IrInstruction::assign(
            &x,
            Expr::narrow(Expr::num(300u32), Some(BigUint::from(255u8))),
        )]]);
        let run = Interpreter::new(&p, ZeroHavoc).run().unwrap();
        assert_eq!(run.outcome, Outcome::Infeasible);
    }

    #[test]
    fn test_map_store_and_definition() {
        let m = Var::new("m", Tag::composed_map());
        let d = Var::new("d", Tag::composed_map());
        let k = Var::new("k", Tag::Int);
        let a = Var::new("a", Tag::Int);
        let b = Var::new("b", Tag::Int);
        let p = program(vec![vec![
            IrInstruction::Havoc(m.clone()),
            IrInstruction::assign(&m, Expr::store(Expr::var(&m), Expr::num(3u8), Expr::num(7u8))),
            IrInstruction::assign(
                &d,
                Expr::MapDefinition {
                    param: k.clone(),
                    body: Box::new(Expr::ite(
                        Expr::lt(Expr::var(&k), Expr::num(3u8)),
                        Expr::num(1u8),
                        Expr::select(Expr::var(&m), Expr::var(&k)),
                    )),
                },
            ),
            IrInstruction::assign(&a, Expr::select(Expr::var(&d), Expr::num(0u8))),
            IrInstruction::assign(&b, Expr::select(Expr::var(&d), Expr::num(3u8))),
        ]]);
        let run = Interpreter::new(&p, SeededHavoc::new(9)).run().unwrap();
        assert_eq!(num(run.value("a").unwrap()), 1);
        assert_eq!(num(run.value("b").unwrap()), 7);
    }

    #[test]
    fn test_hash_is_deterministic_and_family_keyed() {
        let vals = [Value::from(1u64), Value::from(true)];
        let h1 = hash(&HashFamily::VectorDigest, &vals).ok().unwrap();
        let h2 = hash(&HashFamily::VectorDigest, &vals).ok().unwrap();
        let h3 = hash(&HashFamily::VectorElem, &vals).ok().unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_step_bound() {
        let p = program(vec![vec![IrInstruction::Jump(BlockId(0))]]);
        let run = Interpreter::new(&p, ZeroHavoc)
            .with_max_steps(10)
            .run()
            .unwrap();
        assert_eq!(run.outcome, Outcome::OutOfSteps);
    }

    #[test]
    fn test_floor_div() {
        assert_eq!(floor_div(BigInt::from(-7), BigInt::from(2)), BigInt::from(-4));
        assert_eq!(floor_div(BigInt::from(7), BigInt::from(2)), BigInt::from(3));
    }
}
