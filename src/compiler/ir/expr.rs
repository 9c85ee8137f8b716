//! IR expressions
//!
//! Expressions are pure trees over [`Var`]s. The smart constructors fold constant integer
//! arithmetic so that offsets computed from fixed field positions stay literal; everything
//! else is built verbatim.
//!
//! ## Arithmetic families
//!
//! | Ops | Domain | Overflow |
//! |-----|--------|----------|
//! | `Add Sub Mul Div Mod Shl Shr` | Bit256 | wraps mod 2^256 |
//! | `IntAdd IntSub IntMul IntDiv` | Int | unbounded |
//! | `BitAnd BitOr Xor` | Bit256 | n/a |

use super::var::{Tag, Var};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinOp {
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Unsigned division
    Div,
    /// Unsigned remainder
    Mod,
    /// Bitwise and
    BitAnd,
    /// Bitwise or
    BitOr,
    /// Bitwise xor
    Xor,
    /// Shift left (bits shifted past 256 are lost)
    Shl,
    /// Logical shift right
    Shr,
    /// Mathematical addition
    IntAdd,
    /// Mathematical subtraction
    IntSub,
    /// Mathematical multiplication
    IntMul,
    /// Mathematical (floor) division
    IntDiv,
    /// Equality
    Eq,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
}

impl BinOp {
    /// True for comparison operators, which produce a Bool
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    /// Surface syntax used in dumps
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::IntAdd => "+int",
            BinOp::IntSub => "-int",
            BinOp::IntMul => "*int",
            BinOp::IntDiv => "/int",
            BinOp::Eq => "==",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

/// Keyed hash family
///
/// Hashes from different families never collide with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HashFamily {
    /// Hash of a non-scalar vector element
    VectorElem,
    /// Digest of a vector built from element hashes
    VectorDigest,
    /// Combined hash of one native function's arguments
    Function(String),
    /// Hash of a single aggregate argument of a native function
    Argument(String),
}

impl fmt::Display for HashFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashFamily::VectorElem => write!(f, "move_vector_elem_hash"),
            HashFamily::VectorDigest => write!(f, "move_vector_digest"),
            HashFamily::Function(name) => write!(f, "hash_fun_{}", name),
            HashFamily::Argument(name) => write!(f, "hash_arg_{}", name),
        }
    }
}

/// Pure IR expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Variable reference
    Var(Var),
    /// Non-negative integer literal
    Num(BigUint),
    /// Boolean literal
    Bool(bool),
    /// Fresh unconstrained value of the given tag
    Unconstrained(Tag),
    /// Binary operation
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Logical negation
    Not(Box<Expr>),
    /// N-ary conjunction (empty is true)
    And(Vec<Expr>),
    /// N-ary disjunction (empty is false)
    Or(Vec<Expr>),
    /// If-then-else
    Ite(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Map read
    Select {
        /// Map
        map: Box<Expr>,
        /// Key tuple
        index: Vec<Expr>,
    },
    /// Functional map update
    Store {
        /// Map
        map: Box<Expr>,
        /// Key tuple
        index: Vec<Expr>,
        /// New value
        value: Box<Expr>,
    },
    /// Map defined pointwise: `\param. body`
    MapDefinition {
        /// Bound key variable
        param: Var,
        /// Value at `param`
        body: Box<Expr>,
    },
    /// Keyed hash of a tuple
    Hash {
        /// Family
        family: HashFamily,
        /// Hashed values
        args: Vec<Expr>,
    },
    /// Int-to-Bit256 conversion that assumes the value fits (and is at most `max`)
    Narrow {
        /// Converted value
        value: Box<Expr>,
        /// Optional tighter bound
        max: Option<BigUint>,
    },
}

impl Expr {
    /// Variable reference
    pub fn var(v: &Var) -> Expr {
        Expr::Var(v.clone())
    }

    /// Integer literal
    pub fn num(n: impl Into<BigUint>) -> Expr {
        Expr::Num(n.into())
    }

    /// Literal zero
    pub fn zero() -> Expr {
        Expr::num(0u8)
    }

    /// Literal value, if this is one
    pub fn as_num(&self) -> Option<&BigUint> {
        match self {
            Expr::Num(n) => Some(n),
            _ => None,
        }
    }

    /// True for leaves that are cheap to duplicate
    pub fn is_atomic(&self) -> bool {
        matches!(self, Expr::Var(_) | Expr::Num(_) | Expr::Bool(_))
    }

    fn is_num(&self, n: u32) -> bool {
        self.as_num().map_or(false, |v| *v == BigUint::from(n))
    }

    /// Unfolded binary operation
    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Expr {
        Expr::Binary(op, Box::new(a), Box::new(b))
    }

    /// Mathematical addition, folded on literals
    pub fn int_add(a: Expr, b: Expr) -> Expr {
        if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
            return Expr::Num(x + y);
        }
        if a.is_num(0) {
            b
        } else if b.is_num(0) {
            a
        } else {
            Expr::binary(BinOp::IntAdd, a, b)
        }
    }

    /// Mathematical subtraction, folded on literals when the result stays non-negative
    pub fn int_sub(a: Expr, b: Expr) -> Expr {
        if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
            if x >= y {
                return Expr::Num(x - y);
            }
        }
        if b.is_num(0) {
            a
        } else {
            Expr::binary(BinOp::IntSub, a, b)
        }
    }

    /// Mathematical multiplication, folded on literals
    pub fn int_mul(a: Expr, b: Expr) -> Expr {
        if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
            return Expr::Num(x * y);
        }
        if a.is_num(0) || b.is_num(0) {
            Expr::zero()
        } else if a.is_num(1) {
            b
        } else if b.is_num(1) {
            a
        } else {
            Expr::binary(BinOp::IntMul, a, b)
        }
    }

    /// Mathematical floor division, folded on literals
    pub fn int_div(a: Expr, b: Expr) -> Expr {
        if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
            if *y != BigUint::from(0u8) {
                return Expr::Num(x / y);
            }
        }
        if b.is_num(1) {
            a
        } else {
            Expr::binary(BinOp::IntDiv, a, b)
        }
    }

    /// Equality
    pub fn eq(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Eq, a, b)
    }

    /// Disequality
    pub fn neq(a: Expr, b: Expr) -> Expr {
        Expr::not(Expr::eq(a, b))
    }

    /// Less than
    pub fn lt(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Lt, a, b)
    }

    /// Less than or equal
    pub fn le(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Le, a, b)
    }

    /// Greater than
    pub fn gt(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Gt, a, b)
    }

    /// Greater than or equal
    pub fn ge(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Ge, a, b)
    }

    /// Negation
    pub fn not(e: Expr) -> Expr {
        match e {
            Expr::Bool(b) => Expr::Bool(!b),
            other => Expr::Not(Box::new(other)),
        }
    }

    /// Conjunction; a single operand is returned as is
    pub fn and(mut es: Vec<Expr>) -> Expr {
        if es.len() == 1 {
            es.remove(0)
        } else {
            Expr::And(es)
        }
    }

    /// Disjunction; a single operand is returned as is
    pub fn or(mut es: Vec<Expr>) -> Expr {
        if es.len() == 1 {
            es.remove(0)
        } else {
            Expr::Or(es)
        }
    }

    /// If-then-else
    pub fn ite(c: Expr, t: Expr, e: Expr) -> Expr {
        Expr::Ite(Box::new(c), Box::new(t), Box::new(e))
    }

    /// Map read at a single key
    pub fn select(map: Expr, index: Expr) -> Expr {
        Expr::Select {
            map: Box::new(map),
            index: vec![index],
        }
    }

    /// Map update at a single key
    pub fn store(map: Expr, index: Expr, value: Expr) -> Expr {
        Expr::Store {
            map: Box::new(map),
            index: vec![index],
            value: Box::new(value),
        }
    }

    /// Keyed hash
    pub fn hash(family: HashFamily, args: Vec<Expr>) -> Expr {
        Expr::Hash { family, args }
    }

    /// Int-to-Bit256 conversion bounded by `max`
    pub fn narrow(value: Expr, max: Option<BigUint>) -> Expr {
        Expr::Narrow {
            value: Box::new(value),
            max,
        }
    }

    /// Calls `f` on every variable read by this expression (bound map parameters excluded)
    pub fn for_each_var(&self, f: &mut dyn FnMut(&Var)) {
        match self {
            Expr::Var(v) => f(v),
            Expr::Num(_) | Expr::Bool(_) | Expr::Unconstrained(_) => {}
            Expr::Binary(_, a, b) => {
                a.for_each_var(f);
                b.for_each_var(f);
            }
            Expr::Not(e) | Expr::Narrow { value: e, .. } => e.for_each_var(f),
            Expr::And(es) | Expr::Or(es) | Expr::Hash { args: es, .. } => {
                for e in es {
                    e.for_each_var(f);
                }
            }
            Expr::Ite(c, t, e) => {
                c.for_each_var(f);
                t.for_each_var(f);
                e.for_each_var(f);
            }
            Expr::Select { map, index } => {
                map.for_each_var(f);
                for e in index {
                    e.for_each_var(f);
                }
            }
            Expr::Store { map, index, value } => {
                map.for_each_var(f);
                for e in index {
                    e.for_each_var(f);
                }
                value.for_each_var(f);
            }
            Expr::MapDefinition { param, body } => body.for_each_var(&mut |v: &Var| {
                if v != param {
                    f(v)
                }
            }),
        }
    }
}

impl From<&Var> for Expr {
    fn from(v: &Var) -> Self {
        Expr::var(v)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, es: &[Expr], sep: &str) -> fmt::Result {
    for (i, e) in es.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", e)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Num(n) => write!(f, "{}", n),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Unconstrained(tag) => write!(f, "*:{}", tag),
            Expr::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            Expr::Not(e) => write!(f, "!{}", e),
            Expr::And(es) if es.is_empty() => write!(f, "true"),
            Expr::Or(es) if es.is_empty() => write!(f, "false"),
            Expr::And(es) => {
                write!(f, "(")?;
                write_list(f, es, " && ")?;
                write!(f, ")")
            }
            Expr::Or(es) => {
                write!(f, "(")?;
                write_list(f, es, " || ")?;
                write!(f, ")")
            }
            Expr::Ite(c, t, e) => write!(f, "ite({}, {}, {})", c, t, e),
            Expr::Select { map, index } => {
                write!(f, "{}[", map)?;
                write_list(f, index, ", ")?;
                write!(f, "]")
            }
            Expr::Store { map, index, value } => {
                write!(f, "{}[", map)?;
                write_list(f, index, ", ")?;
                write!(f, " := {}]", value)
            }
            Expr::MapDefinition { param, body } => write!(f, "[{} -> {}]", param, body),
            Expr::Hash { family, args } => {
                write!(f, "{}(", family)?;
                write_list(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::Narrow { value, max: Some(m) } => write!(f, "narrow<={}({})", m, value),
            Expr::Narrow { value, max: None } => write!(f, "narrow({})", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_folding() {
        let e = Expr::int_add(Expr::num(2u8), Expr::int_mul(Expr::num(1u8), Expr::num(2u8)));
        assert_eq!(e, Expr::num(4u8));

        let x = Var::new("x", Tag::Int);
        assert_eq!(Expr::int_add(Expr::zero(), Expr::var(&x)), Expr::var(&x));
        assert_eq!(Expr::int_mul(Expr::var(&x), Expr::num(1u8)), Expr::var(&x));
        assert_eq!(Expr::int_mul(Expr::var(&x), Expr::zero()), Expr::zero());
    }

    #[test]
    fn test_int_sub_does_not_fold_negative() {
        let e = Expr::int_sub(Expr::num(1u8), Expr::num(3u8));
        assert!(matches!(e, Expr::Binary(BinOp::IntSub, _, _)));
    }

    #[test]
    fn test_display() {
        let x = Var::new("x", Tag::Bit256);
        let e = Expr::le(Expr::var(&x), Expr::num(255u32));
        assert_eq!(e.to_string(), "(x <= 255)");
        assert_eq!(HashFamily::Function("f".into()).to_string(), "hash_fun_f");
    }

    #[test]
    fn test_map_definition_hides_param() {
        let i = Var::new("i", Tag::Int);
        let m = Var::new("m", Tag::composed_map());
        let def = Expr::MapDefinition {
            param: i.clone(),
            body: Box::new(Expr::select(Expr::var(&m), Expr::var(&i))),
        };
        let mut seen = Vec::new();
        def.for_each_var(&mut |v: &Var| seen.push(v.name.clone()));
        assert_eq!(seen, vec!["m".to_string()]);
    }
}
