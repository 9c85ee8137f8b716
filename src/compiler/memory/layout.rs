//! Memory layouts
//!
//! A layout names the core IR variables that together hold one memory-level value. Top-level
//! values are *decomposed* (one variable per scalar component), while anything nested inside a
//! container lives in a *composed* flat map:
//!
//! ```text
//! v: vector<Point>             Vector { v!length, v!digest, v!content }
//! p: Point                     Struct [ Simple p.x!value, Simple p.y!value ]
//! e: Shape                     Enum { e!variant, e!content }
//! r: &Point                    RefLayout { r!loc, r!offset }
//! ```

use crate::compiler::alias::{PathComponent, RefTarget};
use crate::compiler::context::CompileContext;
use crate::compiler::ir::{Expr, IrInstruction, Tag, Var};
use crate::types::{BitWidth, EnumType, Type, ValueType};
use crate::{Error, Result};
use num_bigint::BigUint;
use std::fmt;
use std::sync::Arc;

/// Runtime representation of a reference: which alias target it denotes, and where
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefLayout {
    /// Id of the alias target being referenced
    pub target_id: Var,
    /// Offset within the target's layout, when it is composed
    pub offset: Var,
}

impl RefLayout {
    /// Reference layout with the given name prefix
    pub fn new(prefix: &str) -> Self {
        Self {
            target_id: Var::new(format!("{}!loc", prefix), Tag::Int),
            offset: Var::new(format!("{}!offset", prefix), Tag::Int),
        }
    }

    /// Layout of a memory-level reference variable
    pub fn from_var(var: &Var) -> Result<Self> {
        if !var.tag.is_reference() {
            return Err(Error::type_mismatch(
                "reference layout",
                "reference",
                &var.tag,
            ));
        }
        Ok(Self::new(&var.name))
    }

    /// `[target_id, offset]`
    pub fn component_vars(&self) -> Vec<Var> {
        vec![self.target_id.clone(), self.offset.clone()]
    }
}

/// Layout of a stored value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueLayout {
    /// One scalar; `ty` is `None` for plain core variables
    Simple {
        /// The scalar
        value: Var,
        /// Value type, when known
        ty: Option<ValueType>,
    },
    /// One layout per field
    Struct {
        /// Field layouts, in declaration order
        fields: Vec<ValueLayout>,
    },
    /// Discriminant plus composed content
    Enum {
        /// Variant index (Bit256)
        variant: Var,
        /// Content map holding the active variant's fields
        content: Var,
        /// Enum type, for the variant bound
        ty: Arc<EnumType>,
    },
    /// Header scalars plus composed content
    Vector {
        /// Length (Bit256, at most u64::MAX)
        length: Var,
        /// Digest (Bit256)
        digest: Var,
        /// Element map
        content: Var,
    },
    /// Composed content only
    GhostArray {
        /// Element map
        content: Var,
    },
    /// Flat Int -> Int map; the structure is given by the location's type and offset
    Composed {
        /// The map
        map: Var,
    },
}

impl ValueLayout {
    /// Layout for a value of type `ty`, naming all variables after `prefix`
    pub fn for_type(ty: &ValueType, prefix: &str, ctx: &mut CompileContext) -> Self {
        match ty {
            ValueType::Bool
            | ValueType::Bits(_)
            | ValueType::Address
            | ValueType::Signer
            | ValueType::MathInt => ValueLayout::Simple {
                value: Var::new(format!("{}!value", prefix), ty.tag()),
                ty: Some(ty.clone()),
            },
            ValueType::Struct(s) => ValueLayout::Struct {
                fields: s
                    .fields
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|f| ValueLayout::for_type(&f.ty, &format!("{}.{}", prefix, f.name), ctx))
                    .collect(),
            },
            ValueType::Enum(e) => ValueLayout::Enum {
                variant: Var::new(format!("{}!variant", prefix), Tag::Bit256),
                content: composed_map(format!("{}!content", prefix), ctx),
                ty: e.clone(),
            },
            ValueType::Vector(_) => ValueLayout::Vector {
                length: Var::new(format!("{}!length", prefix), Tag::Bit256),
                digest: Var::new(format!("{}!digest", prefix), Tag::Bit256),
                content: composed_map(format!("{}!content", prefix), ctx),
            },
            ValueType::GhostArray(_) => ValueLayout::GhostArray {
                content: composed_map(format!("{}!content", prefix), ctx),
            },
        }
    }

    /// Layout of a top-level memory-level value variable
    ///
    /// Core-tagged variables are their own single-scalar layout.
    pub fn from_var(var: &Var, ctx: &mut CompileContext) -> Result<Self> {
        match &var.tag {
            Tag::Move(Type::Value(ty)) => Ok(ValueLayout::for_type(ty, &var.name, ctx)),
            Tag::Move(Type::Reference(_)) => Err(Error::type_mismatch(
                "value layout",
                "value",
                &var.tag,
            )),
            _ => Ok(ValueLayout::Simple {
                value: var.clone(),
                ty: None,
            }),
        }
    }

    /// All core variables of this layout, in a fixed order
    pub fn component_vars(&self) -> Vec<Var> {
        match self {
            ValueLayout::Simple { value, .. } => vec![value.clone()],
            ValueLayout::Struct { fields } => fields.iter().flat_map(|f| f.component_vars()).collect(),
            ValueLayout::Enum {
                variant, content, ..
            } => vec![variant.clone(), content.clone()],
            ValueLayout::Vector {
                length,
                digest,
                content,
            } => vec![length.clone(), digest.clone(), content.clone()],
            ValueLayout::GhostArray { content } => vec![content.clone()],
            ValueLayout::Composed { map } => vec![map.clone()],
        }
    }

    /// Short name of the layout class
    pub fn kind_name(&self) -> &'static str {
        match self {
            ValueLayout::Simple { .. } => "simple",
            ValueLayout::Struct { .. } => "struct",
            ValueLayout::Enum { .. } => "enum",
            ValueLayout::Vector { .. } => "vector",
            ValueLayout::GhostArray { .. } => "ghost array",
            ValueLayout::Composed { .. } => "composed",
        }
    }

    /// The composed map, if this layout is composed
    pub fn as_composed(&self) -> Option<&Var> {
        match self {
            ValueLayout::Composed { map } => Some(map),
            _ => None,
        }
    }

    /// Sets every component to an arbitrary value allowed by its type
    pub fn havoc(&self) -> Result<Vec<IrInstruction>> {
        match self {
            ValueLayout::Simple { value, ty } => Ok(havoc_simple(value, ty.as_ref())),
            ValueLayout::Struct { fields } => {
                let mut out = Vec::new();
                for f in fields {
                    out.extend(f.havoc()?);
                }
                Ok(out)
            }
            ValueLayout::Enum {
                variant,
                content,
                ty,
            } => {
                let last = ty.last_variant_index()?;
                Ok(vec![
                    IrInstruction::assign(
                        variant,
                        Expr::narrow(Expr::Unconstrained(Tag::Int), Some(BigUint::from(last))),
                    ),
                    IrInstruction::Havoc(content.clone()),
                ])
            }
            ValueLayout::Vector {
                length,
                digest,
                content,
            } => Ok(vec![
                IrInstruction::assign(
                    length,
                    Expr::narrow(
                        Expr::Unconstrained(Tag::Int),
                        Some(BitWidth::W64.mask()),
                    ),
                ),
                IrInstruction::Havoc(digest.clone()),
                IrInstruction::Havoc(content.clone()),
            ]),
            ValueLayout::GhostArray { content } => Ok(vec![IrInstruction::Havoc(content.clone())]),
            ValueLayout::Composed { map } => Ok(vec![IrInstruction::Havoc(map.clone())]),
        }
    }

    fn check_assign(&self, src: &ValueLayout) -> Result<(Vec<Var>, Vec<Var>)> {
        let dst_vars = self.component_vars();
        let src_vars = src.component_vars();
        if std::mem::discriminant(self) != std::mem::discriminant(src)
            || dst_vars.len() != src_vars.len()
        {
            return Err(Error::LayoutMismatch {
                dst: self.to_string(),
                src: src.to_string(),
            });
        }
        Ok((dst_vars, src_vars))
    }

    /// Copies `src` into this layout, component by component
    pub fn assign(&self, src: &ValueLayout) -> Result<Vec<IrInstruction>> {
        let (dst_vars, src_vars) = self.check_assign(src)?;
        Ok(dst_vars
            .iter()
            .zip(src_vars.iter())
            .map(|(d, s)| IrInstruction::assign(d, Expr::var(s)))
            .collect())
    }

    /// Copies `then_src` or `else_src` into this layout depending on `cond`
    pub fn assign_ite(
        &self,
        cond: &Expr,
        then_src: &ValueLayout,
        else_src: &ValueLayout,
    ) -> Result<Vec<IrInstruction>> {
        let (dst_vars, then_vars) = self.check_assign(then_src)?;
        let (_, else_vars) = self.check_assign(else_src)?;
        Ok(dst_vars
            .iter()
            .zip(then_vars.iter().zip(else_vars.iter()))
            .map(|(d, (t, e))| {
                IrInstruction::assign(d, Expr::ite(cond.clone(), Expr::var(t), Expr::var(e)))
            })
            .collect())
    }
}

fn composed_map(name: String, ctx: &mut CompileContext) -> Var {
    ctx.ensure_havoc_init(Var::new(name, Tag::composed_map()))
}

fn havoc_simple(value: &Var, ty: Option<&ValueType>) -> Vec<IrInstruction> {
    match ty.and_then(|t| t.bit_width()) {
        Some(width) => vec![IrInstruction::assign(
            value,
            Expr::narrow(Expr::Unconstrained(Tag::Int), Some(width.mask())),
        )],
        None => vec![IrInstruction::Havoc(value.clone())],
    }
}

impl fmt::Display for ValueLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.component_vars().iter().map(|v| v.name.clone()).collect();
        write!(f, "{}[{}]", self.kind_name(), names.join(", "))
    }
}

/// Layout of any memory-level variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// A reference
    Reference(RefLayout),
    /// A stored value
    Value(ValueLayout),
}

impl Layout {
    /// Layout of a memory-level variable
    pub fn from_var(var: &Var, ctx: &mut CompileContext) -> Result<Self> {
        if var.tag.is_reference() {
            Ok(Layout::Reference(RefLayout::from_var(var)?))
        } else {
            Ok(Layout::Value(ValueLayout::from_var(var, ctx)?))
        }
    }

    /// All core variables of this layout
    pub fn component_vars(&self) -> Vec<Var> {
        match self {
            Layout::Reference(r) => r.component_vars(),
            Layout::Value(v) => v.component_vars(),
        }
    }

    fn mismatch(&self, src: &Layout) -> Error {
        Error::LayoutMismatch {
            dst: format!("{:?}", self.component_vars()),
            src: format!("{:?}", src.component_vars()),
        }
    }

    /// Copies `src` into this layout
    pub fn assign(&self, src: &Layout) -> Result<Vec<IrInstruction>> {
        match (self, src) {
            (Layout::Value(d), Layout::Value(s)) => d.assign(s),
            (Layout::Reference(d), Layout::Reference(s)) => Ok(vec![
                IrInstruction::assign(&d.target_id, Expr::var(&s.target_id)),
                IrInstruction::assign(&d.offset, Expr::var(&s.offset)),
            ]),
            _ => Err(self.mismatch(src)),
        }
    }

    /// Copies one of two layouts into this layout depending on `cond`
    pub fn assign_ite(&self, cond: &Expr, t: &Layout, e: &Layout) -> Result<Vec<IrInstruction>> {
        match (self, t, e) {
            (Layout::Value(d), Layout::Value(t), Layout::Value(e)) => d.assign_ite(cond, t, e),
            (Layout::Reference(d), Layout::Reference(t), Layout::Reference(e)) => Ok(d
                .component_vars()
                .iter()
                .zip(t.component_vars().iter().zip(e.component_vars().iter()))
                .map(|(d, (t, e))| {
                    IrInstruction::assign(d, Expr::ite(cond.clone(), Expr::var(t), Expr::var(e)))
                })
                .collect()),
            _ if std::mem::discriminant(self) != std::mem::discriminant(t) => {
                Err(self.mismatch(t))
            }
            _ => Err(self.mismatch(e)),
        }
    }
}

impl RefTarget {
    /// Layout of the variable this target is rooted at
    pub fn base_layout(&self, ctx: &mut CompileContext) -> Result<ValueLayout> {
        ValueLayout::from_var(&self.loc, ctx)
    }

    /// Innermost layout reached by following the path from the base layout
    pub fn layout(&self, ctx: &mut CompileContext) -> Result<ValueLayout> {
        let mut layout = self.base_layout(ctx)?;
        for component in &self.path {
            layout = match (layout, component) {
                (ValueLayout::Struct { mut fields }, PathComponent::Field(i)) => {
                    if *i >= fields.len() {
                        return Err(Error::IndexOutOfRange {
                            index: *i,
                            len: fields.len(),
                            ty: self.loc.tag.to_string(),
                        });
                    }
                    fields.swap_remove(*i)
                }
                (ValueLayout::Enum { content, .. }, PathComponent::EnumField { .. })
                | (ValueLayout::Vector { content, .. }, PathComponent::VecElem)
                | (ValueLayout::GhostArray { content }, PathComponent::GhostArrayElem) => {
                    ValueLayout::Composed { map: content }
                }
                (composed @ ValueLayout::Composed { .. }, _) => composed,
                (other, component) => {
                    return Err(Error::layout_access(
                        format!("follow path component {}", component),
                        other.kind_name(),
                    ))
                }
            };
        }
        Ok(layout)
    }
}
