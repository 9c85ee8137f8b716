//! # Memory Locations
//!
//! A [`MemoryLocation`] is a layout plus a symbolic offset into it. Navigation (fields, vector
//! elements, enum content) is pure offset arithmetic once a composed layout is reached:
//!
//! ```text
//! vector<Point> v, composed at offset o
//!
//!   o+0      o+1      o+2   o+3   o+4   o+5   ...
//! +--------+--------+-----+-----+-----+-----+----
//! | length | digest | x0  | y0  | x1  | y1  | ...
//! +--------+--------+-----+-----+-----+-----+----
//!
//! elem(i).field(f) = o + 2 + i * size(Point) + field_offset(f)
//! ```
//!
//! Every location also remembers the variable it was derived from and the access path taken,
//! which is what [`MemoryLocation::invalidate_vector_digests`] walks after a write.

use super::layout::{RefLayout, ValueLayout};
use crate::compiler::alias::{PathComponent, RefTarget};
use crate::compiler::context::CompileContext;
use crate::compiler::ir::{Expr, IrInstruction, Tag, Var};
use crate::types::{
    BitWidth, Composite, EnumType, Type, ValueType, Variant, ENUM_CONTENT_OFFSET,
    ENUM_VARIANT_OFFSET, VEC_CONTENT_OFFSET, VEC_DIGEST_OFFSET, VEC_LENGTH_OFFSET,
};
use crate::{Error, Result};
use num_bigint::BigUint;

/// Converts a composed-map slot to a value of simple type `ty`
pub fn from_int(ty: &ValueType, value: Expr) -> Result<Expr> {
    match ty {
        ValueType::Bool => Ok(Expr::neq(value, Expr::zero())),
        ValueType::MathInt => Ok(value),
        other => match other.bit_width() {
            Some(width) => Ok(Expr::narrow(value, Some(width.mask()))),
            None => Err(Error::type_mismatch("composed read", "simple type", other)),
        },
    }
}

/// Converts a simple value to its composed-map slot representation
pub fn to_int(ty: &ValueType, value: Expr) -> Expr {
    match ty {
        ValueType::Bool => Expr::ite(value, Expr::num(1u8), Expr::zero()),
        _ => value,
    }
}

/// A place in memory, in core IR terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLocation {
    /// Layout holding this location
    pub layout: ValueLayout,
    /// Memory-level variable the location was derived from
    pub orig_loc: Var,
    /// Layout of `orig_loc`
    pub base_layout: ValueLayout,
    /// Access path from `orig_loc`, root first
    pub path: Vec<PathComponent>,
    /// Offset within `layout` (meaningful for composed layouts)
    pub offset: Expr,
}

impl MemoryLocation {
    /// Location of a whole layout
    pub fn base(layout: ValueLayout, orig_loc: Var) -> Self {
        Self {
            base_layout: layout.clone(),
            layout,
            orig_loc,
            path: vec![],
            offset: Expr::zero(),
        }
    }

    /// Location of a top-level memory-level variable
    pub fn of_var(var: &Var, ctx: &mut CompileContext) -> Result<Self> {
        Ok(Self::base(ValueLayout::from_var(var, ctx)?, var.clone()))
    }

    /// Location referenced by `target`, addressed through the reference layout `reference`
    pub fn of_target(
        target: &RefTarget,
        reference: &RefLayout,
        ctx: &mut CompileContext,
    ) -> Result<Self> {
        Ok(Self {
            layout: target.layout(ctx)?,
            orig_loc: target.loc.clone(),
            base_layout: target.base_layout(ctx)?,
            path: target.path.clone(),
            offset: Expr::var(&reference.offset),
        })
    }

    /// Alias target this location denotes
    pub fn target(&self) -> RefTarget {
        RefTarget {
            loc: self.orig_loc.clone(),
            path: self.path.clone(),
        }
    }

    fn with(&self, layout: ValueLayout, component: Option<PathComponent>, offset: Expr) -> Self {
        let mut path = self.path.clone();
        path.extend(component);
        Self {
            layout,
            orig_loc: self.orig_loc.clone(),
            base_layout: self.base_layout.clone(),
            path,
            offset,
        }
    }

    fn invalid(&self, operation: &str) -> Error {
        Error::layout_access(operation, self.layout.kind_name())
    }

    fn slot(&self, map: &Var, relative: u32) -> Expr {
        Expr::select(
            Expr::var(map),
            Expr::int_add(self.offset.clone(), Expr::num(relative)),
        )
    }

    fn store_slot(&self, map: &Var, relative: u32, value: Expr) -> IrInstruction {
        IrInstruction::assign(
            map,
            Expr::store(
                Expr::var(map),
                Expr::int_add(self.offset.clone(), Expr::num(relative)),
                value,
            ),
        )
    }

    // Simple values

    /// Reads the simple value stored here
    pub fn simple_value(&self, ty: &ValueType) -> Result<Expr> {
        match &self.layout {
            ValueLayout::Simple { value, .. } => Ok(Expr::var(value)),
            ValueLayout::Composed { map } => {
                from_int(ty, Expr::select(Expr::var(map), self.offset.clone()))
            }
            _ => Err(self.invalid("read a simple value")),
        }
    }

    /// Writes a simple value here
    pub fn set_simple_value(&self, value: Expr, ty: &ValueType) -> Result<Vec<IrInstruction>> {
        match &self.layout {
            ValueLayout::Simple { value: dst, .. } => Ok(vec![IrInstruction::assign(dst, value)]),
            ValueLayout::Composed { map } => Ok(vec![IrInstruction::assign(
                map,
                Expr::store(Expr::var(map), self.offset.clone(), to_int(ty, value)),
            )]),
            _ => Err(self.invalid("write a simple value")),
        }
    }

    // Structs and enums

    /// Location of field `index` of a struct stored here
    pub fn struct_field(&self, ty: &ValueType, index: usize) -> Result<Self> {
        let st = ty
            .as_struct()
            .ok_or_else(|| Error::type_mismatch("field access", "struct", ty))?;
        st.field(index, "access a field of")?;
        match &self.layout {
            ValueLayout::Struct { fields } => {
                let field = fields.get(index).cloned().ok_or_else(|| Error::IndexOutOfRange {
                    index,
                    len: fields.len(),
                    ty: ty.to_string(),
                })?;
                Ok(self.with(field, Some(PathComponent::Field(index)), self.offset.clone()))
            }
            ValueLayout::Composed { .. } => Ok(self.with(
                self.layout.clone(),
                Some(PathComponent::Field(index)),
                Expr::int_add(self.offset.clone(), Expr::Num(st.field_offset(index)?)),
            )),
            _ => Err(self.invalid("access a struct field")),
        }
    }

    /// Location of field `index` of variant `variant` of an enum stored here
    pub fn variant_field(&self, variant: &Variant, index: usize) -> Result<Self> {
        variant.field(index, "access a field of")?;
        let component = PathComponent::EnumField {
            variant: variant.index,
            field: index,
        };
        let field_offset = Expr::Num(variant.field_offset(index)?);
        match &self.layout {
            ValueLayout::Enum { content, .. } => Ok(self.with(
                ValueLayout::Composed {
                    map: content.clone(),
                },
                Some(component),
                field_offset,
            )),
            ValueLayout::Composed { .. } => Ok(self.with(
                self.layout.clone(),
                Some(component),
                Expr::int_add(
                    Expr::int_add(self.offset.clone(), Expr::num(ENUM_CONTENT_OFFSET)),
                    field_offset,
                ),
            )),
            _ => Err(self.invalid("access an enum field")),
        }
    }

    /// Variant index of the enum stored here
    pub fn enum_variant(&self, ty: &EnumType) -> Result<Expr> {
        match &self.layout {
            ValueLayout::Enum { variant, .. } => Ok(Expr::var(variant)),
            ValueLayout::Composed { map } => Ok(Expr::narrow(
                self.slot(map, ENUM_VARIANT_OFFSET),
                Some(BigUint::from(ty.last_variant_index()?)),
            )),
            _ => Err(self.invalid("read an enum variant")),
        }
    }

    /// Sets the variant index of the enum stored here
    pub fn set_enum_variant(&self, value: Expr) -> Result<Vec<IrInstruction>> {
        match &self.layout {
            ValueLayout::Enum { variant, .. } => Ok(vec![IrInstruction::assign(variant, value)]),
            ValueLayout::Composed { map } => {
                Ok(vec![self.store_slot(map, ENUM_VARIANT_OFFSET, value)])
            }
            _ => Err(self.invalid("write an enum variant")),
        }
    }

    fn enum_content(&self) -> Result<Self> {
        match &self.layout {
            ValueLayout::Enum { content, .. } => Ok(self.with(
                ValueLayout::Composed {
                    map: content.clone(),
                },
                None,
                Expr::zero(),
            )),
            ValueLayout::Composed { .. } => Ok(self.with(
                self.layout.clone(),
                None,
                Expr::int_add(self.offset.clone(), Expr::num(ENUM_CONTENT_OFFSET)),
            )),
            _ => Err(self.invalid("access enum content")),
        }
    }

    // Vectors and ghost arrays

    /// Length of the vector stored here, bounded by u64::MAX
    pub fn vec_len(&self) -> Result<Expr> {
        let raw = match &self.layout {
            ValueLayout::Vector { length, .. } => Expr::var(length),
            ValueLayout::Composed { map } => self.slot(map, VEC_LENGTH_OFFSET),
            _ => return Err(self.invalid("read a vector length")),
        };
        Ok(Expr::narrow(raw, Some(BitWidth::W64.mask())))
    }

    /// Sets the length of the vector stored here
    pub fn set_vec_len(&self, value: Expr) -> Result<Vec<IrInstruction>> {
        match &self.layout {
            ValueLayout::Vector { length, .. } => Ok(vec![IrInstruction::assign(length, value)]),
            ValueLayout::Composed { map } => Ok(vec![self.store_slot(map, VEC_LENGTH_OFFSET, value)]),
            _ => Err(self.invalid("write a vector length")),
        }
    }

    /// Digest of the vector stored here
    pub fn vec_digest(&self) -> Result<Expr> {
        let raw = match &self.layout {
            ValueLayout::Vector { digest, .. } => Expr::var(digest),
            ValueLayout::Composed { map } => self.slot(map, VEC_DIGEST_OFFSET),
            _ => return Err(self.invalid("read a vector digest")),
        };
        Ok(Expr::narrow(raw, None))
    }

    /// Sets the digest of the vector stored here
    pub fn set_vec_digest(&self, value: Expr) -> Result<Vec<IrInstruction>> {
        match &self.layout {
            ValueLayout::Vector { digest, .. } => Ok(vec![IrInstruction::assign(digest, value)]),
            ValueLayout::Composed { map } => Ok(vec![self.store_slot(map, VEC_DIGEST_OFFSET, value)]),
            _ => Err(self.invalid("write a vector digest")),
        }
    }

    fn vec_content(&self) -> Result<Self> {
        match &self.layout {
            ValueLayout::Vector { content, .. } => Ok(self.with(
                ValueLayout::Composed {
                    map: content.clone(),
                },
                Some(PathComponent::VecElem),
                Expr::zero(),
            )),
            ValueLayout::Composed { .. } => Ok(self.with(
                self.layout.clone(),
                Some(PathComponent::VecElem),
                Expr::int_add(self.offset.clone(), Expr::num(VEC_CONTENT_OFFSET)),
            )),
            _ => Err(self.invalid("access vector content")),
        }
    }

    fn ghost_array_content(&self) -> Result<Self> {
        match &self.layout {
            ValueLayout::GhostArray { content } => Ok(self.with(
                ValueLayout::Composed {
                    map: content.clone(),
                },
                None,
                Expr::zero(),
            )),
            ValueLayout::Composed { .. } => Ok(self.clone()),
            _ => Err(self.invalid("access ghost array content")),
        }
    }

    /// Location of element `index` of the vector or ghost array stored here
    pub fn element(&self, ty: &ValueType, index: Expr) -> Result<Self> {
        let (elem, component, header) = match ty {
            ValueType::Vector(elem) => (elem, PathComponent::VecElem, VEC_CONTENT_OFFSET),
            ValueType::GhostArray(elem) => (elem, PathComponent::GhostArrayElem, 0),
            other => {
                return Err(Error::type_mismatch(
                    "element access",
                    "vector or ghost array",
                    other,
                ))
            }
        };
        let scaled = Expr::int_mul(index, Expr::Num(elem.size()?));
        match (&self.layout, ty) {
            (ValueLayout::Vector { content, .. }, ValueType::Vector(_))
            | (ValueLayout::GhostArray { content }, ValueType::GhostArray(_)) => Ok(self.with(
                ValueLayout::Composed {
                    map: content.clone(),
                },
                Some(component),
                scaled,
            )),
            (ValueLayout::Composed { .. }, _) => Ok(self.with(
                self.layout.clone(),
                Some(component),
                Expr::int_add(
                    Expr::int_add(self.offset.clone(), Expr::num(header)),
                    scaled,
                ),
            )),
            _ => Err(self.invalid("access an element")),
        }
    }

    // Whole-value copies

    /// Copies a `size`-slot region from `src` to here; both must be composed
    fn assign_composed(
        &self,
        src: &MemoryLocation,
        size: BigUint,
        ctx: &mut CompileContext,
    ) -> Result<Vec<IrInstruction>> {
        let (dst_map, src_map) = match (self.layout.as_composed(), src.layout.as_composed()) {
            (Some(d), Some(s)) => (d, s),
            _ => {
                return Err(Error::LayoutMismatch {
                    dst: self.layout.to_string(),
                    src: src.layout.to_string(),
                })
            }
        };
        let i = ctx.tmp("i", Tag::Int);
        let outside = Expr::or(vec![
            Expr::lt(Expr::var(&i), self.offset.clone()),
            Expr::ge(
                Expr::var(&i),
                Expr::int_add(self.offset.clone(), Expr::Num(size)),
            ),
        ]);
        let body = Expr::ite(
            outside,
            Expr::select(Expr::var(dst_map), Expr::var(&i)),
            Expr::select(
                Expr::var(src_map),
                Expr::int_add(
                    Expr::int_sub(Expr::var(&i), self.offset.clone()),
                    src.offset.clone(),
                ),
            ),
        );
        Ok(vec![IrInstruction::assign(
            dst_map,
            Expr::MapDefinition {
                param: i,
                body: Box::new(body),
            },
        )])
    }

    /// Copies the value of type `ty` at `src` to here
    pub fn assign(
        &self,
        src: &MemoryLocation,
        ty: &ValueType,
        ctx: &mut CompileContext,
    ) -> Result<Vec<IrInstruction>> {
        if self.layout.as_composed().is_some() && src.layout.as_composed().is_some() {
            return self.assign_composed(src, ty.size()?, ctx);
        }
        match ty {
            ValueType::Bool
            | ValueType::Bits(_)
            | ValueType::Address
            | ValueType::Signer
            | ValueType::MathInt => self.set_simple_value(src.simple_value(ty)?, ty),
            ValueType::Struct(st) => {
                let mut out = Vec::new();
                for (i, field) in st.declared_fields().unwrap_or_default().iter().enumerate() {
                    let dst = self.struct_field(ty, i)?;
                    let from = src.struct_field(ty, i)?;
                    out.extend(dst.assign(&from, &field.ty, ctx)?);
                }
                Ok(out)
            }
            ValueType::Enum(e) => {
                let mut out = self.set_enum_variant(src.enum_variant(e)?)?;
                out.extend(self.enum_content()?.assign_composed(
                    &src.enum_content()?,
                    e.content_size()?,
                    ctx,
                )?);
                Ok(out)
            }
            ValueType::Vector(_) => {
                let mut out = self.set_vec_len(src.vec_len()?)?;
                out.extend(self.set_vec_digest(src.vec_digest()?)?);
                out.extend(self.vec_content()?.assign_composed(
                    &src.vec_content()?,
                    ty.content_size()?,
                    ctx,
                )?);
                Ok(out)
            }
            ValueType::GhostArray(_) => self.ghost_array_content()?.assign_composed(
                &src.ghost_array_content()?,
                ty.content_size()?,
                ctx,
            ),
        }
    }

    /// Havocs the digest of every vector enclosing this location
    ///
    /// Walks the access path from the base variable; before each step, a vector at the current
    /// position has its digest set to an unconstrained value. Element indices along the way are
    /// recovered from this location's final offset.
    pub fn invalidate_vector_digests(&self, ctx: &mut CompileContext) -> Result<Vec<IrInstruction>> {
        let mut current_ty = match self.orig_loc.move_type() {
            Some(Type::Value(
                ty @ (ValueType::Vector(_)
                | ValueType::GhostArray(_)
                | ValueType::Struct(_)
                | ValueType::Enum(_)),
            )) => ty.clone(),
            Some(Type::Reference(_)) => {
                return Err(Error::type_mismatch(
                    "digest invalidation",
                    "value location",
                    &self.orig_loc.tag,
                ))
            }
            _ => return Ok(vec![]),
        };

        let mut out = Vec::new();
        let mut current = MemoryLocation::base(self.base_layout.clone(), self.orig_loc.clone());

        for component in &self.path {
            if current_ty.as_vector().is_some() {
                out.extend(current.set_vec_digest(Expr::Unconstrained(Tag::Bit256))?);
            }
            let (next, next_ty) = match (component, &current_ty) {
                (PathComponent::Field(i), ValueType::Struct(st)) => {
                    let field_ty = st.field(*i, "access a field of")?.ty.clone();
                    (current.struct_field(&current_ty, *i)?, field_ty)
                }
                (PathComponent::EnumField { variant, field }, ValueType::Enum(e)) => {
                    let v = e.variant(*variant)?;
                    let field_ty = v.field(*field, "access a field of")?.ty.clone();
                    (current.variant_field(v, *field)?, field_ty)
                }
                (PathComponent::VecElem, ValueType::Vector(elem)) => {
                    let elem_size = Expr::Num(elem.size()?);
                    let index = match &current.layout {
                        ValueLayout::Vector { .. } => Expr::int_div(self.offset.clone(), elem_size),
                        ValueLayout::Composed { .. } => Expr::int_div(
                            Expr::int_sub(
                                Expr::int_sub(self.offset.clone(), Expr::num(VEC_CONTENT_OFFSET)),
                                current.offset.clone(),
                            ),
                            elem_size,
                        ),
                        _ => return Err(current.invalid("access a vector element")),
                    };
                    (current.element(&current_ty, index)?, (**elem).clone())
                }
                (PathComponent::GhostArrayElem, ValueType::GhostArray(elem)) => {
                    let index = Expr::int_div(self.offset.clone(), Expr::Num(elem.size()?));
                    (current.element(&current_ty, index)?, (**elem).clone())
                }
                (component, ty) => {
                    return Err(Error::type_mismatch(
                        format!("path component {}", component),
                        "matching container",
                        ty,
                    ))
                }
            };
            current = next;
            current_ty = next_ty;

            if !current.offset.is_atomic() {
                let stash = ctx.tmp("offset", Tag::Int);
                out.push(IrInstruction::assign(&stash, current.offset.clone()));
                current.offset = Expr::var(&stash);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, ModuleName, QualifiedName};

    fn point() -> ValueType {
        ValueType::structure(
            QualifiedName::new(ModuleName::new(1u8, "m"), "Point"),
            vec![],
            Some(vec![
                Field::new("x", ValueType::U64),
                Field::new("y", ValueType::U64),
            ]),
        )
    }

    #[test]
    fn test_composed_element_field_offset() {
        let mut ctx = CompileContext::new();
        let vec_ty = ValueType::vector(point());
        let outer = Var::new("w", ValueType::vector(vec_ty.clone()).tag());
        let base = MemoryLocation::of_var(&outer, &mut ctx).unwrap();

        // w[0] is composed at offset 0; w[0][1].y = 0 + 2 + 1*2 + 1 = 5
        let inner = base.element(&ValueType::vector(vec_ty.clone()), Expr::zero()).unwrap();
        assert_eq!(inner.offset, Expr::zero());
        let elem = inner.element(&vec_ty, Expr::num(1u8)).unwrap();
        let y = elem.struct_field(&point(), 1).unwrap();
        assert_eq!(y.offset, Expr::num(5u8));
        assert_eq!(
            y.path,
            vec![
                PathComponent::VecElem,
                PathComponent::VecElem,
                PathComponent::Field(1)
            ]
        );
    }

    #[test]
    fn test_decomposed_struct_field() {
        let mut ctx = CompileContext::new();
        let p = Var::new("p", point().tag());
        let loc = MemoryLocation::of_var(&p, &mut ctx).unwrap();
        let y = loc.struct_field(&point(), 1).unwrap();
        assert_eq!(
            y.simple_value(&ValueType::U64).unwrap(),
            Expr::Var(Var::new("p.y!value", Tag::Bit256))
        );
    }

    #[test]
    fn test_bool_round_trips_through_int() {
        let v = Var::new("b", Tag::Bool);
        let stored = to_int(&ValueType::Bool, Expr::var(&v));
        assert!(matches!(stored, Expr::Ite(..)));
        let read = from_int(&ValueType::Bool, Expr::var(&v)).unwrap();
        assert!(matches!(read, Expr::Not(_)));
    }

    #[test]
    fn test_simple_value_on_vector_fails() {
        let mut ctx = CompileContext::new();
        let v = Var::new("v", ValueType::vector(ValueType::U8).tag());
        let loc = MemoryLocation::of_var(&v, &mut ctx).unwrap();
        assert!(matches!(
            loc.simple_value(&ValueType::U8),
            Err(Error::InvalidLayoutAccess { .. })
        ));
    }

    #[test]
    fn test_vector_copy_between_decomposed_layouts() {
        let mut ctx = CompileContext::new();
        let ty = ValueType::vector(ValueType::U64);
        let a = MemoryLocation::of_var(&Var::new("a", ty.tag()), &mut ctx).unwrap();
        let b = MemoryLocation::of_var(&Var::new("b", ty.tag()), &mut ctx).unwrap();
        let code = a.assign(&b, &ty, &mut ctx).unwrap();
        // length, digest, content
        assert_eq!(code.len(), 3);
        assert!(matches!(
            &code[2],
            IrInstruction::Assign { expr: Expr::MapDefinition { .. }, .. }
        ));
    }

    #[test]
    fn test_invalidation_on_decomposed_vector() {
        let mut ctx = CompileContext::new();
        let ty = ValueType::vector(point());
        let v = Var::new("v", ty.tag());
        let r = RefLayout::new("r");
        let target = RefTarget::root(v)
            .child(PathComponent::VecElem)
            .child(PathComponent::Field(1));
        let loc = MemoryLocation::of_target(&target, &r, &mut ctx).unwrap();
        let code = loc.invalidate_vector_digests(&mut ctx).unwrap();
        let digests = code
            .iter()
            .filter(|i| matches!(i, IrInstruction::Assign { dst, .. } if dst.name == "v!digest"))
            .count();
        assert_eq!(digests, 1);
    }

    #[test]
    fn test_invalidation_reaches_every_enclosing_vector() {
        let mut ctx = CompileContext::new();
        let inner = ValueType::vector(point());
        let w = Var::new("w", ValueType::vector(inner).tag());
        let r = RefLayout::new("r");
        let target = RefTarget::root(w)
            .child(PathComponent::VecElem)
            .child(PathComponent::VecElem)
            .child(PathComponent::Field(1));
        let loc = MemoryLocation::of_target(&target, &r, &mut ctx).unwrap();
        let code = loc.invalidate_vector_digests(&mut ctx).unwrap();

        // outer digest is a scalar; the inner one lives in w!content
        let writes: Vec<&str> = code
            .iter()
            .filter_map(|i| match i {
                IrInstruction::Assign { dst, .. } if !dst.name.starts_with("tmp!") => {
                    Some(dst.name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec!["w!digest", "w!content"]);
    }

    #[test]
    fn test_no_invalidation_for_scalars() {
        let mut ctx = CompileContext::new();
        let x = Var::new("x", Tag::Bit256);
        let loc = MemoryLocation::of_var(&x, &mut ctx).unwrap();
        assert!(loc.invalidate_vector_digests(&mut ctx).unwrap().is_empty());
    }
}
