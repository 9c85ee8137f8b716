//! Call-trace values
//!
//! Each inlined call is bracketed by `FuncStart` / `FuncEnd` annotations carrying the
//! argument and return values. Structured values are unpacked into scalar temporaries first,
//! so every scalar that a counterexample viewer may want to display is a plain IR variable.

use crate::compiler::bytecode::Function;
use crate::compiler::context::CompileContext;
use crate::compiler::ir::{Annotation, Expr, IrInstruction, MemoryOp, Tag, Var};
use crate::types::{Composite, Type, ValueType};
use serde::{Deserialize, Serialize};

/// Displayable view of a value at a call boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceValue {
    /// Scalar held in one variable
    Primitive {
        /// Value type
        ty: ValueType,
        /// Holding variable
        var: Var,
    },
    /// Struct, field by field (empty for native structs)
    Struct {
        /// Field names and values
        fields: Vec<(String, TraceValue)>,
    },
    /// Vector length plus the first few slots of its storage
    ///
    /// Slots past `length` hold arbitrary values; viewers only show `length` of them.
    Vector {
        /// Length variable
        length: Var,
        /// Leading element slots
        elements: Vec<TraceValue>,
    },
    /// Enum, shown by its current variant index
    Enum {
        /// Variant index variable
        variant: Var,
    },
    /// Value seen through a reference
    Reference(Box<TraceValue>),
    /// Ghost arrays are sparse; no contents are shown
    GhostArray,
}

impl TraceValue {
    /// Visits every variable the value mentions
    pub fn for_each_var(&self, f: &mut dyn FnMut(&Var)) {
        match self {
            TraceValue::Primitive { var, .. } => f(var),
            TraceValue::Struct { fields } => fields.iter().for_each(|(_, v)| v.for_each_var(f)),
            TraceValue::Vector { length, elements } => {
                f(length);
                elements.iter().for_each(|e| e.for_each_var(f));
            }
            TraceValue::Enum { variant } => f(variant),
            TraceValue::Reference(inner) => inner.for_each_var(f),
            TraceValue::GhostArray => {}
        }
    }
}

/// Emits the unpacking code for trace values
struct TraceBuilder<'a> {
    ctx: &'a mut CompileContext,
    elem_count: usize,
    out: Vec<IrInstruction>,
}

impl<'a> TraceBuilder<'a> {
    fn value(&mut self, ty: &Type, var: &Var) -> TraceValue {
        match ty {
            Type::Reference(inner) => TraceValue::Reference(Box::new(self.deref_value(inner, var))),
            Type::Value(ty) if ty.is_simple() => TraceValue::Primitive {
                ty: ty.clone(),
                var: var.clone(),
            },
            Type::Value(ValueType::GhostArray(_)) => TraceValue::GhostArray,
            Type::Value(ty) => {
                let reference = self.ctx.tmp("traceRef", Type::Reference(ty.clone()).tag());
                self.out.push(IrInstruction::Memory(MemoryOp::BorrowLoc {
                    reference: reference.clone(),
                    loc: var.clone(),
                }));
                self.deref_value(ty, &reference)
            }
        }
    }

    fn deref_value(&mut self, ty: &ValueType, reference: &Var) -> TraceValue {
        match ty {
            ValueType::Struct(st) => {
                let fields = st.declared_fields().unwrap_or_default();
                let mut values = Vec::with_capacity(fields.len());
                for (i, field) in fields.iter().enumerate() {
                    let field_ref = self
                        .ctx
                        .tmp(&field.name, Type::Reference(field.ty.clone()).tag());
                    self.out.push(IrInstruction::Memory(MemoryOp::BorrowField {
                        dst_ref: field_ref.clone(),
                        src_ref: reference.clone(),
                        field: i,
                    }));
                    values.push((field.name.clone(), self.deref_value(&field.ty, &field_ref)));
                }
                TraceValue::Struct { fields: values }
            }
            ValueType::Vector(elem) => {
                let length = self.ctx.tmp("length", Tag::Bit256);
                self.out.push(IrInstruction::Memory(MemoryOp::VecLen {
                    dst: length.clone(),
                    reference: reference.clone(),
                }));
                let mut elements = Vec::with_capacity(self.elem_count);
                for i in 0..self.elem_count {
                    let index = self.ctx.tmp("index", Tag::Bit256);
                    let elem_ref = self
                        .ctx
                        .tmp(&format!("elem_{}", i), Type::Reference((**elem).clone()).tag());
                    self.out.push(IrInstruction::assign(&index, Expr::num(i)));
                    self.out.push(IrInstruction::Memory(MemoryOp::VecBorrow {
                        dst_ref: elem_ref.clone(),
                        src_ref: reference.clone(),
                        index,
                        bounds_check: false,
                    }));
                    elements.push(self.deref_value(elem, &elem_ref));
                }
                TraceValue::Vector { length, elements }
            }
            ValueType::Enum(_) => {
                let variant = self.ctx.tmp("variant", Tag::Bit256);
                self.out.push(IrInstruction::Memory(MemoryOp::VariantIndex {
                    index: variant.clone(),
                    reference: reference.clone(),
                }));
                TraceValue::Enum { variant }
            }
            ValueType::GhostArray(_) => TraceValue::GhostArray,
            _ => {
                let var = self.ctx.tmp("traceVal", ty.tag());
                self.out.push(IrInstruction::Memory(MemoryOp::ReadRef {
                    dst: var.clone(),
                    reference: reference.clone(),
                }));
                TraceValue::Primitive {
                    ty: ty.clone(),
                    var,
                }
            }
        }
    }
}

fn trace_values(
    ctx: &mut CompileContext,
    elem_count: usize,
    types: &[Type],
    vars: &[Var],
) -> (Vec<IrInstruction>, Vec<TraceValue>) {
    let mut builder = TraceBuilder {
        ctx,
        elem_count,
        out: Vec::new(),
    };
    let values = types
        .iter()
        .zip(vars)
        .map(|(ty, var)| builder.value(ty, var))
        .collect();
    (builder.out, values)
}

/// Code and annotation marking entry into `function` with `args`
pub fn annotate_func_start(
    ctx: &mut CompileContext,
    call_id: u32,
    function: &Function,
    args: &[Var],
    elem_count: usize,
) -> Vec<IrInstruction> {
    let (mut out, values) = trace_values(ctx, elem_count, &function.params, args);
    out.push(IrInstruction::Annotation(Annotation::FuncStart {
        call_id,
        name: function.id.to_string(),
        params: function.params.clone(),
        return_types: function.returns.clone(),
        args: values,
    }));
    out
}

/// Code and annotation marking the return from `function` with `returns`
pub fn annotate_func_end(
    ctx: &mut CompileContext,
    call_id: u32,
    function: &Function,
    returns: &[Var],
    elem_count: usize,
) -> Vec<IrInstruction> {
    let (mut out, values) = trace_values(ctx, elem_count, &function.returns, returns);
    out.push(IrInstruction::Annotation(Annotation::FuncEnd {
        call_id,
        name: function.id.to_string(),
        returns: values,
    }));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::FunctionId;
    use crate::types::{Field, ModuleName, QualifiedName};

    fn function(params: Vec<Type>) -> Function {
        Function::native(
            FunctionId::simple(QualifiedName::new(ModuleName::new(1u8, "m"), "f")),
            params,
            vec![],
        )
    }

    #[test]
    fn test_primitive_args_need_no_code() {
        let mut ctx = CompileContext::new();
        let x = Var::new("x", Tag::Bit256);
        let out = annotate_func_start(&mut ctx, 0, &function(vec![ValueType::U64.into()]), &[x.clone()], 4);
        assert_eq!(out.len(), 1);
        match &out[0] {
            IrInstruction::Annotation(Annotation::FuncStart { args, .. }) => {
                assert_eq!(
                    args,
                    &vec![TraceValue::Primitive {
                        ty: ValueType::U64,
                        var: x
                    }]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_vector_trace_reads_leading_slots() {
        let mut ctx = CompileContext::new();
        let ty = ValueType::vector(ValueType::U8);
        let v = Var::new("v", ty.tag());
        let out = annotate_func_start(&mut ctx, 0, &function(vec![ty.into()]), &[v], 3);

        let borrows: Vec<_> = out
            .iter()
            .filter_map(|i| match i {
                IrInstruction::Memory(MemoryOp::VecBorrow { bounds_check, .. }) => Some(*bounds_check),
                _ => None,
            })
            .collect();
        assert_eq!(borrows, vec![false, false, false]);

        let mut vars = Vec::new();
        if let Some(IrInstruction::Annotation(a)) = out.last() {
            a.for_each_var(&mut |v: &Var| vars.push(v.clone()));
        }
        // length plus three element reads
        assert_eq!(vars.len(), 4);
        assert!(vars.iter().all(|v| !v.tag.is_move()));
    }

    #[test]
    fn test_struct_reference_trace() {
        let mut ctx = CompileContext::new();
        let st = ValueType::structure(
            QualifiedName::new(ModuleName::new(1u8, "m"), "S"),
            vec![],
            Some(vec![
                Field::new("a", ValueType::Bool),
                Field::new("g", ValueType::ghost_array(ValueType::U8)),
            ]),
        );
        let r = Var::new("r", Type::Reference(st.clone()).tag());
        let out = annotate_func_end(
            &mut ctx,
            7,
            &Function::native(
                FunctionId::simple(QualifiedName::new(ModuleName::new(1u8, "m"), "g")),
                vec![],
                vec![Type::Reference(st)],
            ),
            &[r],
            4,
        );
        match out.last() {
            Some(IrInstruction::Annotation(Annotation::FuncEnd { call_id, returns, .. })) => {
                assert_eq!(*call_id, 7);
                match &returns[0] {
                    TraceValue::Reference(inner) => match inner.as_ref() {
                        TraceValue::Struct { fields } => {
                            assert_eq!(fields.len(), 2);
                            assert_eq!(fields[1].1, TraceValue::GhostArray);
                        }
                        other => panic!("unexpected {:?}", other),
                    },
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
