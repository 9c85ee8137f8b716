//! Property-based tests for layout offsets and the stack simulation
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Field offsets are prefix sums of field sizes
//! 2. Straight-line stack code compiles to IR that computes what the bytecode computes
//! 3. Checked arithmetic traps exactly when the native operation would overflow

use movetac::compiler::ir::interpreter::{FixedHavoc, Interpreter, Outcome, ZeroHavoc};
use movetac::compiler::{Bytecode, Code, CompileOptions, Compiler, Function, FunctionId, Scene};
use movetac::types::{BitWidth, Composite, Field, ModuleName, QualifiedName, ValueType};
use num_bigint::{BigInt, BigUint};
use proptest::prelude::*;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

fn name(n: &str) -> QualifiedName {
    QualifiedName::new(ModuleName::new(2u8, "prop"), n)
}

/// Scalars, and structs of them nested up to two levels
fn field_type() -> impl Strategy<Value = ValueType> {
    let leaf = prop_oneof![
        Just(ValueType::Bool),
        Just(ValueType::U8),
        Just(ValueType::U64),
        Just(ValueType::U256),
        Just(ValueType::Address),
    ];
    leaf.prop_recursive(2, 8, 3, |inner| {
        prop::collection::vec(inner, 1..4).prop_map(|types| {
            let fields = types
                .into_iter()
                .enumerate()
                .map(|(i, ty)| Field::new(format!("f{}", i), ty))
                .collect();
            ValueType::structure(name("Inner"), vec![], Some(fields))
        })
    })
}

fn scalar_count(ty: &ValueType) -> u64 {
    match ty.as_struct().and_then(|s| s.declared_fields()) {
        Some(fields) => fields.iter().map(|f| scalar_count(&f.ty)).sum(),
        None => 1,
    }
}

fn entry(code: Vec<Bytecode>, params: usize) -> (Scene, FunctionId) {
    let id = FunctionId::simple(name("f"));
    let f = Function::new(
        id.clone(),
        vec![ValueType::U64.into(); params],
        vec![ValueType::U64.into()],
        Code::new(vec![], code),
    );
    (Scene::from_functions([f]), id)
}

// =============================================================================
// OFFSET ALGEBRA
// =============================================================================

proptest! {
    #[test]
    fn field_offsets_are_prefix_sums(types in prop::collection::vec(field_type(), 1..6)) {
        let fields: Vec<Field> = types
            .iter()
            .enumerate()
            .map(|(i, ty)| Field::new(format!("g{}", i), ty.clone()))
            .collect();
        let outer = ValueType::structure(name("Outer"), vec![], Some(fields));
        let st = outer.as_struct().unwrap();

        let mut expected = BigUint::from(0u8);
        for (i, ty) in types.iter().enumerate() {
            prop_assert_eq!(st.field_offset(i).unwrap(), expected.clone());
            expected += ty.size().unwrap();
        }
        prop_assert_eq!(st.composite_size().unwrap(), expected.clone());
        prop_assert_eq!(outer.size().unwrap(), expected);
    }

    #[test]
    fn struct_size_counts_scalar_leaves(ty in field_type()) {
        prop_assert_eq!(ty.size().unwrap(), BigUint::from(scalar_count(&ty)));
    }

    #[test]
    fn mask_is_all_ones(w in prop::sample::select(BitWidth::ALL.to_vec())) {
        let mask = w.mask();
        prop_assert_eq!(mask.bits(), u64::from(w.bits()));
        prop_assert_eq!(mask + BigUint::from(1u8), BigUint::from(1u8) << w.bits());
    }
}

// =============================================================================
// STACK DISCIPLINE
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Pushes every constant, then folds them with `Add`
    #[test]
    fn summing_constants(values in prop::collection::vec(0u64..1_000_000, 1..12)) {
        let mut code: Vec<Bytecode> = values.iter().map(|v| Bytecode::LdU64(*v)).collect();
        code.extend(std::iter::repeat(Bytecode::Add).take(values.len() - 1));
        code.push(Bytecode::Ret);
        let (scene, id) = entry(code, 0);

        let result = Compiler::new(&scene, CompileOptions::default()).compile(&id).unwrap();
        let run = Interpreter::new(&result.program, ZeroHavoc).run().unwrap();
        prop_assert_eq!(&run.outcome, &Outcome::Completed);
        let got = run.value("x2$prop$f_ret_0").and_then(|v| v.as_num()).cloned().unwrap();
        prop_assert_eq!(got, BigInt::from(values.iter().sum::<u64>()));
    }

    /// Stores every argument into a fresh slot in reverse, then reloads the first one
    #[test]
    fn locals_survive_reordering(args in prop::collection::vec(any::<u64>(), 1..8)) {
        let n = args.len();
        let mut code = Vec::new();
        for i in 0..n {
            code.push(Bytecode::CopyLoc(i));
        }
        for i in 0..n {
            code.push(Bytecode::StLoc(i));
        }
        code.push(Bytecode::CopyLoc(n - 1));
        code.push(Bytecode::Ret);
        let (scene, id) = entry(code, n);

        let result = Compiler::new(&scene, CompileOptions::default()).compile(&id).unwrap();
        let mut havoc = FixedHavoc::new(ZeroHavoc);
        for (i, v) in args.iter().enumerate() {
            havoc = havoc.with(format!("x2$prop$f_arg_{}", i), *v);
        }
        let run = Interpreter::new(&result.program, havoc).run().unwrap();
        prop_assert_eq!(&run.outcome, &Outcome::Completed);
        let got = run.value("x2$prop$f_ret_0").and_then(|v| v.as_num()).cloned().unwrap();
        // Last StLoc wrote the bottom of the stack (args[0]) into the last local
        prop_assert_eq!(got, BigInt::from(args[0]));
    }
}

// =============================================================================
// CHECKED ARITHMETIC
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn checked_ops_match_native(
        a in any::<u64>(),
        b in any::<u64>(),
        op in prop::sample::select(vec!["add", "sub", "mul", "div", "mod"]),
    ) {
        let (bytecode, native): (Bytecode, Option<u64>) = match op {
            "add" => (Bytecode::Add, a.checked_add(b)),
            "sub" => (Bytecode::Sub, a.checked_sub(b)),
            "mul" => (Bytecode::Mul, a.checked_mul(b)),
            "div" => (Bytecode::Div, a.checked_div(b)),
            _ => (Bytecode::Mod, a.checked_rem(b)),
        };
        let (scene, id) = entry(
            vec![Bytecode::CopyLoc(0), Bytecode::CopyLoc(1), bytecode, Bytecode::Ret],
            2,
        );
        let result = Compiler::new(&scene, CompileOptions::default()).compile(&id).unwrap();
        let havoc = FixedHavoc::new(ZeroHavoc)
            .with("x2$prop$f_arg_0", a)
            .with("x2$prop$f_arg_1", b);
        let run = Interpreter::new(&result.program, havoc).run().unwrap();

        match native {
            Some(expected) => {
                prop_assert_eq!(&run.outcome, &Outcome::Completed);
                let got = run.value("x2$prop$f_ret_0").and_then(|v| v.as_num()).cloned().unwrap();
                prop_assert_eq!(got, BigInt::from(expected));
            }
            None => {
                let violated = matches!(run.outcome, Outcome::Violated { .. });
                prop_assert!(violated, "{} {} {} should trap", a, op, b);
            }
        }
    }
}
