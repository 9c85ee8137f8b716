//! End-to-end compiler tests
//!
//! Each test builds a small scene, compiles an entry function down to core IR and runs the
//! result on the concrete interpreter: Bytecode → IrGenerator → lowering → Interpreter.

use movetac::compiler::ir::interpreter::{Execution, FixedHavoc, Interpreter, Outcome, ZeroHavoc};
use movetac::compiler::{
    format_program, Bytecode, Code, CompileOptions, CompileResult, Compiler, Function, FunctionId,
    NativeSummary, Scene,
};
use movetac::types::{Field, ModuleName, QualifiedName, Type, ValueType, Variant};

// =============================================================================
// HELPERS
// =============================================================================

fn id(name: &str) -> FunctionId {
    FunctionId::simple(QualifiedName::new(ModuleName::new(1u8, "m"), name))
}

fn arg(name: &str, i: usize) -> String {
    format!("x1$m${}_arg_{}", name, i)
}

fn ret(name: &str, i: usize) -> String {
    format!("x1$m${}_ret_{}", name, i)
}

fn val(ty: ValueType) -> Type {
    ty.into()
}

fn compile(scene: &Scene, entry: &str) -> CompileResult {
    compile_with(scene, entry, CompileOptions::default())
}

fn compile_with(scene: &Scene, entry: &str, options: CompileOptions) -> CompileResult {
    Compiler::new(scene, options).compile(&id(entry)).unwrap()
}

fn run(result: &CompileResult, havoc: FixedHavoc<ZeroHavoc>) -> Execution {
    Interpreter::new(&result.program, havoc).run().unwrap()
}

fn num(run: &Execution, name: &str) -> u64 {
    let value = run.value(name).and_then(|v| v.as_num()).unwrap();
    u64::try_from(value).unwrap()
}

fn violation(run: &Execution) -> &str {
    match &run.outcome {
        Outcome::Violated { message, .. } => message,
        other => panic!("expected a violation, got {:?}", other),
    }
}

fn binary(name: &str, op: Bytecode) -> Function {
    Function::new(
        id(name),
        vec![val(ValueType::U64), val(ValueType::U64)],
        vec![val(ValueType::U64)],
        Code::new(vec![], vec![Bytecode::CopyLoc(0), Bytecode::CopyLoc(1), op, Bytecode::Ret]),
    )
}

fn pair() -> ValueType {
    ValueType::structure(
        QualifiedName::new(ModuleName::new(1u8, "m"), "Pair"),
        vec![],
        Some(vec![Field::new("a", ValueType::U64), Field::new("b", ValueType::Bool)]),
    )
}

fn maybe() -> ValueType {
    ValueType::enumeration(
        QualifiedName::new(ModuleName::new(1u8, "m"), "Maybe"),
        vec![],
        vec![
            Variant {
                name: "Nothing".to_string(),
                index: 0,
                fields: Some(vec![]),
            },
            Variant {
                name: "Just".to_string(),
                index: 1,
                fields: Some(vec![Field::new("v", ValueType::U64)]),
            },
        ],
    )
}

// =============================================================================
// ARITHMETIC
// =============================================================================

#[test]
fn test_add() {
    let scene = Scene::from_functions([binary("add", Bytecode::Add)]);
    let result = compile(&scene, "add");
    assert!(result.warnings.is_empty());

    let havoc = FixedHavoc::new(ZeroHavoc)
        .with(arg("add", 0), 2u64)
        .with(arg("add", 1), 3u64);
    let run = run(&result, havoc);
    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(num(&run, &ret("add", 0)), 5);
}

#[test]
fn test_add_overflow() {
    let scene = Scene::from_functions([binary("add", Bytecode::Add)]);
    let result = compile(&scene, "add");

    let havoc = FixedHavoc::new(ZeroHavoc)
        .with(arg("add", 0), u64::MAX)
        .with(arg("add", 1), 1u64);
    let run = run(&result, havoc);
    assert_eq!(violation(&run), "u64 overflow in addition");
}

#[test]
fn test_sub_underflow() {
    let scene = Scene::from_functions([binary("sub", Bytecode::Sub)]);
    let result = compile(&scene, "sub");

    let havoc = FixedHavoc::new(ZeroHavoc)
        .with(arg("sub", 0), 1u64)
        .with(arg("sub", 1), 2u64);
    assert_eq!(violation(&run(&result, havoc)), "u64 overflow in subtraction");
}

#[test]
fn test_division_by_zero() {
    let scene = Scene::from_functions([binary("div", Bytecode::Div)]);
    let result = compile(&scene, "div");

    let havoc = FixedHavoc::new(ZeroHavoc).with(arg("div", 0), 7u64);
    assert_eq!(violation(&run(&result, havoc)), "Division by zero");

    let havoc = FixedHavoc::new(ZeroHavoc)
        .with(arg("div", 0), 7u64)
        .with(arg("div", 1), 2u64);
    let run = run(&result, havoc);
    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(num(&run, &ret("div", 0)), 3);
}

#[test]
fn test_abort() {
    let f = Function::new(
        id("f"),
        vec![],
        vec![],
        Code::new(vec![], vec![Bytecode::LdU64(17), Bytecode::Abort]),
    );
    let scene = Scene::from_functions([f]);
    let result = compile(&scene, "f");
    assert_eq!(violation(&run(&result, FixedHavoc::new(ZeroHavoc))), "Abort");
}

#[test]
fn test_inlined_call() {
    // f(x) = double(x) + 1
    let double = Function::new(
        id("double"),
        vec![val(ValueType::U64)],
        vec![val(ValueType::U64)],
        Code::new(
            vec![],
            vec![Bytecode::CopyLoc(0), Bytecode::LdU64(2), Bytecode::Mul, Bytecode::Ret],
        ),
    );
    let f = Function::new(
        id("f"),
        vec![val(ValueType::U64)],
        vec![val(ValueType::U64)],
        Code::new(
            vec![],
            vec![
                Bytecode::CopyLoc(0),
                Bytecode::Call(id("double")),
                Bytecode::LdU64(1),
                Bytecode::Add,
                Bytecode::Ret,
            ],
        ),
    );
    let scene = Scene::from_functions([double, f]);
    let result = compile(&scene, "f");

    let run = run(&result, FixedHavoc::new(ZeroHavoc).with(arg("f", 0), 20u64));
    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(num(&run, &ret("f", 0)), 41);
}

// =============================================================================
// STRUCTS, VECTORS, ENUMS
// =============================================================================

#[test]
fn test_struct_pack_unpack() {
    let f = Function::new(
        id("f"),
        vec![val(ValueType::U64), val(ValueType::Bool)],
        vec![val(ValueType::U64), val(ValueType::Bool)],
        Code::new(
            vec![],
            vec![
                Bytecode::CopyLoc(0),
                Bytecode::CopyLoc(1),
                Bytecode::Pack(pair()),
                Bytecode::Unpack(pair()),
                Bytecode::Ret,
            ],
        ),
    );
    let scene = Scene::from_functions([f]);
    let result = compile(&scene, "f");

    let havoc = FixedHavoc::new(ZeroHavoc)
        .with(arg("f", 0), 7u64)
        .with(arg("f", 1), true);
    let run = run(&result, havoc);
    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(num(&run, &ret("f", 0)), 7);
    assert_eq!(run.value(&ret("f", 1)).and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn test_vector_push_then_pop() {
    let f = Function::new(
        id("f"),
        vec![val(ValueType::U64)],
        vec![val(ValueType::U64)],
        Code::new(
            vec![val(ValueType::vector(ValueType::U64))],
            vec![
                Bytecode::VecPack {
                    elem: ValueType::U64,
                    count: 0,
                },
                Bytecode::StLoc(1),
                Bytecode::BorrowLoc(1),
                Bytecode::CopyLoc(0),
                Bytecode::VecPushBack,
                Bytecode::BorrowLoc(1),
                Bytecode::VecPopBack,
                Bytecode::Ret,
            ],
        ),
    );
    let scene = Scene::from_functions([f]);
    let result = compile(&scene, "f");
    assert!(format_program(&result.program).contains("move_vector_push_back_digest"));

    let run = run(&result, FixedHavoc::new(ZeroHavoc).with(arg("f", 0), 42u64));
    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(num(&run, &ret("f", 0)), 42);
}

#[test]
fn test_pop_from_empty_vector() {
    let f = Function::new(
        id("f"),
        vec![],
        vec![val(ValueType::U64)],
        Code::new(
            vec![val(ValueType::vector(ValueType::U64))],
            vec![
                Bytecode::VecPack {
                    elem: ValueType::U64,
                    count: 0,
                },
                Bytecode::StLoc(0),
                Bytecode::BorrowLoc(0),
                Bytecode::VecPopBack,
                Bytecode::Ret,
            ],
        ),
    );
    let scene = Scene::from_functions([f]);
    let result = compile(&scene, "f");
    assert_eq!(violation(&run(&result, FixedHavoc::new(ZeroHavoc))), "Empty vector");
}

#[test]
fn test_variant_switch() {
    let f = Function::new(
        id("f"),
        vec![val(ValueType::U64)],
        vec![val(ValueType::U64)],
        Code::new(
            vec![val(maybe())],
            vec![
                Bytecode::CopyLoc(0),                                      // 0
                Bytecode::PackVariant { ty: maybe(), variant: 1 },         // 1
                Bytecode::StLoc(1),                                        // 2
                Bytecode::BorrowLoc(1),                                    // 3
                Bytecode::VariantSwitch(vec![5, 7]),                       // 4
                Bytecode::LdU64(0),                                        // 5
                Bytecode::Ret,                                             // 6
                Bytecode::MoveLoc(1),                                      // 7
                Bytecode::UnpackVariant { ty: maybe(), variant: 1 },       // 8
                Bytecode::Ret,                                             // 9
            ],
        ),
    );
    let scene = Scene::from_functions([f]);
    let result = compile(&scene, "f");

    let run = run(&result, FixedHavoc::new(ZeroHavoc).with(arg("f", 0), 9u64));
    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(num(&run, &ret("f", 0)), 9);
}

#[test]
fn test_unpack_wrong_variant() {
    let f = Function::new(
        id("f"),
        vec![val(ValueType::U64)],
        vec![val(ValueType::U64)],
        Code::new(
            vec![],
            vec![
                Bytecode::CopyLoc(0),
                Bytecode::PackVariant { ty: maybe(), variant: 1 },
                Bytecode::UnpackVariant { ty: maybe(), variant: 0 },
                Bytecode::LdU64(0),
                Bytecode::Ret,
            ],
        ),
    );
    let scene = Scene::from_functions([f]);
    let result = compile(&scene, "f");
    let run = run(&result, FixedHavoc::new(ZeroHavoc).with(arg("f", 0), 3u64));
    assert_eq!(violation(&run), "Variant tag mismatch");
}

// =============================================================================
// REFERENCES
// =============================================================================

/// `r = if c { &mut a } else { &mut b }; *r = 5; (a, b)`
fn alias_switch() -> Function {
    Function::new(
        id("f"),
        vec![val(ValueType::Bool), val(ValueType::U64), val(ValueType::U64)],
        vec![val(ValueType::U64), val(ValueType::U64)],
        Code::new(
            vec![Type::Reference(ValueType::U64)],
            vec![
                Bytecode::CopyLoc(0),   // 0
                Bytecode::BrFalse(5),   // 1
                Bytecode::BorrowLoc(1), // 2
                Bytecode::StLoc(3),     // 3
                Bytecode::Branch(7),    // 4
                Bytecode::BorrowLoc(2), // 5
                Bytecode::StLoc(3),     // 6
                Bytecode::LdU64(5),     // 7
                Bytecode::MoveLoc(3),   // 8
                Bytecode::WriteRef,     // 9
                Bytecode::MoveLoc(1),   // 10
                Bytecode::MoveLoc(2),   // 11
                Bytecode::Ret,          // 12
            ],
        ),
    )
}

#[test]
fn test_write_through_aliased_reference() {
    let scene = Scene::from_functions([alias_switch()]);
    let result = compile(&scene, "f");
    assert!(format_program(&result.program).contains("Corrupt reference"));

    let havoc = |c: bool| {
        FixedHavoc::new(ZeroHavoc)
            .with(arg("f", 0), c)
            .with(arg("f", 1), 1u64)
            .with(arg("f", 2), 2u64)
    };

    let taken = run(&result, havoc(true));
    assert_eq!(taken.outcome, Outcome::Completed);
    assert_eq!((num(&taken, &ret("f", 0)), num(&taken, &ret("f", 1))), (5, 2));

    let other = run(&result, havoc(false));
    assert_eq!(other.outcome, Outcome::Completed);
    assert_eq!((num(&other, &ret("f", 0)), num(&other, &ret("f", 1))), (1, 5));
}

// =============================================================================
// CALLS
// =============================================================================

#[test]
fn test_direct_recursion_traps() {
    let f = Function::new(
        id("f"),
        vec![],
        vec![val(ValueType::U64)],
        Code::new(vec![], vec![Bytecode::Call(id("f")), Bytecode::Ret]),
    );
    let scene = Scene::from_functions([f]);
    let result = compile(&scene, "f");
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(
        violation(&run(&result, FixedHavoc::new(ZeroHavoc))),
        "Recursive function call to 0x1::m::f"
    );
}

#[test]
fn test_unknown_native_is_havoced() {
    let g = Function::native(id("g"), vec![], vec![val(ValueType::U8)]);
    let f = Function::new(
        id("f"),
        vec![],
        vec![val(ValueType::U8)],
        Code::new(vec![], vec![Bytecode::Call(id("g")), Bytecode::Ret]),
    );
    let scene = Scene::from_functions([g, f]);
    let result = compile(&scene, "f");
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("Havocing call to 0x1::m::g"));

    let run = Interpreter::new(&result.program, ZeroHavoc).run().unwrap();
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn test_hash_summary_is_deterministic() {
    let h = Function::native(id("h"), vec![val(ValueType::U64)], vec![val(ValueType::U256)]);
    let f = Function::new(
        id("f"),
        vec![val(ValueType::U64)],
        vec![val(ValueType::Bool)],
        Code::new(
            vec![],
            vec![
                Bytecode::CopyLoc(0),
                Bytecode::Call(id("h")),
                Bytecode::CopyLoc(0),
                Bytecode::Call(id("h")),
                Bytecode::Eq,
                Bytecode::Ret,
            ],
        ),
    );
    let scene = Scene::from_functions([h, f]);
    let mut options = CompileOptions::default();
    options
        .summaries
        .insert("0x1::m::h".to_string(), NativeSummary::Hash);
    let result = compile_with(&scene, "f", options);
    assert!(result.warnings.is_empty());

    let run = run(&result, FixedHavoc::new(ZeroHavoc).with(arg("f", 0), 11u64));
    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(run.value(&ret("f", 0)).and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn test_shadowed_type_traps_at_access() {
    let f = Function::new(
        id("f"),
        vec![val(ValueType::U64), val(ValueType::Bool)],
        vec![val(ValueType::U64), val(ValueType::Bool)],
        Code::new(
            vec![],
            vec![
                Bytecode::CopyLoc(0),
                Bytecode::CopyLoc(1),
                Bytecode::Pack(pair()),
                Bytecode::Unpack(pair()),
                Bytecode::Ret,
            ],
        ),
    );
    let scene = Scene::from_functions([f]);
    let mut options = CompileOptions::default();
    options.shadowed_types.insert("0x1::m::Pair".to_string());
    let result = compile_with(&scene, "f", options);

    let run = Interpreter::new(&result.program, ZeroHavoc).run().unwrap();
    assert_eq!(violation(&run), "Illegal access to shadowed type 0x1::m::Pair");
}

#[test]
fn test_compile_all() {
    let scene = Scene::from_functions([binary("add", Bytecode::Add), binary("mul", Bytecode::Mul)]);
    let compiler = Compiler::new(&scene, CompileOptions::default());
    let results = compiler.compile_all(&[id("add"), id("mul")]);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(results[1].as_ref().unwrap().program.name, "0x1::m::mul");
}
