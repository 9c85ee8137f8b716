use criterion::{black_box, criterion_group, criterion_main, Criterion};
use movetac::compiler::ir::interpreter::{Interpreter, ZeroHavoc};
use movetac::compiler::{Bytecode, Code, CompileOptions, Compiler, Function, FunctionId, Scene};
use movetac::types::{ModuleName, QualifiedName, ValueType};

fn id(name: &str) -> FunctionId {
    FunctionId::simple(QualifiedName::new(ModuleName::new(1u8, "bench"), name))
}

/// A chain `f0 -> f1 -> ... -> f{depth-1}`, each adding one and pushing to a vector
fn call_chain(depth: usize) -> Scene {
    let mut functions = Vec::with_capacity(depth);
    for i in 0..depth {
        let mut code = vec![
            Bytecode::VecPack {
                elem: ValueType::U64,
                count: 0,
            },
            Bytecode::StLoc(1),
            Bytecode::BorrowLoc(1),
            Bytecode::CopyLoc(0),
            Bytecode::VecPushBack,
            Bytecode::CopyLoc(0),
            Bytecode::LdU64(1),
            Bytecode::Add,
        ];
        if i + 1 < depth {
            code.push(Bytecode::Call(id(&format!("f{}", i + 1))));
        }
        code.push(Bytecode::Ret);
        functions.push(Function::new(
            id(&format!("f{}", i)),
            vec![ValueType::U64.into()],
            vec![ValueType::U64.into()],
            Code::new(vec![ValueType::vector(ValueType::U64).into()], code),
        ));
    }
    Scene::from_functions(functions)
}

fn compile_benchmark(c: &mut Criterion) {
    let scene = call_chain(16);
    let compiler = Compiler::new(&scene, CompileOptions::default());

    c.bench_function("compile 16-deep call chain", |b| {
        b.iter(|| compiler.compile(black_box(&id("f0"))).unwrap())
    });

    let entries: Vec<FunctionId> = (0..16).map(|i| id(&format!("f{}", i))).collect();
    c.bench_function("compile_all 16 entries", |b| {
        b.iter(|| compiler.compile_all(black_box(&entries)))
    });
}

fn interpret_benchmark(c: &mut Criterion) {
    let scene = call_chain(16);
    let result = Compiler::new(&scene, CompileOptions::default())
        .compile(&id("f0"))
        .unwrap();

    c.bench_function("interpret 16-deep call chain", |b| {
        b.iter(|| Interpreter::new(black_box(&result.program), ZeroHavoc).run().unwrap())
    });
}

criterion_group!(benches, compile_benchmark, interpret_benchmark);
criterion_main!(benches);
