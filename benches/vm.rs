//! Benchmarks for the bytecode compiler and VM.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use garnet::bytecode::{Compiler, CompilerOptions, ProgramImage, VM};
use garnet::error::SourceInfo;

const FIB_RECURSIVE: &str = "
func fib(n):
    if n < 2:
        return n;
    end
    return fib(n - 1) + fib(n - 2);
end

func main():
    assert(fib(18) == 2584);
end
";

const FIB_ITERATIVE: &str = "
func fib(n):
    var a = 0;
    var b = 1;
    for i in 0..n:
        var next = a + b;
        a = b;
        b = next;
    end
    return a;
end

func main():
    assert(fib(30) == 832040);
end
";

const LOOP_SUM: &str = "
func main():
    var s = 0;
    for i in 0..100000:
        s = s + i;
    end
    assert(s == 4999950000);
end
";

fn compile(source: &str) -> ProgramImage {
    let info = SourceInfo::new("bench.gr", source);
    Compiler::compile(source, info, CompilerOptions::default())
        .expect("compile error")
        .link()
        .expect("link error")
}

fn run(source: &str) {
    let image = compile(source);
    let mut vm = VM::new(image);
    vm.run().expect("runtime error");
}

fn execution_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("vm_execution");

    group.bench_function("fib_recursive", |b| {
        b.iter(|| run(black_box(FIB_RECURSIVE)))
    });
    group.bench_function("fib_iterative", |b| {
        b.iter(|| run(black_box(FIB_ITERATIVE)))
    });
    group.bench_function("loop_sum", |b| b.iter(|| run(black_box(LOOP_SUM))));

    group.finish();
}

fn fib_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_scaling");

    for (n, expected) in [(10, 55), (15, 610), (20, 6765)] {
        let source = format!(
            "
func fib(n):
    if n < 2:
        return n;
    end
    return fib(n - 1) + fib(n - 2);
end

func main():
    assert(fib({}) == {});
end
",
            n, expected
        );
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, src| {
            b.iter(|| run(black_box(src)))
        });
    }

    group.finish();
}

fn compilation_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation_overhead");

    group.bench_function("compile_fib", |b| {
        b.iter(|| compile(black_box(FIB_RECURSIVE)))
    });
    group.bench_function("compile_loop", |b| b.iter(|| compile(black_box(LOOP_SUM))));

    group.finish();
}

criterion_group!(
    benches,
    execution_benchmarks,
    fib_scaling,
    compilation_overhead,
);

criterion_main!(benches);
