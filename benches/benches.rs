#[macro_use]
extern crate criterion;

use std::cell::RefCell;
use std::io::Cursor;
use std::fmt;
use std::rc::Rc;
use criterion::{Criterion, ParameterizedBenchmark};
use bfjit::{launch, optimize, Compiler, Instruction};
use bfjit::backend::Backend;
use bfjit::backend::recording::RecordingBackend;
use bfjit::host::{InputTarget, OutputTarget};

struct Program {
    name: &'static str,
    raw_program: &'static [u8],
    input: &'static [u8],
    instructions: Vec<Instruction>
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

macro_rules! program {
    ($name:ident) => {
        {
            let raw_program: &'static [u8] = include_bytes!(concat!("../tests/programs/", stringify!($name), ".b"));
            Program {
                name: stringify!($name),
                raw_program,
                input: include_bytes!(concat!("../tests/programs/", stringify!($name), ".b.in")),
                instructions: optimize(raw_program)
            }
        }
    };
}

fn programs() -> Vec<Program> {
    vec![
        program!(hello_world),
        program!(nested_loops),
        program!(multiply),
        program!(reverse)
    ]
}

fn io(p: &Program) -> (InputTarget, OutputTarget) {
    (
        InputTarget::Custom(Rc::new(RefCell::new(Cursor::new(p.input)))),
        OutputTarget::Custom(Rc::new(RefCell::new(Cursor::new(Vec::<u8>::new()))))
    )
}

fn compile_and_run<B: Backend>(backend: B, p: &Program) {
    let program = Compiler::new(backend)
        .compile_instructions(&p.instructions)
        .and_then(|c| c.finish())
        .unwrap();
    launch(program).unwrap();
}

// Folding of the raw source
fn optimizer_benches(c: &mut Criterion) {
    c.bench_function_over_inputs(
        "Folding",
        |b, program: &Program| {
            b.iter(|| optimize(program.raw_program));
        },
        programs()
    );
}

// Code generation alone, on the recording backend
fn codegen_benches(c: &mut Criterion) {
    c.bench_function_over_inputs(
        "Codegen",
        |b, program: &Program| {
            b.iter(|| {
                Compiler::new(RecordingBackend::new())
                    .compile_instructions(&program.instructions)
                    .and_then(|c| c.finish())
                    .unwrap()
            });
        },
        programs()
    );
}

// Evaluated vs natively compiled execution of the same programs
#[cfg(all(target_arch = "x86_64", not(windows)))]
fn evaluated_vs_compiled(c: &mut Criterion) {
    use bfjit::backend::native::NativeBackend;

    c.bench("Execution",
        ParameterizedBenchmark::new(
            "Evaluated",
            |b, p: &Program| b.iter(|| {
                let (input, output) = io(p);
                compile_and_run(RecordingBackend::with_io(input, output), p)
            }),
            programs()
        )
        .with_function(
            "Compiled",
            |b, p: &Program| b.iter(|| {
                let (input, output) = io(p);
                compile_and_run(NativeBackend::with_io(input, output), p)
            })
        )
    );
}

#[cfg(not(all(target_arch = "x86_64", not(windows))))]
fn evaluated_vs_compiled(c: &mut Criterion) {
    c.bench("Execution",
        ParameterizedBenchmark::new(
            "Evaluated",
            |b, p: &Program| b.iter(|| {
                let (input, output) = io(p);
                compile_and_run(RecordingBackend::with_io(input, output), p)
            }),
            programs()
        )
    );
}

criterion_group!(benches, optimizer_benches, codegen_benches, evaluated_vs_compiled);
criterion_main!(benches);
