//! Turning generated code into something runnable, and running it.

use crate::BrainfuckError;
use crate::backend::{Backend, Routine};

/// Code emitted by a [`Compiler`](crate::compiler::Compiler) with balanced loops,
/// not yet assembled.
pub struct GeneratedProgram<B: Backend> {
    backend: B
}

impl<B: Backend> GeneratedProgram<B> {

    pub(crate) fn new(backend: B) -> GeneratedProgram<B> {
        GeneratedProgram {
            backend
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Asks the backend to assemble the routine and make it executable.
    /// On failure the generated code is discarded.
    pub fn finalize(self) -> Result<FinalizedProgram<B::Routine>, BrainfuckError> {
        debug!("Finalizing generated code.");
        let routine = self.backend.finalize().map_err(|e| match e {
            e @ BrainfuckError::BackendFinalize(_) => e,
            e => BrainfuckError::BackendFinalize(e.to_string())
        })?;
        Ok(FinalizedProgram {
            routine
        })
    }

}

/// An executable program, ready to be run once.
pub struct FinalizedProgram<R: Routine> {
    routine: R
}

impl<R: Routine> FinalizedProgram<R> {

    /// Runs the program to completion. Control comes back only once it terminates.
    pub fn run(self) {
        debug!("Running program.");
        self.routine.call();
        debug!("Done.");
    }

}

/// Finalizes and runs `program`.
/// The error, if any, comes from finalization: nothing is executed in that case.
pub fn launch<B: Backend>(program: GeneratedProgram<B>) -> Result<(), BrainfuckError> {
    program.finalize()?.run();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use crate::backend::{Buffer, Condition, HostCall, Label, Memory, Operand, Register};

    /// Backend emitting nothing, whose routine counts how often it runs.
    struct Stub {
        runs: Rc<Cell<usize>>,
        fail: bool
    }

    struct Counter(Rc<Cell<usize>>);

    impl Routine for Counter {
        fn call(self) {
            self.0.set(self.0.get() + 1);
        }
    }

    impl Backend for Stub {
        type Routine = Counter;
        fn alloc_buffer(&mut self, _size: usize) -> Buffer { Buffer(0) }
        fn new_register(&mut self) -> Register { Register(0) }
        fn mov(&mut self, _dst: Operand, _imm: i64) {}
        fn add(&mut self, _dst: Operand, _imm: i64) {}
        fn sub(&mut self, _dst: Operand, _imm: i64) {}
        fn load(&mut self, _dst: Register, _src: Memory) {}
        fn store(&mut self, _dst: Memory, _src: Register) {}
        fn new_label(&mut self) -> Label { Label(0) }
        fn bind(&mut self, _label: Label) {}
        fn jump(&mut self, _target: Label) {}
        fn jump_if(&mut self, _cond: Condition, _lhs: Operand, _rhs: i64, _target: Label) {}
        fn invoke(&mut self, _call: HostCall, _args: &[Register], _ret: Option<Register>) {}
        fn finalize(self) -> Result<Counter, BrainfuckError> {
            if self.fail {
                Err("mmap failed".into())
            } else {
                Ok(Counter(self.runs))
            }
        }
    }

    #[test]
    fn test_launch_runs_once() {
        let runs = Rc::new(Cell::new(0));
        launch(GeneratedProgram::new(Stub { runs: runs.clone(), fail: false })).unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_finalize_failure_skips_execution() {
        let runs = Rc::new(Cell::new(0));
        match launch(GeneratedProgram::new(Stub { runs: runs.clone(), fail: true })) {
            Err(BrainfuckError::BackendFinalize(m)) => assert_eq!(m, "mmap failed"),
            r => panic!("Expected a finalize error. Got: {:?}", r)
        }
        assert_eq!(runs.get(), 0);
    }

}
