pub mod loops;
pub mod memory;

use crate::BrainfuckError;
use crate::backend::{Backend, Buffer, Condition, HostCall, Memory, Register};
use crate::parser::{Instruction, InstructionKind, Position};
use crate::trampoline::GeneratedProgram;
use self::loops::{LoopFrame, LoopStack};

/// Number of cells of the tape when not configured otherwise.
pub const DEFAULT_TAPE_SIZE: usize = 1024;

/// Builder for the [`Compiler`](crate::compiler::Compiler) struct.
pub struct CompilerBuilder {
    tape_size: usize
}

impl Default for CompilerBuilder {
    fn default() -> Self {
        CompilerBuilder::new()
    }
}

impl CompilerBuilder {

    /// Creates a new [`CompilerBuilder`](crate::compiler::CompilerBuilder) with the default settings.
    pub fn new() -> CompilerBuilder {
        CompilerBuilder {
            tape_size: DEFAULT_TAPE_SIZE
        }
    }

    /// Sets the number of cells of the tape.
    /// Panics if the size is zero or does not fit a 32 bit immediate.
    pub fn tape_size(&mut self, tape_size: usize) -> &mut Self {
        if tape_size == 0 {
            panic!("Tape size must be at least 1.");
        }
        if tape_size > i32::max_value() as usize {
            panic!("Tape size must be less than 2^31.");
        }
        self.tape_size = tape_size;
        self
    }

    /// Builds a [`Compiler`](crate::compiler::Compiler) emitting code into `backend`.
    pub fn build<B: Backend>(&self, backend: B) -> Compiler<B> {
        Compiler::with_tape_size(backend, self.tape_size)
    }

}

/// Compiler from Brainfuck to the primitives of a [`Backend`](crate::backend::Backend).
///
/// The tape wraps around: moving past either end continues from the other one.
pub struct Compiler<B: Backend> {
    backend: B,
    loops: LoopStack,
    tape_size: usize,

    // Values live for the whole emitted routine
    tape: Buffer,
    cursor: Register,
    data: Register
}

impl<B: Backend> Compiler<B> {

    /// Creates a compiler with a tape of [`DEFAULT_TAPE_SIZE`](crate::compiler::DEFAULT_TAPE_SIZE) cells.
    pub fn new(backend: B) -> Compiler<B> {
        CompilerBuilder::new().build(backend)
    }

    fn with_tape_size(mut backend: B, tape_size: usize) -> Compiler<B> {
        let tape = backend.alloc_buffer(tape_size);
        let cursor = backend.new_register();
        let data = backend.new_register();

        // The tape comes uninitialized: clear it before anything else runs
        memory::emit_tape_reset(&mut backend, tape, cursor, tape_size);

        Compiler {
            backend,
            loops: LoopStack::new(),
            tape_size,
            tape,
            cursor,
            data
        }
    }

    pub fn tape_size(&self) -> usize {
        self.tape_size
    }

    /// Number of loops opened and not closed yet.
    pub fn open_loops(&self) -> usize {
        self.loops.depth()
    }

    /// The backend code is being emitted into.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn cell(&self) -> Memory {
        self.backend.indexed(self.tape, self.cursor)
    }

    /// Compiles the given instructions. This method can be called multiple times,
    /// allowing to compile instructions in a streaming fashion: loops may span different calls.
    /// To conclude the compilation, call the `finish()` method.
    ///
    /// A `]` closing no loop aborts the compilation.
    pub fn compile_instructions(mut self, instructions: &[Instruction]) -> Result<Self, BrainfuckError> {
        for instruction in instructions {
            let count = instruction.count;
            match instruction.kind {

                InstructionKind::Increment => {
                    let cell = self.cell();
                    self.backend.add(cell.into(), (count % 256) as i64);
                },

                InstructionKind::Decrement => {
                    let cell = self.cell();
                    self.backend.sub(cell.into(), (count % 256) as i64);
                },

                InstructionKind::MoveRight => self.emit_move_right(count),

                InstructionKind::MoveLeft => self.emit_move_left(count),

                InstructionKind::Input => {
                    // Read a byte into a register and store its low part in the current cell
                    let cell = self.cell();
                    self.backend.invoke(HostCall::ReadByte, &[], Some(self.data));
                    self.backend.store(cell, self.data);
                },

                InstructionKind::Output => {
                    let cell = self.cell();
                    self.backend.load(self.data, cell);
                    self.backend.invoke(HostCall::WriteByte, &[self.data], None);
                },

                InstructionKind::LoopStart => self.emit_loop_start(instruction.position),

                InstructionKind::LoopEnd => self.emit_loop_end(instruction.position)?

            }
        }

        Ok(self)
    }

    /// Finishes the streaming compilation.
    /// Fails if a loop was left open, in which case nothing is handed out for execution.
    pub fn finish(self) -> Result<GeneratedProgram<B>, BrainfuckError> {
        self.loops.ensure_closed()?;
        Ok(GeneratedProgram::new(self.backend))
    }

    // A move by `n` cells, wrapped around the tape:
    //
    // ```
    //     add cursor, n
    //     cmp cursor, size
    //     jb done
    //     sub cursor, size
    // done:
    // ```
    //
    // Going left is the mirror image: after the subtraction a cursor which went
    // below zero is, as an unsigned value, larger than the tape.
    fn emit_move_right(&mut self, count: usize) {
        let n = count % self.tape_size;
        if n == 0 {
            return;
        }
        let done = self.backend.new_label();
        self.backend.add(self.cursor.into(), n as i64);
        self.backend.jump_if(Condition::Below, self.cursor.into(), self.tape_size as i64, done);
        self.backend.sub(self.cursor.into(), self.tape_size as i64);
        self.backend.bind(done);
    }

    fn emit_move_left(&mut self, count: usize) {
        let n = count % self.tape_size;
        if n == 0 {
            return;
        }
        let done = self.backend.new_label();
        self.backend.sub(self.cursor.into(), n as i64);
        self.backend.jump_if(Condition::Below, self.cursor.into(), self.tape_size as i64, done);
        self.backend.add(self.cursor.into(), self.tape_size as i64);
        self.backend.bind(done);
    }

    // The idea is having a guard at the beginning and a backwards jump at the end:
    //
    // ```
    // start:
    //     cmp byte [tape + cursor], 0
    //     je end
    //     <loop body>
    //     jmp start
    // end:
    // ```
    //
    // This is equivalent to:
    // while (*ptr != 0) { ... }
    fn emit_loop_start(&mut self, position: Position) {
        let frame = LoopFrame {
            start: self.backend.new_label(),
            end: self.backend.new_label(),
            position
        };
        self.loops.push(frame);

        let cell = self.cell();
        self.backend.bind(frame.start);
        self.backend.jump_if(Condition::Equal, cell.into(), 0, frame.end);
    }

    fn emit_loop_end(&mut self, position: Position) -> Result<(), BrainfuckError> {
        let frame = self.loops.pop(position)?;
        self.backend.jump(frame.start);
        self.backend.bind(frame.end);
        Ok(())
    }

}
