//! Code generation backends.
//!
//! The compiler never produces machine code itself: it drives a [`Backend`], which offers
//! a small set of primitives (registers, byte memory operands, immediate arithmetic,
//! labels, jumps and calls to host procedures) and turns them into a [`Routine`].

pub mod recording;
#[cfg(all(target_arch = "x86_64", not(windows)))]
pub mod native;
#[cfg(feature = "llvm")]
pub mod llvm;

use std::fmt;
use crate::BrainfuckError;

/// A 64 bit general purpose register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(pub usize);

/// A byte buffer living as long as the generated routine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Buffer(pub usize);

/// A jump target. Created first, bound to a code location later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub usize);

/// The byte at `buffer[index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Memory {
    pub buffer: Buffer,
    pub index: Register
}

/// Destination or left hand side of an arithmetic instruction.
/// Register operands are 64 bit wide, memory operands a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(Register),
    Memory(Memory)
}

impl From<Register> for Operand {
    fn from(r: Register) -> Self {
        Operand::Register(r)
    }
}

impl From<Memory> for Operand {
    fn from(m: Memory) -> Self {
        Operand::Memory(m)
    }
}

/// Comparison used by conditional jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Equal,
    NotEqual,
    /// Unsigned less than.
    Below
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32
}

/// Typed signature of a host procedure, not counting the implicit I/O context argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [ValueType],
    pub ret: Option<ValueType>
}

/// Procedures implemented by the host that generated code can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCall {
    /// `fn() -> i32`, see [`crate::host::HostIo::read_byte`].
    ReadByte,
    /// `fn(i32)`, see [`crate::host::HostIo::write_byte`].
    WriteByte
}

impl HostCall {

    pub fn signature(self) -> Signature {
        match self {
            HostCall::ReadByte => Signature { params: &[], ret: Some(ValueType::I32) },
            HostCall::WriteByte => Signature { params: &[ValueType::I32], ret: None }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HostCall::ReadByte => "bf_read_byte",
            HostCall::WriteByte => "bf_write_byte"
        }
    }

}

impl fmt::Display for HostCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Capabilities the compiler needs from a code generator.
///
/// Emission never fails eagerly: a backend that cannot express something
/// remembers the problem and reports it from [`Backend::finalize`].
pub trait Backend {

    /// The executable form produced by [`Backend::finalize`].
    type Routine: Routine;

    /// Reserves a buffer of `size` bytes. Its initial content is unspecified.
    fn alloc_buffer(&mut self, size: usize) -> Buffer;

    fn new_register(&mut self) -> Register;

    /// Builds the memory operand addressing `buffer[index]`.
    fn indexed(&self, buffer: Buffer, index: Register) -> Memory {
        Memory { buffer, index }
    }

    fn mov(&mut self, dst: Operand, imm: i64);

    fn add(&mut self, dst: Operand, imm: i64);

    fn sub(&mut self, dst: Operand, imm: i64);

    /// Zero-extends the byte at `src` into `dst`.
    fn load(&mut self, dst: Register, src: Memory);

    /// Stores the low byte of `src` at `dst`.
    fn store(&mut self, dst: Memory, src: Register);

    fn new_label(&mut self) -> Label;

    /// Binds `label` to the current position. Each label is bound exactly once.
    fn bind(&mut self, label: Label);

    fn jump(&mut self, target: Label);

    /// Jumps to `target` if `lhs <cond> rhs`.
    fn jump_if(&mut self, cond: Condition, lhs: Operand, rhs: i64, target: Label);

    /// Calls a host procedure with `args` matching its signature,
    /// storing its result, if any, in `ret`.
    fn invoke(&mut self, call: HostCall, args: &[Register], ret: Option<Register>);

    /// Assembles everything emitted so far into an executable routine.
    fn finalize(self) -> Result<Self::Routine, BrainfuckError>;

}

/// A finalized routine taking no parameters and returning nothing.
pub trait Routine {

    /// Runs the routine to completion. A routine can only be run once.
    fn call(self);

}
