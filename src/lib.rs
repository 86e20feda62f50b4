#[macro_use] extern crate log;

pub mod backend;
pub mod compiler;
pub mod error;
pub mod host;
pub mod optimizer;
pub mod parser;
pub mod trampoline;

pub use crate::compiler::Compiler;
pub use crate::error::BrainfuckError;
pub use crate::optimizer::optimize;
pub use crate::parser::Instruction;
pub use crate::trampoline::{launch, FinalizedProgram, GeneratedProgram};
