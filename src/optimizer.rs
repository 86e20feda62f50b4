use itertools::Itertools;
use crate::parser::{self, Instruction};

/// Parses and folds a Brainfuck program.
/// The result depends only on `source`: the same text always yields the same instructions.
pub fn optimize(source: &[u8]) -> Vec<Instruction> {
    let instructions = parser::parse(source);
    let before = instructions.len();
    let folded = collapse_runs(instructions);
    debug!("Folded {} instructions into {}.", before, folded.len());
    folded
}

/// Merges runs of the same bulk instruction into a single counted one.
pub fn collapse_runs(instructions: Vec<Instruction>) -> Vec<Instruction> {
    instructions.into_iter().coalesce(|a, b| {
        if a.kind == b.kind && a.kind.is_bulk() {
            Ok(Instruction {
                kind: a.kind,
                count: a.count + b.count,
                position: a.position.merge(b.position)
            })
        } else {
            Err((a, b))
        }
    })
    .collect()
}
