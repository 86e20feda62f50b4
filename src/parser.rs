use std::cmp;

/// Range of source bytes an instruction was built from (both ends inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub start: usize,
    pub end: usize
}

impl Position {

    /// Creates a position spanning a single byte.
    pub fn at(offset: usize) -> Position {
        Position {
            start: offset,
            end: offset
        }
    }

    /// Returns the smallest position covering both `self` and `other`.
    pub fn merge(self, other: Position) -> Position {
        Position {
            start: cmp::min(self.start, other.start),
            end: cmp::max(self.end, other.end)
        }
    }

}

/// The eight Brainfuck operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    Increment,
    Decrement,
    MoveRight,
    MoveLeft,
    Input,
    Output,
    LoopStart,
    LoopEnd
}

impl InstructionKind {

    /// Maps a source byte to its operation, if it is one of the eight commands.
    pub fn from_byte(b: u8) -> Option<InstructionKind> {
        match b {
            b'+' => Some(InstructionKind::Increment),
            b'-' => Some(InstructionKind::Decrement),
            b'>' => Some(InstructionKind::MoveRight),
            b'<' => Some(InstructionKind::MoveLeft),
            b',' => Some(InstructionKind::Input),
            b'.' => Some(InstructionKind::Output),
            b'[' => Some(InstructionKind::LoopStart),
            b']' => Some(InstructionKind::LoopEnd),
            _ => None
        }
    }

    /// Bulk operations are the ones whose repetitions can be folded into a single count.
    /// I/O and brackets are each an observable effect or a control point, so they never are.
    pub fn is_bulk(self) -> bool {
        match self {
            InstructionKind::Increment |
            InstructionKind::Decrement |
            InstructionKind::MoveRight |
            InstructionKind::MoveLeft => true,
            _ => false
        }
    }

}

/// A single Brainfuck instruction, repeated `count` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub count: usize,
    pub position: Position
}

impl Instruction {

    pub fn new(kind: InstructionKind, count: usize, position: Position) -> Instruction {
        Instruction {
            kind,
            count,
            position
        }
    }

}

/// Tokenizes a Brainfuck program, one instruction per command character.
/// Every other byte is a comment and is skipped. Brackets are not checked here.
pub fn parse(source: &[u8]) -> Vec<Instruction> {
    source.iter()
        .enumerate()
        .filter_map(|(offset, b)| {
            InstructionKind::from_byte(*b).map(|kind| Instruction::new(kind, 1, Position::at(offset)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::InstructionKind::*;

    fn kinds(prog: &str) -> Vec<InstructionKind> {
        parse(prog.as_bytes()).into_iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_empty_program() {
        assert!(parse(b"").is_empty());
    }

    #[test]
    fn test_simple_parse() {
        assert_eq!(kinds("+-><.,[]"), vec![
            Increment,
            Decrement,
            MoveRight,
            MoveLeft,
            Output,
            Input,
            LoopStart,
            LoopEnd
        ]);
    }

    #[test]
    fn test_comments_are_skipped() {
        let prog = parse(b"a+ b\n-#");
        assert_eq!(prog, vec![
            Instruction::new(Increment, 1, Position::at(1)),
            Instruction::new(Decrement, 1, Position::at(5))
        ]);
    }

    #[test]
    fn test_unbalanced_brackets_are_accepted() {
        assert_eq!(kinds("]]["), vec![LoopEnd, LoopEnd, LoopStart]);
    }

    #[test]
    fn test_position_merge() {
        let p = Position::at(7).merge(Position::at(3));
        assert_eq!(p, Position { start: 3, end: 7 });
    }

}
