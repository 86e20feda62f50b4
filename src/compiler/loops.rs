use crate::backend::Label;
use crate::error::{BrainfuckError, UnbalancedKind};
use crate::parser::Position;

/// Jump targets of a loop whose `]` has not been compiled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFrame {
    /// Bound right before the guard testing the current cell.
    pub start: Label,
    /// Bound right after the backwards jump closing the loop.
    pub end: Label,
    /// Where the `[` opening this loop was.
    pub position: Position
}

/// Stack of the currently open loops. The innermost loop is on top.
#[derive(Debug, Default)]
pub struct LoopStack {
    frames: Vec<LoopFrame>
}

impl LoopStack {

    pub fn new() -> LoopStack {
        LoopStack::default()
    }

    pub fn push(&mut self, frame: LoopFrame) {
        trace!("Opening loop {:?} (depth {}).", frame.position, self.frames.len() + 1);
        self.frames.push(frame);
    }

    /// Closes the innermost open loop.
    /// `position` is the position of the `]` and is used to report an unmatched bracket.
    pub fn pop(&mut self, position: Position) -> Result<LoopFrame, BrainfuckError> {
        match self.frames.pop() {
            Some(frame) => {
                trace!("Closing loop {:?} at {:?}.", frame.position, position);
                Ok(frame)
            },
            None => Err(BrainfuckError::UnbalancedLoop {
                kind: UnbalancedKind::UnmatchedEnd,
                position
            })
        }
    }

    /// Number of loops still open.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Fails if any loop is still open, reporting the innermost one.
    pub fn ensure_closed(&self) -> Result<(), BrainfuckError> {
        match self.frames.last() {
            None => Ok(()),
            Some(frame) => Err(BrainfuckError::UnbalancedLoop {
                kind: UnbalancedKind::UnclosedStart,
                position: frame.position
            })
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: usize) -> LoopFrame {
        LoopFrame {
            start: Label(2 * n),
            end: Label(2 * n + 1),
            position: Position::at(n)
        }
    }

    #[test]
    fn test_lifo() {
        let mut stack = LoopStack::new();
        stack.push(frame(0));
        stack.push(frame(1));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop(Position::at(2)).unwrap(), frame(1));
        assert_eq!(stack.pop(Position::at(3)).unwrap(), frame(0));
        assert!(stack.ensure_closed().is_ok());
    }

    #[test]
    fn test_pop_empty() {
        let mut stack = LoopStack::new();
        match stack.pop(Position::at(4)) {
            Err(BrainfuckError::UnbalancedLoop { kind: UnbalancedKind::UnmatchedEnd, position }) => {
                assert_eq!(position, Position::at(4));
            },
            r => panic!("Expected unmatched bracket error. Got: {:?}", r)
        }
    }

    #[test]
    fn test_unclosed_reports_innermost() {
        let mut stack = LoopStack::new();
        stack.push(frame(0));
        stack.push(frame(5));
        match stack.ensure_closed() {
            Err(BrainfuckError::UnbalancedLoop { kind: UnbalancedKind::UnclosedStart, position }) => {
                assert_eq!(position, Position::at(5));
            },
            r => panic!("Expected unclosed bracket error. Got: {:?}", r)
        }
    }

}
