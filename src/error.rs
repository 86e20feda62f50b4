use std::error::Error;
use std::path::PathBuf;
use std::{fmt, io};
use crate::parser::Position;

/// Which side of a bracket pair is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbalancedKind {
    /// A `]` was found with no open loop.
    UnmatchedEnd,
    /// A `[` was never closed.
    UnclosedStart
}

#[derive(Debug)]
pub enum BrainfuckError {
    /// Generic message
    Message(String),
    /// I/O error.
    IoError(io::Error),
    /// The source file could not be read.
    SourceRead { path: PathBuf, source: io::Error },
    /// Mismatched brackets found during code generation.
    UnbalancedLoop { kind: UnbalancedKind, position: Position },
    /// The backend could not assemble or register the generated routine.
    BackendFinalize(String)
}

impl Error for BrainfuckError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrainfuckError::IoError(ref e) => Some(e),
            BrainfuckError::SourceRead { ref source, .. } => Some(source),
            _ => None
        }
    }
}

impl fmt::Display for BrainfuckError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use BrainfuckError::*;
        match self {
            Message(ref m) => {
                write!(f, "{}", m)
            },
            IoError(ref e) => {
                write!(f, "I/O error: {}", e)
            },
            SourceRead { ref path, ref source } => {
                write!(f, "Cannot read {}: {}", path.display(), source)
            },
            UnbalancedLoop { kind: UnbalancedKind::UnmatchedEnd, position } => {
                write!(f, "Unmatched ']' at ({}-{})", position.start, position.end)
            },
            UnbalancedLoop { kind: UnbalancedKind::UnclosedStart, position } => {
                write!(f, "Unclosed '[' at ({}-{})", position.start, position.end)
            },
            BackendFinalize(ref m) => {
                write!(f, "Cannot finalize generated code: {}", m)
            }
        }
    }
}

impl From<&str> for BrainfuckError {
    fn from(s: &str) -> Self {
        BrainfuckError::Message(s.to_owned())
    }
}

impl From<String> for BrainfuckError {
    fn from(s: String) -> Self {
        BrainfuckError::Message(s)
    }
}

impl From<io::Error> for BrainfuckError {
    fn from(e: io::Error) -> Self {
        BrainfuckError::IoError(e)
    }
}
