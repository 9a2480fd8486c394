use thiserror::Error;

use super::memory::Tag;

/// A fault raised while executing a program.
///
/// Any of these stops the machine with status `RuntimeError`; the rendered
/// result is then `ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("memory of size {size} cannot grow")]
    GrowthRejected { size: usize },
    #[error("negative memory index")]
    NegativeIndex,
    #[error("expected tag {expected}, found {found}")]
    TagMismatch { expected: Tag, found: Tag },
    #[error("division by zero")]
    DivisionByZero,
    #[error("case on a value with header {0}")]
    BadCaseHeader(Tag),
    #[error("failed to read an integer")]
    ReadFailed,
    #[error("code pointer {cp} is outside the program")]
    CodeOutOfRange { cp: usize },
    #[error("empty stack")]
    EmptyStack,
    #[error("check failed in compiled code at cp {cp}")]
    CompiledCheckFailed { cp: usize },
}
