//! T-code: U-code over variables, the form the optimizer works on.

mod arg;
mod instr;
mod state;

use thiserror::Error;

pub use arg::{TArg, Var, VarId, VarKind};
pub use instr::{Effect, Fold, TInstr, TKind};
pub use state::TState;

/// Reasons to give up optimizing a group. The group is then compiled as lowered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizationError {
    #[error("inconsistent stack offset at cp {cp}: expected {expected}, found {found}")]
    InconsistentStack { cp: usize, expected: i64, found: i64 },
    #[error("constant division by zero at cp {cp}")]
    DivisionByZero { cp: usize },
    #[error("cannot lower `{0}` back to U-code")]
    Unlowerable(String),
}
