//! Tiering policies: which code pointers get compiled, and when.

mod group;
mod none;
mod trace;

pub use group::GroupJit;
pub use none::NoJit;
pub use trace::{MAX_TRACE_LENGTH, TracingJit};

use crate::bcode::{BInstr, Granularity};
use crate::code::Code;
use crate::config::JitPolicyKind;

/// Instructions to compile together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitSequence {
    /// Cp of every position, in emission order.
    pub cps: Vec<usize>,
    /// Cps the compiled group may be entered at.
    pub entry_points: Vec<usize>,
    pub is_function: bool,
    pub is_trace: bool,
}

/// Observes execution and proposes sequences for compilation.
pub trait JitPolicy {
    /// The interpreter is about to run the instruction at `cp`.
    fn notify_landing(&mut self, cp: usize);

    /// A compiled group entered at `cp` has just run.
    fn notify_run_jit(&mut self, cp: usize);

    fn make_jit_sequence(&mut self, code: &Code<BInstr>, cp: usize) -> Option<JitSequence>;
}

pub fn make_policy(kind: JitPolicyKind, threshold: usize) -> Box<dyn JitPolicy> {
    match kind {
        JitPolicyKind::No => Box::new(NoJit),
        JitPolicyKind::Tracing => Box::new(TracingJit::new(threshold)),
        JitPolicyKind::Individual => Box::new(GroupJit::new(Granularity::Individual, threshold)),
        JitPolicyKind::Block => Box::new(GroupJit::new(Granularity::Block, threshold)),
        JitPolicyKind::Function => Box::new(GroupJit::new(Granularity::Function, threshold)),
    }
}
