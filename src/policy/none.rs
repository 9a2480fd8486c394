use super::{JitPolicy, JitSequence};
use crate::bcode::BInstr;
use crate::code::Code;

/// Never compiles anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJit;

impl JitPolicy for NoJit {
    fn notify_landing(&mut self, _cp: usize) {}

    fn notify_run_jit(&mut self, _cp: usize) {}

    fn make_jit_sequence(&mut self, _code: &Code<BInstr>, _cp: usize) -> Option<JitSequence> {
        None
    }
}
