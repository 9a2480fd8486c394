use std::collections::HashSet;

use super::{JitPolicy, JitSequence};
use crate::bcode::{BInstr, Granularity, group_containing};
use crate::code::Code;

/// Compiles the syntactic group around a cp once it has landed often enough.
#[derive(Debug, Clone)]
pub struct GroupJit {
    granularity: Granularity,
    threshold: usize,
    landings: Vec<usize>,
    /// Cps whose group was already proposed. Blocks overlap, so only a
    /// function claims every cp it spans.
    proposed: HashSet<usize>,
}

impl GroupJit {
    pub fn new(granularity: Granularity, threshold: usize) -> Self {
        Self {
            granularity,
            threshold,
            landings: Vec::new(),
            proposed: HashSet::new(),
        }
    }

    pub fn landings(&self, cp: usize) -> usize {
        self.landings.get(cp).copied().unwrap_or(0)
    }
}

impl JitPolicy for GroupJit {
    fn notify_landing(&mut self, cp: usize) {
        if cp >= self.landings.len() {
            self.landings.resize(cp + 1, 0);
        }
        self.landings[cp] += 1;
    }

    fn notify_run_jit(&mut self, _cp: usize) {}

    fn make_jit_sequence(&mut self, code: &Code<BInstr>, cp: usize) -> Option<JitSequence> {
        if cp >= code.len() || self.landings(cp) < self.threshold || self.proposed.contains(&cp) {
            return None;
        }
        let span = group_containing(code, cp, self.granularity);
        self.proposed.insert(cp);
        if self.granularity == Granularity::Function {
            self.proposed.extend(span.cps.iter().copied());
        }
        Some(JitSequence {
            cps: span.cps,
            entry_points: span.entries,
            is_function: self.granularity == Granularity::Function,
            is_trace: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcode::decode;

    fn program() -> Code<BInstr> {
        decode("PUSH STACK_INT 1\nLABEL l\nPOP\nGOTO l").unwrap()
    }

    #[test]
    fn test_waits_for_threshold() {
        let code = program();
        let mut policy = GroupJit::new(Granularity::Block, 2);
        policy.notify_landing(1);
        assert_eq!(policy.make_jit_sequence(&code, 1), None);
        policy.notify_landing(1);
        let sequence = policy.make_jit_sequence(&code, 1).unwrap();
        assert_eq!(sequence.cps, vec![1, 2, 3]);
        assert_eq!(sequence.entry_points, vec![1]);
        assert!(!sequence.is_function && !sequence.is_trace);
    }

    #[test]
    fn test_proposes_each_cp_once() {
        let code = program();
        let mut policy = GroupJit::new(Granularity::Individual, 0);
        assert!(policy.make_jit_sequence(&code, 2).is_some());
        policy.notify_landing(2);
        assert_eq!(policy.make_jit_sequence(&code, 2), None);
        assert_eq!(policy.landings(2), 1);
    }

    #[test]
    fn test_group_is_proposed_once_for_all_its_cps() {
        let code = program();
        let mut policy = GroupJit::new(Granularity::Function, 0);
        assert!(policy.make_jit_sequence(&code, 1).is_some());
        for cp in 0..code.len() {
            policy.notify_landing(cp);
            assert_eq!(policy.make_jit_sequence(&code, cp), None, "{cp}");
        }
    }

    #[test]
    fn test_function_groups_are_marked() {
        let code = program();
        let mut policy = GroupJit::new(Granularity::Function, 1);
        policy.notify_landing(0);
        let sequence = policy.make_jit_sequence(&code, 0).unwrap();
        assert_eq!(sequence.cps, vec![0, 1, 2, 3]);
        assert!(sequence.is_function);
    }
}
