use super::{JitPolicy, JitSequence};
use crate::bcode::BInstr;
use crate::code::Code;

/// Longest trace that is still compiled, counting skipped instructions.
pub const MAX_TRACE_LENGTH: usize = 256;

/// Records the path taken from a hot backward-branch target until it comes
/// back around, then compiles that path.
#[derive(Debug, Clone)]
pub struct TracingJit {
    threshold: usize,
    max_length: usize,
    /// Landings at backward-branch targets.
    landings: Vec<usize>,
    trace: Vec<usize>,
    /// Instructions run since the trace went through compiled code.
    skipped: usize,
    prev_cp: usize,
}

impl TracingJit {
    pub fn new(threshold: usize) -> Self {
        Self::with_max_length(threshold, MAX_TRACE_LENGTH)
    }

    pub fn with_max_length(threshold: usize, max_length: usize) -> Self {
        Self {
            threshold,
            max_length,
            landings: Vec::new(),
            trace: Vec::new(),
            skipped: 0,
            prev_cp: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        !self.trace.is_empty()
    }

    fn reset(&mut self) {
        self.trace.clear();
        self.skipped = 0;
    }
}

impl JitPolicy for TracingJit {
    fn notify_landing(&mut self, cp: usize) {
        if self.trace.is_empty() {
            // only backward jumps start a trace
            if cp < self.prev_cp {
                if cp >= self.landings.len() {
                    self.landings.resize(cp + 1, 0);
                }
                self.landings[cp] += 1;
                if self.landings[cp] >= self.threshold {
                    self.trace.push(cp);
                    self.skipped = 0;
                }
            }
        } else if self.skipped > 0 {
            self.skipped += 1;
        } else {
            self.trace.push(cp);
        }
        self.prev_cp = cp;
    }

    fn notify_run_jit(&mut self, _cp: usize) {
        if self.skipped == 0 {
            if self.trace.len() == 1 {
                self.trace.clear();
            } else {
                self.skipped = 1;
            }
        }
        self.prev_cp = usize::MAX;
    }

    fn make_jit_sequence(&mut self, _code: &Code<BInstr>, cp: usize) -> Option<JitSequence> {
        if self.trace.len() + self.skipped >= self.max_length {
            self.reset();
            return None;
        }
        if self.trace.len() + self.skipped > 1 && self.trace.first() == Some(&cp) {
            let mut cps = std::mem::take(&mut self.trace);
            // the closing landing is the start again
            cps.pop();
            self.reset();
            return Some(JitSequence {
                entry_points: vec![cp],
                cps,
                is_function: false,
                is_trace: true,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcode::decode;

    fn code() -> Code<BInstr> {
        decode("LABEL l\nPOP\nPOP\nGOTO l").unwrap()
    }

    fn land(policy: &mut TracingJit, code: &Code<BInstr>, cps: &[usize]) -> Option<JitSequence> {
        let mut proposed = None;
        for &cp in cps {
            policy.notify_landing(cp);
            if let Some(sequence) = policy.make_jit_sequence(code, cp) {
                proposed = Some(sequence);
            }
        }
        proposed
    }

    #[test]
    fn test_records_one_loop_iteration() {
        let code = code();
        let mut policy = TracingJit::new(1);
        // the first pass is straight line code; the backward jump to 0 is hot
        assert_eq!(land(&mut policy, &code, &[0, 1, 2, 3]), None);
        assert!(!policy.is_recording());
        let sequence = land(&mut policy, &code, &[0, 1, 2, 3, 0]).unwrap();
        assert_eq!(sequence.cps, vec![0, 1, 2, 3]);
        assert_eq!(sequence.entry_points, vec![0]);
        assert!(sequence.is_trace);
        assert!(!policy.is_recording());
    }

    #[test]
    fn test_threshold_counts_backward_landings() {
        let code = code();
        let mut policy = TracingJit::new(2);
        land(&mut policy, &code, &[0, 1, 2, 3, 0, 1, 2, 3]);
        assert!(!policy.is_recording());
        land(&mut policy, &code, &[0]);
        assert!(policy.is_recording());
    }

    #[test]
    fn test_single_landing_before_compiled_code_is_dropped() {
        let code = code();
        let mut policy = TracingJit::new(1);
        land(&mut policy, &code, &[0, 1, 2, 3, 0]);
        assert!(policy.is_recording());
        policy.notify_run_jit(0);
        assert!(!policy.is_recording());
    }

    #[test]
    fn test_long_traces_are_discarded() {
        let code = code();
        let mut policy = TracingJit::with_max_length(1, 3);
        land(&mut policy, &code, &[3, 0, 1]);
        assert!(policy.is_recording());
        assert_eq!(land(&mut policy, &code, &[2]), None);
        assert!(!policy.is_recording());
    }
}
