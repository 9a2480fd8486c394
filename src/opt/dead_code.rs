use std::collections::{HashMap, VecDeque};

use super::{Optimization, TGraph, stack_vars};
use crate::flow_graph::NodeId;
use crate::tcode::{Effect, OptimizationError, TKind, VarId};

/// Removes plain writes whose value is never read afterwards.
///
/// Stack words are observable wherever the compiled code may stop: at every
/// instruction boundary and wherever control leaves the group.
pub struct DeadCodeElimination;

/// Fixed-size set of dense variable indices.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VarSet(Vec<u64>);

impl VarSet {
    fn new(len: usize) -> Self {
        Self(vec![0; len.div_ceil(64)])
    }

    fn insert(&mut self, index: usize) {
        self.0[index / 64] |= 1u64 << (index % 64);
    }

    fn remove(&mut self, index: usize) {
        self.0[index / 64] &= !(1u64 << (index % 64));
    }

    fn contains(&self, index: usize) -> bool {
        self.0[index / 64] & (1u64 << (index % 64)) != 0
    }

    fn union(&mut self, other: &VarSet) {
        for (word, other) in self.0.iter_mut().zip(&other.0) {
            *word |= other;
        }
    }
}

/// Live variables after each node. A plain write whose target is dead does
/// not make its operands live, so one pass of removal catches whole chains.
struct Liveness {
    index: HashMap<VarId, usize>,
    live_out: Vec<VarSet>,
}

impl Liveness {
    fn solve(graph: &TGraph) -> Self {
        let mut index = HashMap::new();
        for instr in graph.ids().filter_map(|id| graph.value(id)) {
            for var in instr.reads().chain(instr.writes()) {
                let next = index.len();
                index.entry(var).or_insert(next);
            }
        }
        let vars = index.len();
        let mut stack = VarSet::new(vars);
        for var in stack_vars(graph) {
            if let Some(&i) = index.get(&var) {
                stack.insert(i);
            }
        }

        let mut live_in = vec![VarSet::new(vars); graph.len()];
        let mut live_out = vec![VarSet::new(vars); graph.len()];
        let mut queued = vec![true; graph.len()];
        let mut worklist: VecDeque<NodeId> = graph.ids().rev().collect();
        while let Some(id) = worklist.pop_front() {
            queued[id] = false;
            let leaves = graph.succ(id).is_empty()
                || graph.has_out_edge(id)
                || graph
                    .value(id)
                    .is_some_and(|instr| matches!(instr.kind, TKind::Guard | TKind::Halt));
            let mut out = if leaves { stack.clone() } else { VarSet::new(vars) };
            for &succ in graph.succ(id) {
                out.union(&live_in[succ]);
            }

            let mut live = out.clone();
            if let Some(instr) = graph.value(id) {
                let dead_write = match instr.effect() {
                    Effect::Write(var) => !out.contains(index[&var]),
                    _ => false,
                };
                if !dead_write {
                    for write in instr.writes() {
                        live.remove(index[&write]);
                    }
                    for read in instr.reads() {
                        live.insert(index[&read]);
                    }
                }
                if instr.is_label() {
                    live.union(&stack);
                }
            }
            live_out[id] = out;
            if live != live_in[id] {
                live_in[id] = live;
                for &pred in graph.pred(id) {
                    if !queued[pred] {
                        queued[pred] = true;
                        worklist.push_back(pred);
                    }
                }
            }
        }
        Self { index, live_out }
    }

    fn is_live_after(&self, id: NodeId, var: VarId) -> bool {
        self.index.get(&var).is_some_and(|&i| self.live_out[id].contains(i))
    }
}

impl Optimization for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn run(&self, graph: &mut TGraph, _function_mode: bool) -> Result<bool, OptimizationError> {
        let liveness = Liveness::solve(graph);
        let dead: Vec<_> = graph
            .ids()
            .filter(|&id| match graph.value(id).map(|instr| instr.effect()) {
                Some(Effect::Write(var)) => !liveness.is_live_after(id, var),
                _ => false,
            })
            .collect();
        for &id in &dead {
            graph.remove(id);
        }
        Ok(!dead.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::test_support::{count, graph_of};
    use crate::opt::{ConstantFolding, CopyPropagation};
    use crate::ucode::Reg;

    #[test]
    fn test_forwarded_loads_die() {
        let mut graph = graph_of("PUSH STACK_INT 2\nPUSH STACK_INT 3\nOPER ADD\nHALT", true);
        let before = count(&graph, |_| true);
        CopyPropagation.run(&mut graph, true).unwrap();
        ConstantFolding.run(&mut graph, true).unwrap();
        assert!(DeadCodeElimination.run(&mut graph, true).unwrap());
        assert!(count(&graph, |_| true) < before);
        assert!(!DeadCodeElimination.run(&mut graph, true).unwrap());
    }

    #[test]
    fn test_stack_writes_survive_instruction_boundaries() {
        let mut graph = graph_of("PUSH STACK_INT 2\nHALT", true);
        DeadCodeElimination.run(&mut graph, true).unwrap();
        let stores = count(&graph, |t| {
            matches!(&t.kind, TKind::Move { dst, .. } if dst.location().is_some())
        });
        assert_eq!(stores, 2);
    }

    #[test]
    fn test_machine_registers_are_kept() {
        let mut graph = graph_of("PUSH STACK_UNIT\nPOP\nHALT", false);
        DeadCodeElimination.run(&mut graph, false).unwrap();
        let bumps = count(&graph, |t| t.writes_machine(Reg::Sp) || t.writes_machine(Reg::Cp));
        assert_eq!(bumps, 4);
    }

    #[test]
    fn test_dead_chains_go_in_one_run() {
        let mut graph = graph_of("PUSH STACK_INT 2\nPUSH STACK_INT 3\nOPER ADD\nUNARY NEG\nPOP\nPUSH STACK_UNIT\nHALT", false);
        CopyPropagation.run(&mut graph, false).unwrap();
        DeadCodeElimination.run(&mut graph, false).unwrap();
        let after_one = count(&graph, |_| true);
        // nothing is left for a second run
        assert!(!DeadCodeElimination.run(&mut graph, false).unwrap());
        assert_eq!(count(&graph, |_| true), after_one);
    }

    #[test]
    fn test_liveness_reaches_around_loops() {
        let graph = graph_of("LABEL top\nPUSH STACK_INT 1\nPOP\nGOTO top", true);
        let liveness = Liveness::solve(&graph);
        let first = graph.first_of(0).unwrap();
        let stack = stack_vars(&graph);
        assert!(!stack.is_empty());
        // labels expose every stack word, so the jump back keeps them live
        let goto = graph
            .ids()
            .find(|&id| matches!(graph.value(id).map(|t| &t.kind), Some(TKind::Goto(_))))
            .unwrap();
        assert_eq!(graph.succ(goto), &[first]);
        for var in stack {
            assert!(liveness.is_live_after(goto, var));
        }
    }

    #[test]
    fn test_live_loads_are_kept() {
        let mut graph = graph_of("PUSH STACK_INT 1\nPUSH STACK_INT 2\nOPER LT\nHALT", false);
        let loads_before = count(&graph, |t| t.reads().count() > 0 && matches!(t.effect(), Effect::Write(_)));
        assert!(!DeadCodeElimination.run(&mut graph, false).unwrap());
        let loads_after = count(&graph, |t| t.reads().count() > 0 && matches!(t.effect(), Effect::Write(_)));
        assert_eq!(loads_before, loads_after);
    }
}
