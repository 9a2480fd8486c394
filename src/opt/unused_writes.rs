use std::collections::HashMap;

use super::{Optimization, TGraph};
use crate::flow_graph::NodeId;
use crate::tcode::{Effect, OptimizationError, TKind, VarId, VarKind};

/// Inside a block, drops a write that is overwritten before anything reads it.
pub struct UnusedWrites;

impl Optimization for UnusedWrites {
    fn name(&self) -> &'static str {
        "unused-writes"
    }

    fn run(&self, graph: &mut TGraph, _function_mode: bool) -> Result<bool, OptimizationError> {
        let mut unused = Vec::new();
        for block in graph.blocks() {
            // last unread plain write of each variable
            let mut pending: HashMap<VarId, (NodeId, VarKind)> = HashMap::new();
            for id in block {
                let Some(instr) = graph.value(id) else {
                    continue;
                };
                for read in instr.reads() {
                    pending.remove(&read);
                }
                if matches!(
                    instr.kind,
                    TKind::Label | TKind::Guard | TKind::Apply { .. } | TKind::Return { .. } | TKind::Halt
                ) {
                    pending.retain(|_, (_, kind)| *kind != VarKind::Stack);
                }
                for write in instr.writes() {
                    if let Some((earlier, _)) = pending.remove(&write) {
                        unused.push(earlier);
                    }
                }
                if let Effect::Write(var) = instr.effect()
                    && let Some(kind) = instr.write_args().first().and_then(|arg| arg.kind())
                {
                    pending.insert(var, (id, kind));
                }
            }
        }
        for &id in &unused {
            graph.remove(id);
        }
        Ok(!unused.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::CopyPropagation;
    use crate::opt::test_support::{count, graph_of};

    fn stores(graph: &TGraph) -> usize {
        count(graph, |t| matches!(&t.kind, TKind::Move { dst, .. } if dst.location().is_some()))
    }

    #[test]
    fn test_forwarded_register_loads_go() {
        let mut graph = graph_of("PUSH STACK_INT 1\nPUSH STACK_INT 2\nSWAP\nHALT", true);
        // routed through registers, every load is read before the register is reused
        assert!(!UnusedWrites.run(&mut graph, true).unwrap());
        CopyPropagation.run(&mut graph, true).unwrap();
        // forwarding removed the reads of the tag loads before r0 and r1 are reloaded
        assert!(UnusedWrites.run(&mut graph, true).unwrap());
        assert!(!UnusedWrites.run(&mut graph, true).unwrap());
    }

    #[test]
    fn test_stack_writes_before_label_stay() {
        // the second PUSH rewrites the same word, but a label lies between
        let mut graph = graph_of("PUSH STACK_INT 1\nPOP\nPUSH STACK_INT 2\nHALT", true);
        assert!(!UnusedWrites.run(&mut graph, true).unwrap());
        assert_eq!(stores(&graph), 4);
    }
}
