use std::collections::HashMap;

use super::{Optimization, TGraph, stack_bases};
use crate::flow_graph::NodeId;
use crate::tcode::{OptimizationError, TArg, TKind, VarId, VarKind};
use crate::ucode::{LocKind, Reg};

/// Forwards the source of a move to later reads of its destination.
///
/// A copy `d <- s` is forwarded along the straight line after it until `d` or
/// `s` is written, or control can arrive from elsewhere. Copies into stack
/// words also stop where the stack may be reached through another base.
pub struct CopyPropagation;

struct Candidate {
    dst: VarId,
    src: TArg,
    base: Option<LocKind>,
}

impl Candidate {
    fn of(kind: &TKind, bases: &HashMap<VarId, LocKind>) -> Option<Self> {
        let TKind::Move { dst, src, .. } = kind else {
            return None;
        };
        let dst_var = dst.var()?;
        if !matches!(dst_var.kind, VarKind::General | VarKind::Stack) || src.is_memory() || src.is(dst_var.id) {
            return None;
        }
        Some(Self {
            dst: dst_var.id,
            src: *src,
            base: bases.get(&dst_var.id).copied(),
        })
    }

    /// Whether the copy still holds after `kind` ran.
    fn survives(&self, kind: &TKind, writes: &[VarId], bases: &HashMap<VarId, LocKind>) -> bool {
        if writes.contains(&self.dst) || self.src.id().is_some_and(|src| writes.contains(&src)) {
            return false;
        }
        let Some(base) = self.base else {
            return true;
        };
        if matches!(kind, TKind::Apply { .. } | TKind::Return { .. }) {
            return false;
        }
        writes.iter().all(|write| match bases.get(write) {
            Some(other) => *other == base,
            None => true,
        })
    }
}

impl CopyPropagation {
    fn forward(graph: &mut TGraph, copy: &Candidate, rest: &[NodeId], bases: &HashMap<VarId, LocKind>) -> bool {
        let mut changed = false;
        for &id in rest {
            if graph.is_join(id) {
                break;
            }
            let Some(instr) = graph.value_mut(id) else {
                continue;
            };
            changed |= instr.propagate_copy(copy.dst, &copy.src);
            let writes: Vec<VarId> = instr.writes().collect();
            let moves_frame = instr.writes_machine(Reg::Fp);
            if !copy.survives(&instr.kind, &writes, bases) || (copy.base.is_some() && moves_frame) {
                break;
            }
        }
        changed
    }
}

impl Optimization for CopyPropagation {
    fn name(&self) -> &'static str {
        "copy-propagation"
    }

    fn run(&self, graph: &mut TGraph, function_mode: bool) -> Result<bool, OptimizationError> {
        let bases = stack_bases(graph);
        let regions = if function_mode {
            graph.blocks()
        } else {
            vec![graph.ids().collect()]
        };
        let mut changed = false;
        for region in regions {
            for (at, &id) in region.iter().enumerate() {
                let Some(copy) = graph.value(id).and_then(|instr| Candidate::of(&instr.kind, &bases)) else {
                    continue;
                };
                changed |= Self::forward(graph, &copy, &region[at + 1..], &bases);
            }
        }
        Ok(changed)
    }
}
