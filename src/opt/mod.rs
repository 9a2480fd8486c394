//! Dataflow optimizations over the T-code flow graph of one group.

mod constant_folding;
mod copy_propagation;
mod dead_code;
mod pipeline;
mod redundant_checks;
mod unused_writes;

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

pub use constant_folding::ConstantFolding;
pub use copy_propagation::CopyPropagation;
pub use dead_code::DeadCodeElimination;
pub use pipeline::OptimizationPipeline;
pub use redundant_checks::RedundantChecks;
pub use unused_writes::UnusedWrites;

use crate::flow_graph::FlowGraph;
use crate::tcode::{OptimizationError, TInstr, TKind, VarId, VarKind};
use crate::ucode::{LocKind, UArg};

pub type TGraph = FlowGraph<TInstr>;

/// One pass over a group's graph. Returns whether anything changed.
pub trait Optimization {
    fn name(&self) -> &'static str;

    fn run(&self, graph: &mut TGraph, function_mode: bool) -> Result<bool, OptimizationError>;
}

/// Put a T-code line into a graph. In function mode branches get edges to
/// their destinations, guards may leave the group, and jumps and returns do
/// not fall through. Traces continue past a jump, so there they keep the line.
pub fn build_graph(line: Vec<TInstr>, entries: &[usize], function_mode: bool) -> TGraph {
    let mut graph = FlowGraph::new();
    for instr in line {
        let key = instr.cp;
        let target = match instr.kind {
            TKind::Goto(dest) | TKind::Branch { dest, .. } => Some(dest),
            _ => None,
        };
        let guard = matches!(instr.kind, TKind::Guard);
        let ends_line = match instr.kind {
            TKind::Halt => true,
            TKind::Goto(_) | TKind::Return { .. } => function_mode,
            _ => false,
        };
        let id = graph.add_node(key, instr);
        if function_mode {
            if let Some(dest) = target {
                graph.add_edge_to_key(id, dest);
            }
            if guard {
                graph.mark_out_edge(id);
            }
        }
        if ends_line {
            graph.end_line(id);
        }
    }
    graph.set_roots(entries);
    graph
}

/// The live instructions of a graph, one per line.
pub fn render_graph(graph: &TGraph) -> String {
    let mut out = String::new();
    for instr in graph.ids().filter_map(|id| graph.value(id)) {
        let _ = writeln!(out, "{instr}");
    }
    out
}

/// Every stack-backed variable mentioned in the graph.
pub(crate) fn stack_vars(graph: &TGraph) -> BTreeSet<VarId> {
    graph
        .ids()
        .filter_map(|id| graph.value(id))
        .flat_map(|instr| instr.read_args().into_iter().chain(instr.write_args()))
        .filter_map(|arg| arg.var())
        .filter(|var| var.kind == VarKind::Stack)
        .map(|var| var.id)
        .collect()
}

/// Base of every stack variable: `sp` or `fp`.
pub(crate) fn stack_bases(graph: &TGraph) -> HashMap<VarId, LocKind> {
    let mut bases = HashMap::new();
    for instr in graph.ids().filter_map(|id| graph.value(id)) {
        for arg in instr.read_args().into_iter().chain(instr.write_args()) {
            if let Some(var) = arg.var()
                && var.kind == VarKind::Stack
                && let UArg::Loc(location) = var.origin
            {
                bases.insert(var.id, location.kind);
            }
        }
    }
    bases
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::bcode;
    use crate::tcode::TState;
    use crate::ucode::to_tcode;

    /// Graph of a whole program, entered at 0.
    pub fn graph_of(source: &str, function_mode: bool) -> TGraph {
        let code = bcode::decode(source).unwrap();
        let positions: Vec<_> = code
            .iter()
            .enumerate()
            .map(|(cp, instr)| bcode::lower(instr, cp))
            .collect();
        let mut state = TState::new(function_mode);
        let line = to_tcode(&positions, &mut state).unwrap();
        build_graph(line, &[0], function_mode)
    }

    pub fn count(graph: &TGraph, pred: impl Fn(&TInstr) -> bool) -> usize {
        graph
            .ids()
            .filter_map(|id| graph.value(id))
            .filter(|instr| pred(instr))
            .count()
    }
}
