use tracing::{Level, debug, enabled, trace};

use super::{
    ConstantFolding, CopyPropagation, DeadCodeElimination, Optimization, RedundantChecks, UnusedWrites, build_graph,
    render_graph,
};
use crate::code::Code;
use crate::config::OptimizationPass;
use crate::tcode::{OptimizationError, TState};
use crate::ucode::{UInstr, render_positions, to_tcode};

fn make_pass(pass: OptimizationPass) -> Box<dyn Optimization> {
    match pass {
        OptimizationPass::RedundantChecks => Box::new(RedundantChecks),
        OptimizationPass::UnusedWrites => Box::new(UnusedWrites),
        OptimizationPass::CopyPropagation => Box::new(CopyPropagation),
        OptimizationPass::DeadCode => Box::new(DeadCodeElimination),
        OptimizationPass::ConstantFolding => Box::new(ConstantFolding),
    }
}

/// The configured passes, run in order over every group before compilation.
pub struct OptimizationPipeline {
    passes: Vec<Box<dyn Optimization>>,
}

impl OptimizationPipeline {
    pub fn new(passes: &[OptimizationPass]) -> Self {
        Self {
            passes: passes.iter().copied().map(make_pass).collect(),
        }
    }

    /// Optimize the U-code of a group, one `Code` per position. A group that
    /// cannot be optimized is returned as it came in.
    pub fn optimize(&self, positions: Vec<Code<UInstr>>, entries: &[usize], function_mode: bool) -> Vec<Code<UInstr>> {
        if self.passes.is_empty() {
            return positions;
        }
        match self.try_optimize(&positions, entries, function_mode) {
            Ok(optimized) => optimized,
            Err(err) => {
                debug!(%err, "group left unoptimized");
                positions
            }
        }
    }

    pub fn try_optimize(
        &self,
        positions: &[Code<UInstr>],
        entries: &[usize],
        function_mode: bool,
    ) -> Result<Vec<Code<UInstr>>, OptimizationError> {
        let dump = enabled!(Level::DEBUG);
        if dump {
            debug!(?entries, "U-code before optimization:\n{}", render_positions(positions));
        }
        let mut state = TState::new(function_mode);
        let line = to_tcode(positions, &mut state)?;
        let mut graph = build_graph(line, entries, function_mode);
        if dump {
            debug!(?entries, "T-code before optimization:\n{}", render_graph(&graph));
        }
        for pass in &self.passes {
            let changed = pass.run(&mut graph, function_mode)?;
            trace!(pass = pass.name(), changed, "optimization pass");
        }
        if dump {
            debug!(?entries, "T-code after optimization:\n{}", render_graph(&graph));
        }

        let mut optimized = vec![Code::new(); positions.len()];
        for instr in graph.into_values() {
            let pos = instr.pos;
            optimized[pos].push(instr.to_u()?);
        }
        if dump {
            debug!(?entries, "U-code after optimization:\n{}", render_positions(&optimized));
        }
        Ok(optimized)
    }
}
