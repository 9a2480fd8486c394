use super::{Optimization, TGraph};
use crate::tcode::{Fold, OptimizationError};

/// Evaluates operations on immediates, settles branches on constant
/// conditions and drops tag checks of known tags.
pub struct ConstantFolding;

impl Optimization for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&self, graph: &mut TGraph, _function_mode: bool) -> Result<bool, OptimizationError> {
        let mut changed = false;
        for id in graph.ids() {
            // a replacement may fold again, e.g. a unary over a folded move
            while let Some(instr) = graph.value(id) {
                match instr.fold()? {
                    Fold::Keep => break,
                    Fold::Remove => {
                        graph.remove(id);
                        changed = true;
                    }
                    Fold::Replace(kind) => {
                        if let Some(instr) = graph.value_mut(id) {
                            instr.kind = kind;
                        }
                        changed = true;
                    }
                }
            }
        }
        Ok(changed)
    }
}
