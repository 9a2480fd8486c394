use std::collections::{BTreeSet, HashMap};

use super::{Optimization, TGraph, stack_bases};
use crate::flow_graph::NodeId;
use crate::tcode::{Effect, OptimizationError, TInstr, VarId};
use crate::ucode::LocKind;
use crate::vm::Tag;

/// Removes bounds and tag checks already established on every path.
pub struct RedundantChecks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Fact {
    Tag(VarId, Tag, Tag),
    Bounds(VarId),
}

impl Fact {
    fn of(instr: &TInstr) -> Option<Fact> {
        match instr.effect() {
            Effect::TagCheck { var, a, b } => Some(Fact::Tag(var, a, b)),
            Effect::BoundsCheck(var) => Some(Fact::Bounds(var)),
            _ => None,
        }
    }
}

/// `None` is the set of all facts, the start value of unvisited nodes.
type Facts = Option<BTreeSet<Fact>>;

fn meet(into: &mut Facts, other: &Facts) {
    match (into.as_mut(), other) {
        (_, None) => {}
        (None, Some(other)) => *into = Some(other.clone()),
        (Some(into), Some(other)) => into.retain(|fact| other.contains(fact)),
    }
}

fn transfer(graph: &TGraph, id: NodeId, facts: &Facts, bases: &HashMap<VarId, LocKind>) -> Facts {
    let mut facts = facts.clone()?;
    if let Some(instr) = graph.value(id) {
        for write in instr.writes() {
            let base = bases.get(&write);
            facts.retain(|fact| match fact {
                // bounds depend on the address only, and memory never shrinks
                Fact::Bounds(_) => true,
                // a stack write may also land on a word known under the other base
                Fact::Tag(var, ..) => {
                    *var != write
                        && match (base, bases.get(var)) {
                            (Some(written), Some(known)) => written == known,
                            _ => true,
                        }
                }
            });
        }
        facts.extend(Fact::of(instr));
    }
    Some(facts)
}

fn available(graph: &TGraph, bases: &HashMap<VarId, LocKind>) -> Vec<Facts> {
    let mut facts_in: Vec<Facts> = vec![None; graph.len()];
    let mut facts_out: Vec<Facts> = vec![None; graph.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for id in graph.ids() {
            let mut facts = if graph.is_root(id) || graph.pred(id).is_empty() {
                Some(BTreeSet::new())
            } else {
                None
            };
            for &pred in graph.pred(id) {
                meet(&mut facts, &facts_out[pred]);
            }
            let out = transfer(graph, id, &facts, bases);
            if out != facts_out[id] || facts != facts_in[id] {
                facts_in[id] = facts;
                facts_out[id] = out;
                changed = true;
            }
        }
    }
    facts_in
}

impl Optimization for RedundantChecks {
    fn name(&self) -> &'static str {
        "redundant-checks"
    }

    fn run(&self, graph: &mut TGraph, _function_mode: bool) -> Result<bool, OptimizationError> {
        let bases = stack_bases(graph);
        let facts_in = available(graph, &bases);
        let redundant: Vec<NodeId> = graph
            .ids()
            .filter(|&id| {
                let fact = graph.value(id).and_then(Fact::of);
                match (fact, &facts_in[id]) {
                    (Some(fact), Some(known)) => known.contains(&fact),
                    _ => false,
                }
            })
            .collect();
        for &id in &redundant {
            graph.remove(id);
        }
        Ok(!redundant.is_empty())
    }
}
