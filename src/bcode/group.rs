use super::instr::BInstr;
use crate::code::Code;

/// Syntactic unit compiled by the group policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Individual,
    Block,
    Function,
}

/// A contiguous range of instructions and the cps it may be entered at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpan {
    pub cps: Vec<usize>,
    pub entries: Vec<usize>,
}

/// The group of `granularity` that contains `cp`.
pub fn group_containing(code: &Code<BInstr>, cp: usize, granularity: Granularity) -> GroupSpan {
    let (start, end) = match granularity {
        Granularity::Individual => (cp, cp + 1),
        Granularity::Block => block_range(code, cp),
        Granularity::Function => function_range(code, cp),
    };

    let mut entries = vec![start];
    let mut add_entry = |entry: usize| {
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    };
    add_entry(cp);
    // A function is compiled once, so it is entered at every label and
    // return site, not only where it first got hot.
    if granularity == Granularity::Function {
        for index in start..end {
            if code[index].starts_block() {
                add_entry(index);
            }
            if code[index].precedes_entry() && index + 1 < end {
                add_entry(index + 1);
            }
        }
    }

    GroupSpan {
        cps: (start..end).collect(),
        entries,
    }
}

/// From `cp` up to and including the next block end.
fn block_range(code: &Code<BInstr>, cp: usize) -> (usize, usize) {
    let end = (cp..code.len())
        .find(|&index| code[index].ends_block())
        .map_or(code.len(), |index| index + 1);
    (cp, end)
}

/// From the nearest `FUNCTION` at or before `cp` (or 0) up to the next one.
fn function_range(code: &Code<BInstr>, cp: usize) -> (usize, usize) {
    let start = (0..=cp)
        .rev()
        .find(|&index| code[index].starts_function())
        .unwrap_or(0);
    let end = (cp + 1..code.len())
        .find(|&index| code[index].starts_function())
        .unwrap_or(code.len());
    (start, end)
}
