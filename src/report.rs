//! Rendering of results and execution statistics.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::vm::{Item, MachineState, Status, Tag};

/// Text shown for a failed run or a value that cannot be shown.
pub const ERROR: &str = "ERROR";

/// Render the item on top of the stack as the program result.
pub fn render_result(state: &MachineState) -> String {
    if state.status == Status::RuntimeError {
        return ERROR.to_string();
    }
    match state.top() {
        Some(item) => render_item(state, item),
        None => ERROR.to_string(),
    }
}

fn render_item(state: &MachineState, item: Item) -> String {
    match item.tag {
        Tag::Unit => "()".to_string(),
        Tag::Bool => item.as_bool().to_string(),
        Tag::Int => item.as_int().to_string(),
        Tag::HeapRef => "reference".to_string(),
        Tag::HeapIndex => render_object(state, item.as_index()).unwrap_or_else(|| ERROR.to_string()),
        _ => ERROR.to_string(),
    }
}

/// Heap objects with a printed form. Only pairs have one.
fn render_object(state: &MachineState, index: usize) -> Option<String> {
    let header = state.heap.peek(index)?;
    if header.tag != Tag::PairHeader {
        return None;
    }
    let first = state.heap.peek(index + 1)?;
    let second = state.heap.peek(index + 2)?;
    Some(format!("({}, {})", render_item(state, first), render_item(state, second)))
}

/// Counters collected while running a program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStatistics {
    pub code_size: usize,
    /// Instructions in the compiled group entered at each cp.
    pub length: Vec<usize>,
    /// Runs of the compiled group entered at each cp.
    pub compiled_usage: Vec<usize>,
    pub interpreted_count: usize,
    pub compiled_count: usize,
}

impl ExecutionStatistics {
    pub fn new(code_size: usize) -> Self {
        Self {
            code_size,
            length: vec![0; code_size],
            compiled_usage: vec![0; code_size],
            interpreted_count: 0,
            compiled_count: 0,
        }
    }

    pub fn add_compiled(&mut self, cp: usize, len: usize) {
        if let Some(length) = self.length.get_mut(cp) {
            *length = len;
        }
    }

    pub fn count_run_jit(&mut self, cp: usize) {
        if cp < self.code_size {
            self.compiled_count += self.length[cp];
            self.compiled_usage[cp] += 1;
        }
    }

    pub fn count_interpreted(&mut self) {
        self.interpreted_count += 1;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ExecutionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "JIT compilation statistics:")?;
        writeln!(
            f,
            "Total number of interpreted instructions executed: {}",
            self.interpreted_count
        )?;
        writeln!(
            f,
            "Total number of compiled instructions executed: {}",
            self.compiled_count
        )?;
        writeln!(f, "Usage of compiled instructions:")?;
        writeln!(f, "{:>10}{:>10}{:>10}", "cp", "length", "compiled")?;
        for cp in 0..self.code_size {
            writeln!(f, "{:>10}{:>10}{:>10}", cp, self.length[cp], self.compiled_usage[cp])?;
        }
        Ok(())
    }
}

/// Wall clock time of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    started: Option<Instant>,
    duration: Duration,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.duration = started.elapsed();
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn duration_ns(&self) -> u128 {
        self.duration.as_nanos()
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = self.duration_ns();
        write!(
            f,
            "Time:  {}s {}ms {}us {}ns",
            ns / 1_000_000_000,
            (ns / 1_000_000) % 1_000,
            (ns / 1_000) % 1_000,
            ns % 1_000
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryPolicy;
    use crate::vm::{RuntimeError, shared_manager};

    fn state_with(stack: &[Item], heap: &[Item]) -> MachineState {
        let mut state = MachineState::new(shared_manager(MemoryPolicy::Amortized));
        for (i, &item) in stack.iter().enumerate() {
            state.stack.set(i, item).unwrap();
        }
        for (i, &item) in heap.iter().enumerate() {
            state.heap.set(i, item).unwrap();
        }
        state.sp = stack.len();
        state.hp = heap.len();
        state
    }

    #[test]
    fn test_scalars() {
        assert_eq!(render_result(&state_with(&[Item::int(-7)], &[])), "-7");
        assert_eq!(render_result(&state_with(&[Item::boolean(false)], &[])), "false");
        assert_eq!(render_result(&state_with(&[Item::unit()], &[])), "()");
        assert_eq!(render_result(&state_with(&[Item::new(Tag::HeapRef, 0)], &[])), "reference");
        assert_eq!(render_result(&state_with(&[Item::new(Tag::CodeIndex, 3)], &[])), ERROR);
    }

    #[test]
    fn test_nested_pairs() {
        let heap = [
            Item::new(Tag::PairHeader, 3),
            Item::unit(),
            Item::int(5),
            Item::new(Tag::PairHeader, 3),
            Item::new(Tag::HeapIndex, 0),
            Item::boolean(true),
        ];
        let state = state_with(&[Item::new(Tag::HeapIndex, 3)], &heap);
        assert_eq!(render_result(&state), "(((), 5), true)");
    }

    #[test]
    fn test_sums_do_not_render() {
        let heap = [Item::new(Tag::InlHeader, 2), Item::int(1)];
        let state = state_with(&[Item::new(Tag::HeapIndex, 0)], &heap);
        assert_eq!(render_result(&state), ERROR);
    }

    #[test]
    fn test_errors_and_empty_stacks() {
        let mut state = state_with(&[Item::int(1)], &[]);
        state.fail(RuntimeError::DivisionByZero);
        assert_eq!(render_result(&state), ERROR);
        assert_eq!(render_result(&state_with(&[], &[])), ERROR);
    }

    #[test]
    fn test_statistics_count_compiled_lengths() {
        let mut stats = ExecutionStatistics::new(4);
        stats.add_compiled(1, 3);
        stats.count_run_jit(1);
        stats.count_run_jit(1);
        stats.count_interpreted();
        assert_eq!(stats.compiled_count, 6);
        assert_eq!(stats.compiled_usage, vec![0, 2, 0, 0]);
        assert_eq!(stats.interpreted_count, 1);
        assert!(stats.to_string().contains("compiled instructions executed: 6"));
        assert!(stats.to_json().unwrap().contains("\"compiled_count\": 6"));
    }

    #[test]
    fn test_timer_format() {
        let timer = Timer {
            started: None,
            duration: Duration::from_nanos(2_003_004_005),
        };
        assert_eq!(timer.to_string(), "Time:  2s 3ms 4us 5ns");
    }
}
