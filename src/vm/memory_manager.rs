use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::error::RuntimeError;
use super::machine::MachineState;
use super::memory::{Item, SharedMemoryManager};
use crate::config::MemoryPolicy;

/// Default capacity of a fixed-size memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Strategy deciding how memories grow and whether garbage is collected.
pub trait MemoryManager: fmt::Debug {
    /// New size for a memory currently holding `current` items.
    fn grow(&mut self, current: usize) -> Result<usize, RuntimeError>;

    /// Run a collection pass if this manager collects. Called at safe points only.
    fn collect_garbage(&mut self, state: &mut MachineState) -> Option<GcStats>;

    /// Whether heap exhaustion can be relieved by a collection.
    fn collects(&self) -> bool {
        false
    }
}

/// Outcome of one collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub live: usize,
    pub freed: usize,
}

/// Build the manager selected by `policy`.
pub fn shared_manager(policy: MemoryPolicy) -> SharedMemoryManager {
    match policy {
        MemoryPolicy::None => Rc::new(RefCell::new(NoAllocation::new(DEFAULT_CAPACITY))),
        MemoryPolicy::Amortized => Rc::new(RefCell::new(AmortizedAllocation)),
        MemoryPolicy::MarkCompact => Rc::new(RefCell::new(MarkCompactGc::new(DEFAULT_CAPACITY))),
    }
}

/// Sizes an empty memory once, then refuses to grow.
#[derive(Debug, Clone, Copy)]
pub struct NoAllocation {
    initial_size: usize,
}

impl NoAllocation {
    pub fn new(initial_size: usize) -> Self {
        Self { initial_size }
    }
}

impl MemoryManager for NoAllocation {
    fn grow(&mut self, current: usize) -> Result<usize, RuntimeError> {
        if current == 0 && self.initial_size > 0 {
            Ok(self.initial_size)
        } else {
            Err(RuntimeError::GrowthRejected { size: current })
        }
    }

    fn collect_garbage(&mut self, _state: &mut MachineState) -> Option<GcStats> {
        None
    }
}

/// Doubles the size on every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmortizedAllocation;

impl MemoryManager for AmortizedAllocation {
    fn grow(&mut self, current: usize) -> Result<usize, RuntimeError> {
        Ok(current.saturating_mul(2).max(4))
    }

    fn collect_garbage(&mut self, _state: &mut MachineState) -> Option<GcStats> {
        None
    }
}

/// Stop-the-world mark-compact collector over a fixed-capacity heap.
#[derive(Debug, Clone)]
pub struct MarkCompactGc {
    allocation: NoAllocation,
    collections: usize,
}

impl MarkCompactGc {
    pub fn new(capacity: usize) -> Self {
        Self {
            allocation: NoAllocation::new(capacity),
            collections: 0,
        }
    }

    pub fn collections(&self) -> usize {
        self.collections
    }

    /// Heap cells reachable from the live stack, in ascending order.
    fn mark(state: &MachineState) -> BTreeSet<usize> {
        let limit = state.hp.min(state.heap.size());
        let mut marked = BTreeSet::new();
        let mut worklist: Vec<usize> = state
            .stack
            .items()
            .iter()
            .take(state.sp)
            .filter(|item| item.tag.is_pointer() && item.as_index() < limit)
            .map(|item| item.as_index())
            .collect();

        while let Some(index) = worklist.pop() {
            if !marked.insert(index) {
                continue;
            }
            let Some(item) = state.heap.peek(index) else {
                continue;
            };
            if item.tag.is_pointer() && item.as_index() < limit {
                worklist.push(item.as_index());
            } else if item.tag.is_header() {
                let end = index.saturating_add(item.as_index()).min(limit);
                worklist.extend(index + 1..end);
            }
        }
        marked
    }
}

impl MemoryManager for MarkCompactGc {
    fn grow(&mut self, current: usize) -> Result<usize, RuntimeError> {
        self.allocation.grow(current)
    }

    fn collect_garbage(&mut self, state: &mut MachineState) -> Option<GcStats> {
        let size = state.heap.size();
        if size == 0 || 10 * state.hp < 9 * size {
            return None;
        }

        let marked = Self::mark(state);
        let mut compacted = vec![Item::default(); size];
        let mut relocation = HashMap::with_capacity(marked.len());
        for (new_index, &old_index) in marked.iter().enumerate() {
            if let Some(item) = state.heap.peek(old_index) {
                compacted[new_index] = item;
            }
            relocation.insert(old_index, new_index);
        }

        let relocate = |item: &mut Item| {
            if item.tag.is_pointer()
                && let Some(&new_index) = relocation.get(&item.as_index())
            {
                item.value = new_index as u64;
            }
        };
        compacted.iter_mut().take(marked.len()).for_each(relocate);
        let sp = state.sp.min(state.stack.size());
        state.stack.items_mut()[..sp].iter_mut().for_each(relocate);

        let freed = state.hp.saturating_sub(marked.len());
        state.heap.replace_items(compacted);
        state.hp = marked.len();
        self.collections += 1;
        debug!(live = marked.len(), freed, collections = self.collections, "heap collected");
        Some(GcStats {
            live: marked.len(),
            freed,
        })
    }

    fn collects(&self) -> bool {
        true
    }
}
