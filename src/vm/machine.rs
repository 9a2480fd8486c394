use std::rc::Rc;

use serde::Serialize;

use super::error::RuntimeError;
use super::memory::{Item, Memory, SharedMemoryManager};
use super::memory_manager::GcStats;

/// Execution status of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Running,
    Halted,
    RuntimeError,
}

impl Status {
    /// Word stored in the native frame.
    pub const fn code(self) -> u64 {
        match self {
            Status::Running => 0,
            Status::Halted => 1,
            Status::RuntimeError => 2,
        }
    }

    pub const fn from_code(code: u64) -> Self {
        match code {
            0 => Status::Running,
            1 => Status::Halted,
            _ => Status::RuntimeError,
        }
    }
}

/// Registers and memories of the virtual machine.
///
/// `sp` is the next free stack slot and `hp` the next free heap slot. A call
/// frame keeps the caller's `fp` at `fp` and the return address at `fp + 1`;
/// the argument sits at `fp - 2` and the closure at `fp - 1`.
#[derive(Debug)]
pub struct MachineState {
    pub sp: usize,
    pub fp: usize,
    pub cp: usize,
    pub hp: usize,
    pub status: Status,
    pub stack: Memory,
    pub heap: Memory,
    /// First fault seen, kept for diagnostics.
    pub fault: Option<RuntimeError>,
    manager: SharedMemoryManager,
}

impl MachineState {
    pub fn new(manager: SharedMemoryManager) -> Self {
        Self {
            sp: 0,
            fp: 0,
            cp: 0,
            hp: 0,
            status: Status::Running,
            stack: Memory::with_manager(manager.clone()),
            heap: Memory::with_manager(manager.clone()),
            fault: None,
            manager,
        }
    }

    pub fn manager(&self) -> SharedMemoryManager {
        Rc::clone(&self.manager)
    }

    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    /// Stop with a runtime error.
    pub fn fail(&mut self, error: RuntimeError) {
        self.status = Status::RuntimeError;
        self.fault.get_or_insert(error);
    }

    /// Whether heap exhaustion in compiled code should hand control back for a collection.
    pub fn heap_collects(&self) -> bool {
        self.manager.borrow().collects()
    }

    /// Safe point: let the manager collect if it wants to.
    pub fn collect_garbage(&mut self) -> Option<GcStats> {
        let manager = self.manager();
        let mut manager = manager.borrow_mut();
        manager.collect_garbage(self)
    }

    /// The top of the stack, if any.
    pub fn top(&self) -> Option<Item> {
        self.sp.checked_sub(1).and_then(|index| self.stack.peek(index))
    }
}
