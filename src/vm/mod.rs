//! Tagged memory, machine state and memory managers.

mod error;
mod io;
mod machine;
mod memory;
mod memory_manager;
mod ops;

pub use error::RuntimeError;
pub use io::{IntReader, ScriptedReader, StdinReader};
pub use machine::{MachineState, Status};
pub use memory::{Item, Memory, SharedMemoryManager, Tag};
pub use memory_manager::{
    AmortizedAllocation, DEFAULT_CAPACITY, GcStats, MarkCompactGc, MemoryManager, NoAllocation,
    shared_manager,
};
pub use ops::{BinaryOp, UnaryOp};
