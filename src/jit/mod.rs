//! JIT compilation of hot groups to x86-64.
//!
//! - Executable memory allocation
//! - Code buffer with label patching
//! - x86-64 instruction encoding
//! - The frame shared with compiled code
//! - The group compiler
//!
//! This module is only compiled when the `jit` feature is enabled.

mod codebuf;
mod compiler;
mod frame;
mod memory;
mod x86_64;

use thiserror::Error;

pub use compiler::{CompiledGroup, GroupShape, GroupSource, compile_group};
pub use memory::ExecMemoryError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitError {
    #[error(transparent)]
    Memory(#[from] ExecMemoryError),
    #[error("jump to unbound label {0}")]
    UndefinedLabel(usize),
    #[error("offset {0} does not fit the encoding")]
    OffsetOutOfRange(i64),
    #[error("JIT compilation is not supported on this target")]
    UnsupportedTarget,
}
