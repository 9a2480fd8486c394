//! dlvm - a tiered virtual machine for a small stack bytecode
//!
//! Programs are interpreted one instruction at a time. A tiering policy picks
//! hot groups of instructions, which are lowered to micro-instructions,
//! optionally optimized and compiled to x86-64.

pub mod bcode;
pub mod code;
pub mod config;
pub mod error;
pub mod flow_graph;
#[cfg(feature = "jit")]
pub mod jit;
pub mod opt;
pub mod policy;
pub mod report;
pub mod runner;
pub mod tcode;
pub mod ucode;
pub mod vm;

// Re-export commonly used types
pub use code::Code;
pub use config::{JitPolicyKind, MemoryPolicy, OptimizationPass, RunOptions, Verbosity};
pub use error::Error;
pub use runner::{RunReport, Runner, run_file, run_program};
pub use vm::{MachineState, RuntimeError, Status};
