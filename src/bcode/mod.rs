//! Stack bytecode: instruction set, text decoder, interpreter and lowering.

mod decode;
mod group;
mod instr;
mod interpret;
mod lower;

pub use decode::{DecodeError, decode};
pub use group::{Granularity, GroupSpan, group_containing};
pub use instr::{BInstr, LookupLocation, PushValue};
pub use interpret::interpret;
pub use lower::lower;
