//! Micro-instructions: B-code spelled out as register, stack and heap operations.

mod builder;
mod instr;
mod to_tcode;

pub use builder::UCodeBuilder;
pub use instr::{Field, LocKind, Location, Operand, Reg, Region, UArg, UInstr, UKind};
pub use to_tcode::to_tcode;

use std::fmt::Write;

use crate::code::Code;

/// One block of text per position, for logs.
pub fn render_positions(positions: &[Code<UInstr>]) -> String {
    let mut out = String::new();
    for (pos, code) in positions.iter().enumerate() {
        let _ = write!(out, "position {pos}:\n{code}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcode;

    #[test]
    fn test_render_positions() {
        let code = bcode::decode("PUSH STACK_INT 1\nHALT").unwrap();
        let positions: Vec<_> = code
            .iter()
            .enumerate()
            .map(|(cp, instr)| bcode::lower(instr, cp))
            .collect();
        let text = render_positions(&positions);
        assert!(text.starts_with("position 0:\n   0  "));
        assert!(text.contains("position 1:\n"));
        assert_eq!(text.lines().count(), 2 + positions.iter().map(|c| c.len()).sum::<usize>());
    }
}
