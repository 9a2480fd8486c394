use std::fmt;

use super::OptimizationError;
use super::arg::{TArg, VarId, VarKind};
use crate::ucode::{Reg, UInstr, UKind};
use crate::vm::{BinaryOp, Tag, UnaryOp};

/// T-code mirrors U-code over variables instead of registers and locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TKind {
    /// `ptr` is the base register of the location side, if any.
    Move { dst: TArg, src: TArg, ptr: Option<TArg> },
    Unary { op: UnaryOp, dst: TArg, src: TArg },
    Oper { op: BinaryOp, dst: TArg, lhs: TArg, rhs: TArg },
    Label,
    Guard,
    MemCheck { loc: TArg, ptr: TArg },
    TagCheck { arg: TArg, ptr: Option<TArg>, a: Tag, b: Tag },
    /// Summaries of what a call or return touches inside the group.
    Apply { reads: Vec<TArg>, writes: Vec<TArg> },
    Return { reads: Vec<TArg> },
    Halt,
    Goto(usize),
    Branch { cond: TArg, dest: usize, cp: TArg },
}

/// What an instruction means to the dataflow passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Only writes the variable, and can be dropped if nobody reads it.
    Write(VarId),
    TagCheck { var: VarId, a: Tag, b: Tag },
    BoundsCheck(VarId),
    Other,
}

/// Result of constant folding one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fold {
    Keep,
    Replace(TKind),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TInstr {
    pub cp: usize,
    /// Position of the owning instruction inside the compiled group.
    pub pos: usize,
    pub function_mode: bool,
    pub kind: TKind,
}

impl TInstr {
    pub fn new(cp: usize, pos: usize, function_mode: bool, kind: TKind) -> Self {
        Self {
            cp,
            pos,
            function_mode,
            kind,
        }
    }

    /// Arguments whose value is observed.
    pub fn read_args(&self) -> Vec<&TArg> {
        match &self.kind {
            TKind::Move { src, ptr, .. } => [Some(src), ptr.as_ref()].into_iter().flatten().collect(),
            TKind::Unary { src, .. } => vec![src],
            TKind::Oper { lhs, rhs, .. } => vec![lhs, rhs],
            TKind::MemCheck { ptr, .. } => vec![ptr],
            TKind::TagCheck { arg, ptr, .. } => [Some(arg), ptr.as_ref()].into_iter().flatten().collect(),
            TKind::Apply { reads, .. } | TKind::Return { reads } => reads.iter().collect(),
            TKind::Branch { cond, cp, .. } => vec![cond, cp],
            TKind::Label | TKind::Guard | TKind::Halt | TKind::Goto(_) => Vec::new(),
        }
    }

    pub fn write_args(&self) -> Vec<&TArg> {
        match &self.kind {
            TKind::Move { dst, .. } | TKind::Unary { dst, .. } | TKind::Oper { dst, .. } => vec![dst],
            TKind::Apply { writes, .. } => writes.iter().collect(),
            TKind::Branch { cp, .. } => vec![cp],
            _ => Vec::new(),
        }
    }

    pub fn reads(&self) -> impl Iterator<Item = VarId> + '_ {
        self.read_args().into_iter().filter_map(TArg::id)
    }

    pub fn writes(&self) -> impl Iterator<Item = VarId> + '_ {
        self.write_args().into_iter().filter_map(TArg::id)
    }

    pub fn reads_var(&self, id: VarId) -> bool {
        self.reads().any(|read| read == id)
    }

    pub fn writes_var(&self, id: VarId) -> bool {
        self.writes().any(|write| write == id)
    }

    /// Whether a write to `var` here can be dropped when the value is dead.
    fn is_plain_write(&self, dst: &TArg) -> bool {
        match dst.kind() {
            Some(VarKind::General) => true,
            Some(VarKind::Stack) => self.function_mode,
            _ => false,
        }
    }

    pub fn effect(&self) -> Effect {
        match &self.kind {
            TKind::Unary {
                op: UnaryOp::Read, ..
            }
            | TKind::Oper {
                op: BinaryOp::Div, ..
            } => Effect::Other,
            TKind::Move { dst, .. } | TKind::Unary { dst, .. } | TKind::Oper { dst, .. } => {
                match dst.id() {
                    Some(id) if self.is_plain_write(dst) => Effect::Write(id),
                    _ => Effect::Other,
                }
            }
            TKind::MemCheck { loc, .. } => loc.id().map_or(Effect::Other, Effect::BoundsCheck),
            TKind::TagCheck { arg, a, b, .. } => arg.id().map_or(Effect::Other, |var| Effect::TagCheck {
                var,
                a: *a,
                b: *b,
            }),
            _ => Effect::Other,
        }
    }

    /// Fold immediates.
    pub fn fold(&self) -> Result<Fold, OptimizationError> {
        Ok(match &self.kind {
            TKind::Move { dst, src, .. } => match (dst.id(), src.id()) {
                (Some(a), Some(b)) if a == b => Fold::Remove,
                _ => Fold::Keep,
            },
            TKind::Unary { op, dst, src } => match src.imm().and_then(|value| op.eval(value)) {
                Some(value) => Fold::Replace(TKind::Move {
                    dst: *dst,
                    src: TArg::Imm(value),
                    ptr: None,
                }),
                None => Fold::Keep,
            },
            TKind::Oper { op, dst, lhs, rhs } => match (lhs.imm(), rhs.imm()) {
                (Some(lhs), Some(rhs)) => {
                    let value = op
                        .eval(lhs, rhs)
                        .ok_or(OptimizationError::DivisionByZero { cp: self.cp })?;
                    Fold::Replace(TKind::Move {
                        dst: *dst,
                        src: TArg::Imm(value),
                        ptr: None,
                    })
                }
                _ => Fold::Keep,
            },
            TKind::TagCheck { arg, a, b, .. } => match arg.imm() {
                Some(tag) if tag as u64 == a.code() || tag as u64 == b.code() => Fold::Remove,
                _ => Fold::Keep,
            },
            TKind::Branch { cond, dest, cp } => match cond.imm() {
                Some(0) => Fold::Replace(TKind::Goto(*dest)),
                Some(_) => Fold::Replace(TKind::Oper {
                    op: BinaryOp::Add,
                    dst: *cp,
                    lhs: *cp,
                    rhs: TArg::Imm(1),
                }),
                None => Fold::Keep,
            },
            _ => Fold::Keep,
        })
    }

    /// Replace reads of `id` by `with`. Machine registers are never replaced.
    pub fn propagate_copy(&mut self, id: VarId, with: &TArg) -> bool {
        fn replace(slot: &mut TArg, id: VarId, with: &TArg) -> bool {
            match slot.var() {
                Some(var) if var.id == id && var.kind != VarKind::Machine => {
                    *slot = *with;
                    true
                }
                _ => false,
            }
        }

        match &mut self.kind {
            TKind::Move { dst, src, ptr } => {
                let replaced = replace(src, id, with);
                // a load turned into a register move no longer needs its base
                if replaced && dst.location().is_none() {
                    *ptr = None;
                }
                replaced
            }
            TKind::Unary { src, .. } => replace(src, id, with),
            TKind::Oper { lhs, rhs, .. } => {
                let left = replace(lhs, id, with);
                let right = replace(rhs, id, with);
                left || right
            }
            TKind::TagCheck { arg, ptr, .. } => {
                let replaced = replace(arg, id, with);
                if replaced {
                    *ptr = None;
                }
                replaced
            }
            TKind::Branch { cond, .. } => replace(cond, id, with),
            _ => false,
        }
    }

    /// Rebuild the U-instruction from the argument shapes.
    pub fn to_u(&self) -> Result<UInstr, OptimizationError> {
        let unlowerable = || OptimizationError::Unlowerable(self.to_string());
        let kind = match &self.kind {
            TKind::Move { dst, src, .. } => match (dst.reg(), dst.location()) {
                (_, Some(dst)) => UKind::Set {
                    dst,
                    src: src.operand().ok_or_else(unlowerable)?,
                },
                (Some(dst), None) => match src.location() {
                    Some(src) => UKind::Get { dst, src },
                    None => UKind::Move {
                        dst,
                        src: src.operand().ok_or_else(unlowerable)?,
                    },
                },
                (None, None) => return Err(unlowerable()),
            },
            TKind::Unary { op, dst, src } => UKind::Unary {
                op: *op,
                dst: dst.reg().ok_or_else(unlowerable)?,
                src: src.operand().ok_or_else(unlowerable)?,
            },
            TKind::Oper { op, dst, lhs, rhs } => UKind::Oper {
                op: *op,
                dst: dst.reg().ok_or_else(unlowerable)?,
                lhs: lhs.operand().ok_or_else(unlowerable)?,
                rhs: rhs.operand().ok_or_else(unlowerable)?,
            },
            TKind::Label => UKind::Label,
            TKind::Guard => UKind::Guard,
            TKind::MemCheck { loc, .. } => UKind::MemCheck(loc.location().ok_or_else(unlowerable)?),
            TKind::TagCheck { arg, a, b, .. } => UKind::TagCheck {
                arg: arg.uarg(),
                a: *a,
                b: *b,
            },
            TKind::Apply { .. } => UKind::Apply,
            TKind::Return { .. } => UKind::Return,
            TKind::Halt => UKind::Halt,
            TKind::Goto(dest) => UKind::Goto(*dest),
            TKind::Branch { cond, dest, .. } => UKind::Branch {
                cond: cond.operand().ok_or_else(unlowerable)?,
                dest: *dest,
            },
        };
        Ok(UInstr::new(self.cp, kind))
    }

    pub fn is_label(&self) -> bool {
        matches!(self.kind, TKind::Label)
    }

    /// Control may leave the straight line or the group here.
    pub fn is_barrier(&self) -> bool {
        matches!(
            self.kind,
            TKind::Apply { .. } | TKind::Return { .. } | TKind::Halt | TKind::Guard
        )
    }

    pub fn writes_machine(&self, reg: Reg) -> bool {
        self.write_args()
            .into_iter()
            .any(|arg| arg.reg() == Some(reg))
    }
}

impl fmt::Display for TInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.cp)?;
        match &self.kind {
            TKind::Move { dst, src, .. } => write!(f, "{dst} <- {src}"),
            TKind::Unary { op, dst, src } => write!(f, "{dst} <- {op} {src}"),
            TKind::Oper { op, dst, lhs, rhs } => write!(f, "{dst} <- {lhs} {op} {rhs}"),
            TKind::Label => f.write_str("label"),
            TKind::Guard => f.write_str("guard"),
            TKind::MemCheck { loc, .. } => write!(f, "memcheck {loc}"),
            TKind::TagCheck { arg, a, b, .. } => write!(f, "tagcheck {arg} is {a}|{b}"),
            TKind::Apply { .. } => f.write_str("apply"),
            TKind::Return { .. } => f.write_str("return"),
            TKind::Halt => f.write_str("halt"),
            TKind::Goto(dest) => write!(f, "goto @{dest}"),
            TKind::Branch { cond, dest, .. } => write!(f, "branch {cond} else @{dest}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcode::TState;
    use crate::ucode::{Field, Location, Operand};

    fn instr(kind: TKind) -> TInstr {
        TInstr::new(3, 0, true, kind)
    }

    #[test]
    fn test_fold_arithmetic() {
        let mut state = TState::new(true);
        let r0 = state.reg(Reg::R0);
        let oper = instr(TKind::Oper {
            op: BinaryOp::Mul,
            dst: r0,
            lhs: TArg::Imm(6),
            rhs: TArg::Imm(7),
        });
        assert_eq!(
            oper.fold(),
            Ok(Fold::Replace(TKind::Move {
                dst: r0,
                src: TArg::Imm(42),
                ptr: None
            }))
        );
        let div = instr(TKind::Oper {
            op: BinaryOp::Div,
            dst: r0,
            lhs: TArg::Imm(6),
            rhs: TArg::Imm(0),
        });
        assert_eq!(div.fold(), Err(OptimizationError::DivisionByZero { cp: 3 }));
    }

    #[test]
    fn test_fold_branch_directions() {
        let mut state = TState::new(true);
        let cp = state.reg(Reg::Cp);
        let taken = instr(TKind::Branch {
            cond: TArg::Imm(1),
            dest: 9,
            cp,
        });
        assert_eq!(
            taken.fold(),
            Ok(Fold::Replace(TKind::Oper {
                op: BinaryOp::Add,
                dst: cp,
                lhs: cp,
                rhs: TArg::Imm(1)
            }))
        );
        let not_taken = instr(TKind::Branch {
            cond: TArg::Imm(0),
            dest: 9,
            cp,
        });
        assert_eq!(not_taken.fold(), Ok(Fold::Replace(TKind::Goto(9))));
    }

    #[test]
    fn test_fold_tag_check_and_self_move() {
        let check = instr(TKind::TagCheck {
            arg: TArg::Imm(Tag::Int.code() as i64),
            ptr: None,
            a: Tag::Int,
            b: Tag::Int,
        });
        assert_eq!(check.fold(), Ok(Fold::Remove));
        let mut state = TState::new(true);
        let r1 = state.reg(Reg::R1);
        let moved = instr(TKind::Move {
            dst: r1,
            src: r1,
            ptr: None,
        });
        assert_eq!(moved.fold(), Ok(Fold::Remove));
    }

    #[test]
    fn test_effects() {
        let mut state = TState::new(true);
        let r0 = state.reg(Reg::R0);
        let sp = state.reg(Reg::Sp);
        let slot = state.loc(Location::sp(0, Field::Value));
        let write_reg = instr(TKind::Move {
            dst: r0,
            src: TArg::Imm(1),
            ptr: None,
        });
        assert!(matches!(write_reg.effect(), Effect::Write(_)));
        let write_stack = instr(TKind::Move {
            dst: slot,
            src: r0,
            ptr: Some(sp),
        });
        assert!(matches!(write_stack.effect(), Effect::Write(_)));
        let mut outside = write_stack.clone();
        outside.function_mode = false;
        assert_eq!(outside.effect(), Effect::Other);
        let bump = instr(TKind::Oper {
            op: BinaryOp::Add,
            dst: sp,
            lhs: sp,
            rhs: TArg::Imm(1),
        });
        assert_eq!(bump.effect(), Effect::Other);
    }

    #[test]
    fn test_propagate_turns_load_into_move() {
        let mut state = TState::new(true);
        let r0 = state.reg(Reg::R0);
        let sp = state.reg(Reg::Sp);
        let slot = state.loc(Location::sp(-1, Field::Value));
        let mut load = instr(TKind::Move {
            dst: r0,
            src: slot,
            ptr: Some(sp),
        });
        assert!(load.propagate_copy(slot.id().unwrap(), &TArg::Imm(4)));
        assert_eq!(
            load.to_u().unwrap().kind,
            UKind::Move {
                dst: Reg::R0,
                src: Operand::Imm(4)
            }
        );
        assert!(!load.reads_var(sp.id().unwrap()));
    }

    #[test]
    fn test_machine_registers_are_not_replaced() {
        let mut state = TState::new(true);
        let sp = state.reg(Reg::Sp);
        let mut bump = instr(TKind::Oper {
            op: BinaryOp::Add,
            dst: sp,
            lhs: sp,
            rhs: TArg::Imm(1),
        });
        assert!(!bump.propagate_copy(sp.id().unwrap(), &TArg::Imm(0)));
    }

    #[test]
    fn test_relowering_by_shape() {
        let mut state = TState::new(false);
        let r0 = state.reg(Reg::R0);
        let sp = state.reg(Reg::Sp);
        let slot = state.loc(Location::sp(0, Field::Tag));
        let store = instr(TKind::Move {
            dst: slot,
            src: r0,
            ptr: Some(sp),
        });
        assert_eq!(
            store.to_u().unwrap().kind,
            UKind::Set {
                dst: Location::sp(0, Field::Tag),
                src: Operand::Reg(Reg::R0)
            }
        );
        let load = instr(TKind::Move {
            dst: r0,
            src: slot,
            ptr: Some(sp),
        });
        assert_eq!(
            load.to_u().unwrap().kind,
            UKind::Get {
                dst: Reg::R0,
                src: Location::sp(0, Field::Tag)
            }
        );
    }
}
