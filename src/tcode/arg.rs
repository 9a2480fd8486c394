use std::fmt;

use crate::ucode::{Location, Operand, Reg, UArg};

pub type VarId = u32;

/// What a variable is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// `r0..r2`.
    General,
    /// `sp fp cp hp`.
    Machine,
    Stack,
    Heap,
}

/// One occurrence of a variable: its identity plus the U-level argument it
/// stands for at this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var {
    pub id: VarId,
    pub kind: VarKind,
    pub origin: UArg,
}

impl Var {
    pub fn is_memory(&self) -> bool {
        matches!(self.kind, VarKind::Stack | VarKind::Heap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TArg {
    Imm(i64),
    Var(Var),
}

impl TArg {
    pub fn var(&self) -> Option<&Var> {
        match self {
            TArg::Var(var) => Some(var),
            TArg::Imm(_) => None,
        }
    }

    pub fn id(&self) -> Option<VarId> {
        self.var().map(|var| var.id)
    }

    pub fn imm(&self) -> Option<i64> {
        match *self {
            TArg::Imm(value) => Some(value),
            TArg::Var(_) => None,
        }
    }

    pub fn kind(&self) -> Option<VarKind> {
        self.var().map(|var| var.kind)
    }

    pub fn is_memory(&self) -> bool {
        self.var().is_some_and(Var::is_memory)
    }

    pub fn is(&self, id: VarId) -> bool {
        self.id() == Some(id)
    }

    pub fn uarg(&self) -> UArg {
        match *self {
            TArg::Imm(value) => UArg::Imm(value),
            TArg::Var(var) => var.origin,
        }
    }

    /// Register or immediate, if this argument is one.
    pub fn operand(&self) -> Option<Operand> {
        match self.uarg() {
            UArg::Reg(reg) => Some(Operand::Reg(reg)),
            UArg::Imm(value) => Some(Operand::Imm(value)),
            UArg::Loc(_) => None,
        }
    }

    pub fn reg(&self) -> Option<Reg> {
        match self.uarg() {
            UArg::Reg(reg) => Some(reg),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self.uarg() {
            UArg::Loc(location) => Some(location),
            _ => None,
        }
    }
}

impl fmt::Display for TArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TArg::Imm(value) => write!(f, "{value}"),
            TArg::Var(var) => write!(f, "v{}:{}", var.id, var.origin),
        }
    }
}
