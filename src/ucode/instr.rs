use std::fmt;

use crate::vm::{BinaryOp, Tag, UnaryOp};

/// Micro-machine registers. `R0..R2` are scratch; the rest mirror the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    R0,
    R1,
    R2,
    Sp,
    Fp,
    Cp,
    Hp,
}

impl Reg {
    pub const GENERAL: [Reg; 3] = [Reg::R0, Reg::R1, Reg::R2];

    /// One of the four VM registers.
    pub fn is_machine(self) -> bool {
        matches!(self, Reg::Sp | Reg::Fp | Reg::Cp | Reg::Hp)
    }
}

/// Word of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Tag,
    Value,
}

impl Field {
    pub fn byte_offset(self) -> i64 {
        match self {
            Field::Tag => 0,
            Field::Value => 8,
        }
    }
}

/// Which memory a location addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Stack,
    Heap,
}

/// Base of a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocKind {
    /// Stack, relative to `sp`.
    Sp,
    /// Stack, relative to `fp`.
    Fp,
    /// Heap, relative to the register.
    Heap(Reg),
}

/// One word of a memory item: `base + offset`, then the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub kind: LocKind,
    pub offset: i64,
    pub field: Field,
}

impl Location {
    pub const fn sp(offset: i64, field: Field) -> Self {
        Self {
            kind: LocKind::Sp,
            offset,
            field,
        }
    }

    pub const fn fp(offset: i64, field: Field) -> Self {
        Self {
            kind: LocKind::Fp,
            offset,
            field,
        }
    }

    pub const fn heap(base: Reg, offset: i64, field: Field) -> Self {
        Self {
            kind: LocKind::Heap(base),
            offset,
            field,
        }
    }

    /// Relative to the next free heap slot.
    pub const fn hp(offset: i64, field: Field) -> Self {
        Self::heap(Reg::Hp, offset, field)
    }

    pub fn region(&self) -> Region {
        match self.kind {
            LocKind::Sp | LocKind::Fp => Region::Stack,
            LocKind::Heap(_) => Region::Heap,
        }
    }

    pub fn base(&self) -> Reg {
        match self.kind {
            LocKind::Sp => Reg::Sp,
            LocKind::Fp => Reg::Fp,
            LocKind::Heap(reg) => reg,
        }
    }

    pub fn with_field(self, field: Field) -> Self {
        Self { field, ..self }
    }
}

/// Register or immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
}

impl Operand {
    pub fn tag(tag: Tag) -> Self {
        Operand::Imm(tag.code() as i64)
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

/// Any U-level argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UArg {
    Reg(Reg),
    Imm(i64),
    Loc(Location),
}

impl From<Operand> for UArg {
    fn from(operand: Operand) -> Self {
        match operand {
            Operand::Reg(reg) => UArg::Reg(reg),
            Operand::Imm(value) => UArg::Imm(value),
        }
    }
}

impl From<Location> for UArg {
    fn from(location: Location) -> Self {
        UArg::Loc(location)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UKind {
    Get { dst: Reg, src: Location },
    Set { dst: Location, src: Operand },
    Move { dst: Reg, src: Operand },
    Unary { op: UnaryOp, dst: Reg, src: Operand },
    Oper { op: BinaryOp, dst: Reg, lhs: Operand, rhs: Operand },
    /// Start of the instruction at `cp`; compiled code checks it is really there.
    Label,
    /// Control may have left the group.
    Guard,
    MemCheck(Location),
    TagCheck { arg: UArg, a: Tag, b: Tag },
    Apply,
    Return,
    Halt,
    Goto(usize),
    Branch { cond: Operand, dest: usize },
}

/// A micro-instruction and the B-code instruction it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UInstr {
    pub cp: usize,
    pub kind: UKind,
}

impl UInstr {
    pub const fn new(cp: usize, kind: UKind) -> Self {
        Self { cp, kind }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reg::R0 => "r0",
            Reg::R1 => "r1",
            Reg::R2 => "r2",
            Reg::Sp => "sp",
            Reg::Fp => "fp",
            Reg::Cp => "cp",
            Reg::Hp => "hp",
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self.field {
            Field::Tag => "tag",
            Field::Value => "val",
        };
        match self.kind {
            LocKind::Sp => write!(f, "SP({}).{field}", self.offset),
            LocKind::Fp => write!(f, "FP({}).{field}", self.offset),
            LocKind::Heap(Reg::Hp) => write!(f, "HP({}).{field}", self.offset),
            LocKind::Heap(reg) => write!(f, "Heap({reg}, {}).{field}", self.offset),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{reg}"),
            Operand::Imm(value) => write!(f, "{value}"),
        }
    }
}

impl fmt::Display for UArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UArg::Reg(reg) => write!(f, "{reg}"),
            UArg::Imm(value) => write!(f, "{value}"),
            UArg::Loc(location) => write!(f, "{location}"),
        }
    }
}

impl fmt::Display for UInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.cp)?;
        match &self.kind {
            UKind::Get { dst, src } => write!(f, "{dst} <- {src}"),
            UKind::Set { dst, src } => write!(f, "{dst} <- {src}"),
            UKind::Move { dst, src } => write!(f, "{dst} <- {src}"),
            UKind::Unary { op, dst, src } => write!(f, "{dst} <- {op} {src}"),
            UKind::Oper { op, dst, lhs, rhs } => write!(f, "{dst} <- {lhs} {op} {rhs}"),
            UKind::Label => f.write_str("label"),
            UKind::Guard => f.write_str("guard"),
            UKind::MemCheck(location) => write!(f, "memcheck {location}"),
            UKind::TagCheck { arg, a, b } if a == b => write!(f, "tagcheck {arg} is {a}"),
            UKind::TagCheck { arg, a, b } => write!(f, "tagcheck {arg} is {a}|{b}"),
            UKind::Apply => f.write_str("apply"),
            UKind::Return => f.write_str("return"),
            UKind::Halt => f.write_str("halt"),
            UKind::Goto(dest) => write!(f, "goto @{dest}"),
            UKind::Branch { cond, dest } => write!(f, "branch {cond} else @{dest}"),
        }
    }
}
