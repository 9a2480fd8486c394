use std::fmt;

use crate::vm::{BinaryOp, Item, UnaryOp};

/// Immediate pushed by `PUSH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushValue {
    Unit,
    Bool(bool),
    Int(i64),
}

impl PushValue {
    pub fn item(self) -> Item {
        match self {
            PushValue::Unit => Item::unit(),
            PushValue::Bool(value) => Item::boolean(value),
            PushValue::Int(value) => Item::int(value),
        }
    }
}

/// Where `LOOKUP` reads from: the current frame or the current closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupLocation {
    Stack,
    Heap,
}

/// A stack bytecode instruction. Branch targets are instruction indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BInstr {
    Unary(UnaryOp),
    Oper(BinaryOp),
    MkPair,
    Fst,
    Snd,
    MkInl,
    MkInr,
    Push(PushValue),
    Apply,
    Lookup(LookupLocation, i64),
    Return,
    MkClosure { target: usize, captured: usize },
    Swap,
    Pop,
    Label,
    Function,
    Deref,
    MkRef,
    Assign,
    Halt,
    Goto(usize),
    Test(usize),
    Case(usize),
}

impl BInstr {
    /// Control leaves the straight line after this instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            BInstr::Apply
                | BInstr::Return
                | BInstr::Halt
                | BInstr::Goto(_)
                | BInstr::Test(_)
                | BInstr::Case(_)
        )
    }

    /// A branch may land here.
    pub fn starts_block(&self) -> bool {
        matches!(self, BInstr::Label | BInstr::Function)
    }

    pub fn starts_function(&self) -> bool {
        matches!(self, BInstr::Function)
    }

    /// The instruction after this one is entered from outside the function.
    pub fn precedes_entry(&self) -> bool {
        matches!(self, BInstr::Apply | BInstr::Function)
    }

    /// Static branch destination, if any.
    pub fn branch_target(&self) -> Option<usize> {
        match *self {
            BInstr::Goto(dest) | BInstr::Test(dest) | BInstr::Case(dest) => Some(dest),
            _ => None,
        }
    }
}

impl fmt::Display for BInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BInstr::Unary(op) => write!(f, "UNARY {op}"),
            BInstr::Oper(op) => write!(f, "OPER {op}"),
            BInstr::MkPair => f.write_str("MK_PAIR"),
            BInstr::Fst => f.write_str("FST"),
            BInstr::Snd => f.write_str("SND"),
            BInstr::MkInl => f.write_str("MK_INL"),
            BInstr::MkInr => f.write_str("MK_INR"),
            BInstr::Push(PushValue::Unit) => f.write_str("PUSH STACK_UNIT"),
            BInstr::Push(PushValue::Bool(value)) => write!(f, "PUSH STACK_BOOL {value}"),
            BInstr::Push(PushValue::Int(value)) => write!(f, "PUSH STACK_INT {value}"),
            BInstr::Apply => f.write_str("APPLY"),
            BInstr::Lookup(LookupLocation::Stack, offset) => {
                write!(f, "LOOKUP STACK_LOCATION {offset}")
            }
            BInstr::Lookup(LookupLocation::Heap, offset) => {
                write!(f, "LOOKUP HEAP_LOCATION {offset}")
            }
            BInstr::Return => f.write_str("RETURN"),
            BInstr::MkClosure { target, captured } => write!(f, "MK_CLOSURE @{target} {captured}"),
            BInstr::Swap => f.write_str("SWAP"),
            BInstr::Pop => f.write_str("POP"),
            BInstr::Label => f.write_str("LABEL"),
            BInstr::Function => f.write_str("FUNCTION"),
            BInstr::Deref => f.write_str("DEREF"),
            BInstr::MkRef => f.write_str("MK_REF"),
            BInstr::Assign => f.write_str("ASSIGN"),
            BInstr::Halt => f.write_str("HALT"),
            BInstr::Goto(dest) => write!(f, "GOTO @{dest}"),
            BInstr::Test(dest) => write!(f, "TEST @{dest}"),
            BInstr::Case(dest) => write!(f, "CASE @{dest}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        assert!(BInstr::Test(3).ends_block());
        assert!(!BInstr::Pop.ends_block());
        assert!(BInstr::Label.starts_block());
        assert!(BInstr::Apply.precedes_entry());
        assert_eq!(BInstr::Case(9).branch_target(), Some(9));
        assert_eq!(BInstr::Apply.branch_target(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(BInstr::Push(PushValue::Int(-4)).to_string(), "PUSH STACK_INT -4");
        assert_eq!(BInstr::Oper(BinaryOp::Add).to_string(), "OPER ADD");
        assert_eq!(
            BInstr::MkClosure { target: 2, captured: 1 }.to_string(),
            "MK_CLOSURE @2 1"
        );
    }
}
