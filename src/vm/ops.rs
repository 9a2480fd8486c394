use std::fmt;

use super::memory::Tag;

/// Single-operand operations shared by every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Read,
}

impl UnaryOp {
    /// Tag the operand must carry.
    pub fn operand_tag(self) -> Tag {
        match self {
            UnaryOp::Not => Tag::Bool,
            UnaryOp::Neg => Tag::Int,
            UnaryOp::Read => Tag::Unit,
        }
    }

    pub fn result_tag(self) -> Tag {
        match self {
            UnaryOp::Not => Tag::Bool,
            UnaryOp::Neg | UnaryOp::Read => Tag::Int,
        }
    }

    /// Evaluate on raw words. `Read` has no pure value.
    pub fn eval(self, value: i64) -> Option<i64> {
        match self {
            UnaryOp::Not => Some((value == 0) as i64),
            UnaryOp::Neg => Some(value.wrapping_neg()),
            UnaryOp::Read => None,
        }
    }
}

/// Two-operand operations shared by every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Lt,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Tag both operands must carry. `Eq` accepts anything.
    pub fn operand_tag(self) -> Option<Tag> {
        match self {
            BinaryOp::And | BinaryOp::Or => Some(Tag::Bool),
            BinaryOp::Eq => None,
            BinaryOp::Lt | BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                Some(Tag::Int)
            }
        }
    }

    pub fn result_tag(self) -> Tag {
        match self {
            BinaryOp::And | BinaryOp::Or | BinaryOp::Eq | BinaryOp::Lt => Tag::Bool,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => Tag::Int,
        }
    }

    /// Evaluate on raw words with wrapping arithmetic. `None` on division by zero.
    pub fn eval(self, lhs: i64, rhs: i64) -> Option<i64> {
        Some(match self {
            BinaryOp::And => (lhs != 0 && rhs != 0) as i64,
            BinaryOp::Or => (lhs != 0 || rhs != 0) as i64,
            BinaryOp::Eq => (lhs == rhs) as i64,
            BinaryOp::Lt => (lhs < rhs) as i64,
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_div(rhs)
            }
        })
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Not => "NOT",
            UnaryOp::Neg => "NEG",
            UnaryOp::Read => "READ",
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "EQ",
            BinaryOp::Lt => "LT",
            BinaryOp::Add => "ADD",
            BinaryOp::Sub => "SUB",
            BinaryOp::Mul => "MUL",
            BinaryOp::Div => "DIV",
        })
    }
}
