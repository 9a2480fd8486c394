use std::collections::HashMap;

use thiserror::Error;

use super::instr::{BInstr, LookupLocation, PushValue};
use crate::code::Code;
use crate::vm::{BinaryOp, UnaryOp};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Undefined token \"{token}\" in instruction \"{line}\"")]
    UndefinedToken { token: String, line: String },
    #[error("Missing operand in instruction \"{line}\"")]
    MissingOperand { line: String },
    #[error("Undefined label \"{label}\" in instruction \"{line}\"")]
    UndefinedLabel { label: String, line: String },
}

/// Decode the textual bytecode format, one instruction per non-blank line.
pub fn decode(source: &str) -> Result<Code<BInstr>, DecodeError> {
    let lines: Vec<&str> = source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut labels = HashMap::new();
    for (index, line) in lines.iter().enumerate() {
        let mut tokens = line.split_whitespace();
        if let (Some("LABEL" | "FUNCTION"), Some(name)) = (tokens.next(), tokens.next()) {
            labels.insert(name, index);
        }
    }

    lines
        .iter()
        .map(|line| LineDecoder::new(line, &labels).decode())
        .collect()
}

struct LineDecoder<'a> {
    line: &'a str,
    tokens: std::str::SplitWhitespace<'a>,
    labels: &'a HashMap<&'a str, usize>,
}

impl<'a> LineDecoder<'a> {
    fn new(line: &'a str, labels: &'a HashMap<&'a str, usize>) -> Self {
        Self {
            line,
            tokens: line.split_whitespace(),
            labels,
        }
    }

    fn decode(mut self) -> Result<BInstr, DecodeError> {
        let mnemonic = self.operand()?;
        let instr = match mnemonic {
            "UNARY" => BInstr::Unary(match self.operand()? {
                "NOT" => UnaryOp::Not,
                "NEG" => UnaryOp::Neg,
                "READ" => UnaryOp::Read,
                other => return Err(self.undefined(other)),
            }),
            "OPER" => BInstr::Oper(match self.operand()? {
                "AND" => BinaryOp::And,
                "OR" => BinaryOp::Or,
                "EQ" => BinaryOp::Eq,
                "LT" => BinaryOp::Lt,
                "ADD" => BinaryOp::Add,
                "SUB" => BinaryOp::Sub,
                "MUL" => BinaryOp::Mul,
                "DIV" => BinaryOp::Div,
                other => return Err(self.undefined(other)),
            }),
            "MK_PAIR" => BInstr::MkPair,
            "FST" => BInstr::Fst,
            "SND" => BInstr::Snd,
            "MK_INL" => BInstr::MkInl,
            "MK_INR" => BInstr::MkInr,
            "PUSH" => BInstr::Push(match self.operand()? {
                "STACK_UNIT" => PushValue::Unit,
                "STACK_BOOL" => PushValue::Bool(match self.operand()? {
                    "true" => true,
                    "false" => false,
                    other => return Err(self.undefined(other)),
                }),
                "STACK_INT" => PushValue::Int(self.number()?),
                other => return Err(self.undefined(other)),
            }),
            "APPLY" => BInstr::Apply,
            "LOOKUP" => {
                let location = match self.operand()? {
                    "STACK_LOCATION" => LookupLocation::Stack,
                    "HEAP_LOCATION" => LookupLocation::Heap,
                    other => return Err(self.undefined(other)),
                };
                BInstr::Lookup(location, self.number()?)
            }
            "RETURN" => BInstr::Return,
            "MK_CLOSURE" => {
                let target = self.label()?;
                let captured = self.number()?;
                BInstr::MkClosure { target, captured }
            }
            "SWAP" => BInstr::Swap,
            "POP" => BInstr::Pop,
            "LABEL" => {
                self.operand()?;
                BInstr::Label
            }
            "FUNCTION" => {
                self.operand()?;
                BInstr::Function
            }
            "DEREF" => BInstr::Deref,
            "MK_REF" => BInstr::MkRef,
            "ASSIGN" => BInstr::Assign,
            "HALT" => BInstr::Halt,
            "GOTO" => BInstr::Goto(self.label()?),
            "TEST" => BInstr::Test(self.label()?),
            "CASE" => BInstr::Case(self.label()?),
            other => return Err(self.undefined(other)),
        };
        match self.tokens.next() {
            Some(extra) => Err(self.undefined(extra)),
            None => Ok(instr),
        }
    }

    fn operand(&mut self) -> Result<&'a str, DecodeError> {
        self.tokens.next().ok_or_else(|| DecodeError::MissingOperand {
            line: self.line.to_string(),
        })
    }

    fn number<N: std::str::FromStr>(&mut self) -> Result<N, DecodeError> {
        let token = self.operand()?;
        token.parse().map_err(|_| self.undefined(token))
    }

    fn label(&mut self) -> Result<usize, DecodeError> {
        let name = self.operand()?;
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| DecodeError::UndefinedLabel {
                label: name.to_string(),
                line: self.line.to_string(),
            })
    }

    fn undefined(&self, token: &str) -> DecodeError {
        DecodeError::UndefinedToken {
            token: token.to_string(),
            line: self.line.to_string(),
        }
    }
}
