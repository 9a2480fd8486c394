use std::collections::HashMap;

use super::OptimizationError;
use super::arg::{TArg, Var, VarId, VarKind};
use crate::ucode::{Field, LocKind, Location, Operand, Reg, UArg};

/// Canonical identity of a stack word inside a function group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StackKey {
    Sp(i64),
    Fp(i64),
}

/// Variable allocation while lowering one group to T-code.
///
/// In function mode stack words are identified across instructions by
/// tracking `sp` relative to its value at the group start: `SP(off)` is keyed
/// by `shadow_sp + off`. `fp` is assumed constant between calls; it is only
/// written right before control leaves through `Apply` or `Return`.
#[derive(Debug)]
pub struct TState {
    function_mode: bool,
    shadow_sp: i64,
    next_id: VarId,
    registers: HashMap<Reg, VarId>,
    stack: HashMap<StackKey, VarId>,
    label_offsets: HashMap<usize, i64>,
}

impl TState {
    pub fn new(function_mode: bool) -> Self {
        Self {
            function_mode,
            shadow_sp: 0,
            next_id: 0,
            registers: HashMap::new(),
            stack: HashMap::new(),
            label_offsets: HashMap::new(),
        }
    }

    pub fn function_mode(&self) -> bool {
        self.function_mode
    }

    pub fn shadow_sp(&self) -> i64 {
        self.shadow_sp
    }

    fn fresh(&mut self) -> VarId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn reg(&mut self, reg: Reg) -> TArg {
        let id = match self.registers.get(&reg) {
            Some(&id) => id,
            None => {
                let id = self.fresh();
                self.registers.insert(reg, id);
                id
            }
        };
        let kind = if reg.is_machine() {
            VarKind::Machine
        } else {
            VarKind::General
        };
        TArg::Var(Var {
            id,
            kind,
            origin: UArg::Reg(reg),
        })
    }

    pub fn loc(&mut self, location: Location) -> TArg {
        let field = match location.field {
            Field::Tag => 0,
            Field::Value => 1,
        };
        let key = match location.kind {
            LocKind::Sp if self.function_mode => {
                Some(StackKey::Sp(2 * (self.shadow_sp + location.offset) + field))
            }
            LocKind::Fp if self.function_mode => Some(StackKey::Fp(2 * location.offset + field)),
            _ => None,
        };
        let (id, kind) = match key {
            Some(key) => {
                let id = match self.stack.get(&key) {
                    Some(&id) => id,
                    None => {
                        let id = self.fresh();
                        self.stack.insert(key, id);
                        id
                    }
                };
                (id, VarKind::Stack)
            }
            None => {
                let kind = match location.kind {
                    LocKind::Heap(_) => VarKind::Heap,
                    _ => VarKind::Stack,
                };
                (self.fresh(), kind)
            }
        };
        TArg::Var(Var {
            id,
            kind,
            origin: UArg::Loc(location),
        })
    }

    pub fn operand(&mut self, operand: Operand) -> TArg {
        match operand {
            Operand::Reg(reg) => self.reg(reg),
            Operand::Imm(value) => TArg::Imm(value),
        }
    }

    pub fn arg(&mut self, arg: UArg) -> TArg {
        match arg {
            UArg::Reg(reg) => self.reg(reg),
            UArg::Imm(value) => TArg::Imm(value),
            UArg::Loc(location) => self.loc(location),
        }
    }

    /// `sp` moved by `delta` relative to the group start.
    pub fn update_sp(&mut self, delta: i64) {
        self.shadow_sp += delta;
    }

    /// Control may continue at `cp` with the current stack offset.
    pub fn add_branch_destination(&mut self, cp: usize) -> Result<(), OptimizationError> {
        if !self.function_mode {
            return Ok(());
        }
        match self.label_offsets.get(&cp) {
            Some(&expected) if expected != self.shadow_sp => Err(OptimizationError::InconsistentStack {
                cp,
                expected,
                found: self.shadow_sp,
            }),
            Some(_) => Ok(()),
            None => {
                self.label_offsets.insert(cp, self.shadow_sp);
                Ok(())
            }
        }
    }

    /// Start of the instruction at `cp`. Without a fallthrough the offset
    /// recorded by an earlier branch is adopted.
    pub fn add_label(&mut self, cp: usize, falls_through: bool) -> Result<(), OptimizationError> {
        if !self.function_mode {
            return Ok(());
        }
        match self.label_offsets.get(&cp) {
            Some(&expected) if falls_through && expected != self.shadow_sp => {
                Err(OptimizationError::InconsistentStack {
                    cp,
                    expected,
                    found: self.shadow_sp,
                })
            }
            Some(&expected) => {
                self.shadow_sp = expected;
                Ok(())
            }
            None => {
                self.label_offsets.insert(cp, self.shadow_sp);
                Ok(())
            }
        }
    }
}
