use super::instr::{Field, Location, Operand, Reg, UArg, UInstr, UKind};
use crate::code::Code;
use crate::tcode::{OptimizationError, TArg, TInstr, TKind, TState};
use crate::vm::BinaryOp;

/// Stack words a call reads, relative to `sp` after the frame is pushed:
/// argument, closure, saved `fp` and return address.
const CALL_FRAME: [i64; 4] = [-4, -3, -2, -1];

fn item(state: &mut TState, location: Location) -> [TArg; 2] {
    [
        state.loc(location.with_field(Field::Tag)),
        state.loc(location.with_field(Field::Value)),
    ]
}

fn general_registers(state: &mut TState) -> Vec<TArg> {
    Reg::GENERAL.iter().map(|&reg| state.reg(reg)).collect()
}

/// Lower the U-code of every group position into one T-code line.
pub fn to_tcode(positions: &[Code<UInstr>], state: &mut TState) -> Result<Vec<TInstr>, OptimizationError> {
    let function_mode = state.function_mode();
    let mut line = Vec::new();
    let mut falls_through = false;

    for (pos, code) in positions.iter().enumerate() {
        for u in code {
            let kind = match u.kind {
                UKind::Label => {
                    state.add_label(u.cp, falls_through)?;
                    falls_through = true;
                    TKind::Label
                }
                UKind::Get { dst, src } => {
                    let src_arg = state.loc(src);
                    let ptr = state.reg(src.base());
                    TKind::Move {
                        dst: state.reg(dst),
                        src: src_arg,
                        ptr: Some(ptr),
                    }
                }
                UKind::Set { dst, src } => {
                    let src_arg = state.operand(src);
                    let ptr = state.reg(dst.base());
                    TKind::Move {
                        dst: state.loc(dst),
                        src: src_arg,
                        ptr: Some(ptr),
                    }
                }
                UKind::Move { dst, src } => TKind::Move {
                    src: state.operand(src),
                    dst: state.reg(dst),
                    ptr: None,
                },
                UKind::Unary { op, dst, src } => TKind::Unary {
                    op,
                    src: state.operand(src),
                    dst: state.reg(dst),
                },
                UKind::Oper { op, dst, lhs, rhs } => {
                    let kind = TKind::Oper {
                        op,
                        lhs: state.operand(lhs),
                        rhs: state.operand(rhs),
                        dst: state.reg(dst),
                    };
                    if dst == Reg::Sp
                        && lhs == Operand::Reg(Reg::Sp)
                        && let Operand::Imm(delta) = rhs
                    {
                        match op {
                            BinaryOp::Add => state.update_sp(delta),
                            BinaryOp::Sub => state.update_sp(-delta),
                            _ => {}
                        }
                    }
                    kind
                }
                UKind::Guard => TKind::Guard,
                UKind::MemCheck(loc) => TKind::MemCheck {
                    ptr: state.reg(loc.base()),
                    loc: state.loc(loc),
                },
                UKind::TagCheck { arg, a, b } => {
                    let ptr = match arg {
                        UArg::Loc(loc) => Some(state.reg(loc.base())),
                        _ => None,
                    };
                    TKind::TagCheck {
                        arg: state.arg(arg),
                        ptr,
                        a,
                        b,
                    }
                }
                UKind::Apply => {
                    falls_through = false;
                    let mut reads = general_registers(state);
                    let mut writes = general_registers(state);
                    if function_mode {
                        for offset in CALL_FRAME {
                            reads.extend(item(state, Location::sp(offset, Field::Value)));
                        }
                        state.update_sp(-3);
                        writes.extend(item(state, Location::sp(-1, Field::Value)));
                    }
                    TKind::Apply { reads, writes }
                }
                UKind::Return => {
                    falls_through = false;
                    let reads = if function_mode {
                        item(state, Location::fp(-2, Field::Value)).to_vec()
                    } else {
                        Vec::new()
                    };
                    TKind::Return { reads }
                }
                UKind::Halt => {
                    falls_through = false;
                    TKind::Halt
                }
                UKind::Goto(dest) => {
                    falls_through = false;
                    state.add_branch_destination(dest)?;
                    TKind::Goto(dest)
                }
                UKind::Branch { cond, dest } => {
                    falls_through = false;
                    state.add_branch_destination(dest)?;
                    state.add_branch_destination(u.cp + 1)?;
                    TKind::Branch {
                        cond: state.operand(cond),
                        dest,
                        cp: state.reg(Reg::Cp),
                    }
                }
            };
            line.push(TInstr::new(u.cp, pos, function_mode, kind));
        }
    }
    Ok(line)
}
