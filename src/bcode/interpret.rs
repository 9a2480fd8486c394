use super::instr::{BInstr, LookupLocation};
use crate::vm::{IntReader, Item, MachineState, RuntimeError, Status, Tag};

/// `base + offset` as a memory index.
#[inline(always)]
fn at(base: usize, offset: i64) -> Result<usize, RuntimeError> {
    base.checked_add_signed(offset as isize)
        .ok_or(RuntimeError::NegativeIndex)
}

/// Execute one instruction against `state`.
///
/// On error the state may be partially updated; the caller stops the machine.
pub fn interpret(
    instr: &BInstr,
    state: &mut MachineState,
    io: &mut dyn IntReader,
) -> Result<(), RuntimeError> {
    let mut next_cp = state.cp + 1;
    match *instr {
        BInstr::Unary(op) => {
            let top = at(state.sp, -1)?;
            let arg = state.stack.get_and_check(top, op.operand_tag())?;
            let value = match op.eval(arg.as_int()) {
                Some(value) => value,
                None => io.read_int()?,
            };
            state
                .stack
                .set(top, Item::new(op.result_tag(), value as u64))?;
        }
        BInstr::Oper(op) => {
            let lhs_index = at(state.sp, -2)?;
            let rhs_index = at(state.sp, -1)?;
            let result = match op.operand_tag() {
                None => {
                    let lhs = state.stack.get(lhs_index)?;
                    let rhs = state.stack.get(rhs_index)?;
                    Item::boolean(lhs == rhs)
                }
                Some(tag) => {
                    let lhs = state.stack.get_and_check(lhs_index, tag)?.as_int();
                    let rhs = state.stack.get_and_check(rhs_index, tag)?.as_int();
                    let value = op
                        .eval(lhs, rhs)
                        .ok_or(RuntimeError::DivisionByZero)?;
                    Item::new(op.result_tag(), value as u64)
                }
            };
            state.stack.set(lhs_index, result)?;
            state.sp = rhs_index;
        }
        BInstr::MkPair => {
            let hp = state.hp;
            state.heap.set(hp, Item::new(Tag::PairHeader, 3))?;
            let first = state.stack.get(at(state.sp, -2)?)?;
            state.heap.set(hp + 1, first)?;
            let second = state.stack.get(at(state.sp, -1)?)?;
            state.heap.set(hp + 2, second)?;
            state
                .stack
                .set(at(state.sp, -2)?, Item::new(Tag::HeapIndex, hp as u64))?;
            state.sp -= 1;
            state.hp += 3;
        }
        BInstr::MkInl | BInstr::MkInr => {
            let header = if *instr == BInstr::MkInl {
                Tag::InlHeader
            } else {
                Tag::InrHeader
            };
            let hp = state.hp;
            let top = at(state.sp, -1)?;
            state.heap.set(hp, Item::new(header, 2))?;
            let payload = state.stack.get(top)?;
            state.heap.set(hp + 1, payload)?;
            state.stack.set(top, Item::new(Tag::HeapIndex, hp as u64))?;
            state.hp += 2;
        }
        BInstr::Fst | BInstr::Snd => {
            let slot = if *instr == BInstr::Fst { 1 } else { 2 };
            let top = at(state.sp, -1)?;
            let pair = state.stack.get_and_check(top, Tag::HeapIndex)?.as_index();
            state.heap.check_tag(pair, Tag::PairHeader)?;
            let item = state.heap.get(pair + slot)?;
            state.stack.set(top, item)?;
        }
        BInstr::Push(value) => {
            state.stack.set(state.sp, value.item())?;
            state.sp += 1;
        }
        BInstr::Apply => {
            let sp = state.sp;
            state
                .stack
                .set(sp, Item::new(Tag::FramePointer, state.fp as u64))?;
            state
                .stack
                .set(sp + 1, Item::new(Tag::ReturnAddress, next_cp as u64))?;
            let closure = state
                .stack
                .get_and_check(at(sp, -1)?, Tag::HeapIndex)?
                .as_index();
            state.heap.check_tag(closure, Tag::ClosureHeader)?;
            next_cp = state
                .heap
                .get_and_check(closure + 1, Tag::CodeIndex)?
                .as_index();
            state.fp = sp;
            state.sp = sp + 2;
        }
        BInstr::Lookup(LookupLocation::Stack, offset) => {
            let item = state.stack.get(at(state.fp, offset)?)?;
            state.stack.set(state.sp, item)?;
            state.sp += 1;
        }
        BInstr::Lookup(LookupLocation::Heap, offset) => {
            let closure = state
                .stack
                .get_and_check(at(state.fp, -1)?, Tag::HeapIndex)?
                .as_index();
            let item = state.heap.get(at(closure, offset + 1)?)?;
            state.stack.set(state.sp, item)?;
            state.sp += 1;
        }
        BInstr::Return => {
            let fp = state.fp;
            let result = state.stack.get(at(state.sp, -1)?)?;
            state.stack.set(at(fp, -2)?, result)?;
            state.sp = at(fp, -1)?;
            next_cp = state
                .stack
                .get_and_check(fp + 1, Tag::ReturnAddress)?
                .as_index();
            state.fp = state.stack.get_and_check(fp, Tag::FramePointer)?.as_index();
        }
        BInstr::MkClosure { target, captured } => {
            let hp = state.hp;
            let sp = state.sp;
            state
                .heap
                .set(hp, Item::new(Tag::ClosureHeader, captured as u64 + 2))?;
            state
                .heap
                .set(hp + 1, Item::new(Tag::CodeIndex, target as u64))?;
            for i in 0..captured {
                let item = state.stack.get(at(sp, -1 - i as i64)?)?;
                state.heap.set(hp + 2 + i, item)?;
            }
            let slot = at(sp, -(captured as i64))?;
            state.stack.set(slot, Item::new(Tag::HeapIndex, hp as u64))?;
            state.sp = slot + 1;
            state.hp += captured + 2;
        }
        BInstr::Swap => {
            let lower = at(state.sp, -2)?;
            let upper = at(state.sp, -1)?;
            let a = state.stack.get(lower)?;
            let b = state.stack.get(upper)?;
            state.stack.set(lower, b)?;
            state.stack.set(upper, a)?;
        }
        BInstr::Pop => {
            state.sp = at(state.sp, -1)?;
        }
        BInstr::Label | BInstr::Function => {}
        BInstr::Deref => {
            let top = at(state.sp, -1)?;
            let cell = state.stack.get_and_check(top, Tag::HeapRef)?.as_index();
            let item = state.heap.get(cell)?;
            state.stack.set(top, item)?;
        }
        BInstr::MkRef => {
            let hp = state.hp;
            let top = at(state.sp, -1)?;
            let item = state.stack.get(top)?;
            state.heap.set(hp, item)?;
            state.stack.set(top, Item::new(Tag::HeapRef, hp as u64))?;
            state.hp += 1;
        }
        BInstr::Assign => {
            let target = at(state.sp, -2)?;
            let cell = state.stack.get_and_check(target, Tag::HeapRef)?.as_index();
            let item = state.stack.get(at(state.sp, -1)?)?;
            state.heap.set(cell, item)?;
            state.stack.set(target, Item::unit())?;
            state.sp -= 1;
        }
        BInstr::Halt => {
            state.status = Status::Halted;
            return Ok(());
        }
        BInstr::Goto(dest) => next_cp = dest,
        BInstr::Test(dest) => {
            let top = at(state.sp, -1)?;
            let cond = state.stack.get_and_check(top, Tag::Bool)?;
            state.sp = top;
            if !cond.as_bool() {
                next_cp = dest;
            }
        }
        BInstr::Case(dest) => {
            let top = at(state.sp, -1)?;
            let object = state.stack.get_and_check(top, Tag::HeapIndex)?.as_index();
            let header = state.heap.get(object)?.tag;
            let payload = state.heap.get(object + 1)?;
            match header {
                Tag::InlHeader => {}
                Tag::InrHeader => next_cp = dest,
                other => return Err(RuntimeError::BadCaseHeader(other)),
            }
            state.stack.set(top, payload)?;
        }
    }
    state.cp = next_cp;
    Ok(())
}
