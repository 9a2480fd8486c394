use super::instr::{BInstr, LookupLocation};
use crate::code::Code;
use crate::ucode::{Field, Location, Operand, Reg, UCodeBuilder, UInstr, UKind};
use crate::vm::{BinaryOp, Tag};

const R0: Reg = Reg::R0;
const R1: Reg = Reg::R1;
const R2: Reg = Reg::R2;

fn sp(offset: i64) -> Location {
    Location::sp(offset, Field::Value)
}

fn fp(offset: i64) -> Location {
    Location::fp(offset, Field::Value)
}

fn hp(offset: i64) -> Location {
    Location::hp(offset, Field::Value)
}

fn heap(base: Reg, offset: i64) -> Location {
    Location::heap(base, offset, Field::Value)
}

/// Lower one instruction at `cp` to U-code.
///
/// Every memory check of an instruction precedes its first change to a VM
/// register or to a stack cell below `sp`.
pub fn lower(instr: &BInstr, cp: usize) -> Code<UInstr> {
    let b = UCodeBuilder::new(cp).add(UKind::Label);
    let b = match *instr {
        BInstr::Unary(op) => b
            .get_and_check(R0, sp(-1), Some(op.operand_tag()))
            .add(UKind::Unary {
                op,
                dst: R0,
                src: Operand::Reg(R0),
            })
            .set_and_check(sp(-1), R0)
            .when(op.result_tag() != op.operand_tag(), |b| {
                b.set_and_check(
                    sp(-1).with_field(Field::Tag),
                    Operand::tag(op.result_tag()),
                )
            })
            .advance(Reg::Cp, 1),
        BInstr::Oper(BinaryOp::Eq) => b
            .get_and_check(R0, sp(-2).with_field(Field::Tag), None)
            .get_and_check(R1, sp(-1).with_field(Field::Tag), None)
            .oper(BinaryOp::Eq, R2, R0, R1)
            .get_and_check(R0, sp(-2), None)
            .get_and_check(R1, sp(-1), None)
            .oper(BinaryOp::Eq, R0, R0, R1)
            .oper(BinaryOp::And, R0, R0, R2)
            .set_and_check(sp(-2), R0)
            .set_and_check(sp(-2).with_field(Field::Tag), Operand::tag(Tag::Bool))
            .retreat(Reg::Sp, 1)
            .advance(Reg::Cp, 1),
        BInstr::Oper(op) => b
            .get_and_check(R0, sp(-2), op.operand_tag())
            .get_and_check(R1, sp(-1), op.operand_tag())
            .oper(op, R0, R0, R1)
            .set_and_check(sp(-2), R0)
            .set_and_check(sp(-2).with_field(Field::Tag), Operand::tag(op.result_tag()))
            .retreat(Reg::Sp, 1)
            .advance(Reg::Cp, 1),
        BInstr::MkPair => b
            .set_item(hp(0), Tag::PairHeader, Operand::Imm(3))
            .move_item(R0, sp(-2), hp(1))
            .move_item(R0, sp(-1), hp(2))
            .make_heap_pointer(sp(-2), Tag::HeapIndex)
            .advance(Reg::Hp, 3)
            .retreat(Reg::Sp, 1)
            .advance(Reg::Cp, 1),
        BInstr::MkInl | BInstr::MkInr => {
            let header = if *instr == BInstr::MkInl {
                Tag::InlHeader
            } else {
                Tag::InrHeader
            };
            b.set_item(hp(0), header, Operand::Imm(2))
                .move_item(R0, sp(-1), hp(1))
                .make_heap_pointer(sp(-1), Tag::HeapIndex)
                .advance(Reg::Hp, 2)
                .advance(Reg::Cp, 1)
        }
        BInstr::Fst | BInstr::Snd => {
            let slot = if *instr == BInstr::Fst { 1 } else { 2 };
            let header = heap(R2, 0).with_field(Field::Tag);
            b.get_and_check(R2, sp(-1), Some(Tag::HeapIndex))
                .add(UKind::MemCheck(header))
                .tag_check(header, Tag::PairHeader)
                .move_item(R0, heap(R2, slot), sp(-1))
                .advance(Reg::Cp, 1)
        }
        BInstr::Push(value) => {
            let item = value.item();
            b.set_item(sp(0), item.tag, Operand::Imm(item.value as i64))
                .advance(Reg::Sp, 1)
                .advance(Reg::Cp, 1)
        }
        BInstr::Apply => {
            let header = heap(R2, 0).with_field(Field::Tag);
            b.set_item(sp(0), Tag::FramePointer, Operand::Reg(Reg::Fp))
                .oper(BinaryOp::Add, R0, Reg::Cp, Operand::Imm(1))
                .set_item(sp(1), Tag::ReturnAddress, Operand::Reg(R0))
                .get_and_check(R2, sp(-1), Some(Tag::HeapIndex))
                .add(UKind::MemCheck(header))
                .tag_check(header, Tag::ClosureHeader)
                .get_and_check(R0, heap(R2, 1), Some(Tag::CodeIndex))
                .oper(BinaryOp::Add, Reg::Fp, Reg::Sp, Operand::Imm(0))
                .advance(Reg::Sp, 2)
                .mov(Reg::Cp, R0)
                .add(UKind::Apply)
                .add(UKind::Guard)
        }
        BInstr::Lookup(LookupLocation::Stack, offset) => b
            .move_item(R0, fp(offset), sp(0))
            .advance(Reg::Sp, 1)
            .advance(Reg::Cp, 1),
        BInstr::Lookup(LookupLocation::Heap, offset) => b
            .get_and_check(R2, fp(-1), Some(Tag::HeapIndex))
            .move_item(R0, heap(R2, offset + 1), sp(0))
            .advance(Reg::Sp, 1)
            .advance(Reg::Cp, 1),
        BInstr::Return => b
            .move_item(R0, sp(-1), fp(-2))
            .get_and_check(R0, fp(0), Some(Tag::FramePointer))
            .get_and_check(R1, fp(1), Some(Tag::ReturnAddress))
            .oper(BinaryOp::Sub, Reg::Sp, Reg::Fp, Operand::Imm(1))
            .oper(BinaryOp::Add, Reg::Fp, R0, Operand::Imm(0))
            .mov(Reg::Cp, R1)
            .add(UKind::Return)
            .add(UKind::Guard),
        BInstr::MkClosure { target, captured } => {
            let n = captured as i64;
            (0..n)
                .fold(
                    b.set_item(hp(0), Tag::ClosureHeader, Operand::Imm(n + 2))
                        .set_item(hp(1), Tag::CodeIndex, Operand::Imm(target as i64)),
                    |b, i| b.move_item(R0, sp(-1 - i), hp(2 + i)),
                )
                .make_heap_pointer(sp(-n), Tag::HeapIndex)
                .advance(Reg::Hp, n + 2)
                .retreat(Reg::Sp, n - 1)
                .advance(Reg::Cp, 1)
        }
        BInstr::Swap => [Field::Tag, Field::Value]
            .into_iter()
            .fold(b, |b, field| {
                b.get_and_check(R0, sp(-2).with_field(field), None)
                    .get_and_check(R1, sp(-1).with_field(field), None)
                    .set_and_check(sp(-2).with_field(field), R1)
                    .set_and_check(sp(-1).with_field(field), R0)
            })
            .advance(Reg::Cp, 1),
        BInstr::Pop => b
            .add(UKind::MemCheck(sp(-1)))
            .retreat(Reg::Sp, 1)
            .advance(Reg::Cp, 1),
        BInstr::Label | BInstr::Function => b.advance(Reg::Cp, 1),
        BInstr::Deref => b
            .get_and_check(R2, sp(-1), Some(Tag::HeapRef))
            .move_item(R0, heap(R2, 0), sp(-1))
            .advance(Reg::Cp, 1),
        BInstr::MkRef => b
            .move_item(R0, sp(-1), hp(0))
            .make_heap_pointer(sp(-1), Tag::HeapRef)
            .advance(Reg::Hp, 1)
            .advance(Reg::Cp, 1),
        BInstr::Assign => b
            .get_and_check(R2, sp(-2), Some(Tag::HeapRef))
            .move_item(R0, sp(-1), heap(R2, 0))
            .set_item(sp(-2), Tag::Unit, Operand::Imm(0))
            .retreat(Reg::Sp, 1)
            .advance(Reg::Cp, 1),
        BInstr::Halt => b.add(UKind::Halt),
        BInstr::Goto(dest) => b.add(UKind::Goto(dest)).add(UKind::Guard),
        BInstr::Test(dest) => b
            .get_and_check(R0, sp(-1), Some(Tag::Bool))
            .retreat(Reg::Sp, 1)
            .add(UKind::Branch {
                cond: Operand::Reg(R0),
                dest,
            })
            .add(UKind::Guard),
        BInstr::Case(dest) => {
            let header = heap(R2, 0).with_field(Field::Tag);
            b.get_and_check(R2, sp(-1), Some(Tag::HeapIndex))
                .add(UKind::MemCheck(header))
                .add(UKind::TagCheck {
                    arg: header.into(),
                    a: Tag::InlHeader,
                    b: Tag::InrHeader,
                })
                .move_item(R0, heap(R2, 1), sp(-1))
                .get_and_check(R0, header, None)
                .oper(BinaryOp::Eq, R0, R0, Operand::tag(Tag::InlHeader))
                .add(UKind::Branch {
                    cond: Operand::Reg(R0),
                    dest,
                })
                .add(UKind::Guard)
        }
    };
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcode::PushValue;
    use crate::ucode::{LocKind, UArg};
    use crate::vm::UnaryOp;

    fn kinds(instr: BInstr) -> Vec<UKind> {
        lower(&instr, 7).iter().map(|u| u.kind).collect()
    }

    #[test]
    fn test_push_shape() {
        assert_eq!(
            kinds(BInstr::Push(PushValue::Int(-5))),
            vec![
                UKind::Label,
                UKind::MemCheck(Location::sp(0, Field::Tag)),
                UKind::Set {
                    dst: Location::sp(0, Field::Tag),
                    src: Operand::tag(Tag::Int)
                },
                UKind::MemCheck(sp(0)),
                UKind::Set {
                    dst: sp(0),
                    src: Operand::Imm(-5)
                },
                UKind::Oper {
                    op: BinaryOp::Add,
                    dst: Reg::Sp,
                    lhs: Operand::Reg(Reg::Sp),
                    rhs: Operand::Imm(1)
                },
                UKind::Oper {
                    op: BinaryOp::Add,
                    dst: Reg::Cp,
                    lhs: Operand::Reg(Reg::Cp),
                    rhs: Operand::Imm(1)
                },
            ]
        );
    }

    #[test]
    fn test_every_instruction_starts_with_label() {
        let all = [
            BInstr::Unary(UnaryOp::Read),
            BInstr::Oper(BinaryOp::Eq),
            BInstr::Oper(BinaryOp::Div),
            BInstr::MkPair,
            BInstr::Fst,
            BInstr::MkInr,
            BInstr::Push(PushValue::Unit),
            BInstr::Apply,
            BInstr::Lookup(LookupLocation::Heap, 1),
            BInstr::Return,
            BInstr::MkClosure { target: 0, captured: 3 },
            BInstr::Swap,
            BInstr::Pop,
            BInstr::Deref,
            BInstr::MkRef,
            BInstr::Assign,
            BInstr::Halt,
            BInstr::Goto(1),
            BInstr::Test(1),
            BInstr::Case(1),
        ];
        for instr in all {
            let code = lower(&instr, 7);
            assert_eq!(code[0].kind, UKind::Label, "{instr}");
            assert!(code.iter().all(|u| u.cp == 7), "{instr}");
        }
    }

    #[test]
    fn test_control_transfers_end_with_guard() {
        for instr in [BInstr::Apply, BInstr::Return, BInstr::Goto(2), BInstr::Test(2), BInstr::Case(2)] {
            let code = lower(&instr, 0);
            assert_eq!(code[code.len() - 1].kind, UKind::Guard, "{instr}");
        }
        assert_eq!(kinds(BInstr::Halt), vec![UKind::Label, UKind::Halt]);
    }

    #[test]
    fn test_heap_checks_precede_stack_writes() {
        // a yield at a heap check must leave the visible stack untouched
        for instr in [
            BInstr::MkPair,
            BInstr::MkInl,
            BInstr::Fst,
            BInstr::Apply,
            BInstr::MkClosure { target: 0, captured: 2 },
            BInstr::Deref,
            BInstr::MkRef,
            BInstr::Assign,
            BInstr::Case(3),
            BInstr::Lookup(LookupLocation::Heap, 0),
        ] {
            let code = lower(&instr, 0);
            let visible_write = code
                .iter()
                .position(|u| match u.kind {
                    UKind::Set { dst, .. } => match dst.kind {
                        LocKind::Sp => dst.offset < 0,
                        LocKind::Fp => true,
                        LocKind::Heap(base) => base != Reg::Hp,
                    },
                    UKind::Oper { dst, .. } | UKind::Move { dst, .. } => dst.is_machine(),
                    _ => false,
                })
                .unwrap_or(code.len());
            let checked_before: Vec<Location> = code[..visible_write]
                .iter()
                .filter_map(|u| match u.kind {
                    UKind::MemCheck(loc) => Some(loc.with_field(Field::Tag)),
                    _ => None,
                })
                .collect();
            for u in &code[visible_write..] {
                if let UKind::MemCheck(loc) = u.kind
                    && matches!(loc.kind, LocKind::Heap(_))
                {
                    // a repeated check of an index already checked cannot fail
                    assert!(checked_before.contains(&loc.with_field(Field::Tag)), "{instr}");
                }
            }
        }
    }

    #[test]
    fn test_case_accepts_both_headers() {
        let code = kinds(BInstr::Case(3));
        assert!(code.contains(&UKind::TagCheck {
            arg: UArg::Loc(Location::heap(R2, 0, Field::Tag)),
            a: Tag::InlHeader,
            b: Tag::InrHeader,
        }));
    }
}
