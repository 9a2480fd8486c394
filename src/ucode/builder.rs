use super::instr::{Field, Location, Operand, Reg, UArg, UInstr, UKind};
use crate::code::Code;
use crate::vm::{BinaryOp, Tag};

/// Accumulates the U-code of one B-code instruction.
pub struct UCodeBuilder {
    cp: usize,
    code: Code<UInstr>,
}

impl UCodeBuilder {
    pub fn new(cp: usize) -> Self {
        Self {
            cp,
            code: Code::new(),
        }
    }

    pub fn add(mut self, kind: UKind) -> Self {
        self.code.push(UInstr::new(self.cp, kind));
        self
    }

    /// Emit `kind` only when `condition` holds.
    pub fn add_if(self, condition: bool, kind: UKind) -> Self {
        if condition { self.add(kind) } else { self }
    }

    /// Apply `f` only when `condition` holds.
    pub fn when(self, condition: bool, f: impl FnOnce(Self) -> Self) -> Self {
        if condition { f(self) } else { self }
    }

    pub fn tag_check(self, arg: impl Into<UArg>, tag: Tag) -> Self {
        self.add(UKind::TagCheck {
            arg: arg.into(),
            a: tag,
            b: tag,
        })
    }

    /// Bounds-check `src`, optionally check its tag, then load it.
    pub fn get_and_check(self, dst: Reg, src: Location, tag: Option<Tag>) -> Self {
        let checked = self.add(UKind::MemCheck(src));
        let checked = match tag {
            Some(tag) => checked.tag_check(src.with_field(Field::Tag), tag),
            None => checked,
        };
        checked.add(UKind::Get { dst, src })
    }

    pub fn set_and_check(self, dst: Location, src: impl Into<Operand>) -> Self {
        self.add(UKind::MemCheck(dst)).add(UKind::Set {
            dst,
            src: src.into(),
        })
    }

    /// Copy one word from `from` to `to` through `via`.
    pub fn move_and_check(self, via: Reg, from: Location, to: Location) -> Self {
        self.get_and_check(via, from, None).set_and_check(to, via)
    }

    /// Copy a whole item, tag first.
    pub fn move_item(self, via: Reg, from: Location, to: Location) -> Self {
        self.move_and_check(via, from.with_field(Field::Tag), to.with_field(Field::Tag))
            .move_and_check(via, from.with_field(Field::Value), to.with_field(Field::Value))
    }

    /// Store a full literal item at `dst`.
    pub fn set_item(self, dst: Location, tag: Tag, value: Operand) -> Self {
        self.set_and_check(dst.with_field(Field::Tag), Operand::tag(tag))
            .set_and_check(dst.with_field(Field::Value), value)
    }

    /// Point `at` to the object starting at `hp`.
    pub fn make_heap_pointer(self, at: Location, tag: Tag) -> Self {
        self.set_item(at, tag, Operand::Reg(Reg::Hp))
    }

    pub fn oper(self, op: BinaryOp, dst: Reg, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        self.add(UKind::Oper {
            op,
            dst,
            lhs: lhs.into(),
            rhs: rhs.into(),
        })
    }

    /// `reg <- reg + delta`.
    pub fn advance(self, reg: Reg, delta: i64) -> Self {
        self.oper(BinaryOp::Add, reg, reg, Operand::Imm(delta))
    }

    /// `reg <- reg - delta`.
    pub fn retreat(self, reg: Reg, delta: i64) -> Self {
        self.oper(BinaryOp::Sub, reg, reg, Operand::Imm(delta))
    }

    pub fn mov(self, dst: Reg, src: impl Into<Operand>) -> Self {
        self.add(UKind::Move {
            dst,
            src: src.into(),
        })
    }

    pub fn build(self) -> Code<UInstr> {
        self.code
    }
}
