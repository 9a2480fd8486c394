//! Group compiler: U-code of a group of B-instructions to x86-64.
//!
//! Every position starts at its own label. The four VM registers stay in
//! callee-saved registers for the whole run and the scratch registers `r0..r2`
//! live in `r8..r10`. Memory is always reached through the frame, so a growth
//! inside a callback is picked up by the next access.

use super::JitError;
use super::codebuf::{CodeBuffer, Label};
use super::frame::{self, JitFrame, JitHost, REGION_HEAP, REGION_STACK};
use super::memory::ExecutableMemory;
use super::x86_64::{Cond, Reg, X86_64Assembler};
use crate::code::Code;
use crate::ucode::{self, Location, Operand, Region, UArg, UInstr, UKind};
use crate::vm::{BinaryOp, IntReader, Item, MachineState, RuntimeError, Status, Tag, UnaryOp};

/// Register conventions for compiled groups (System V AMD64).
///
/// - RBX: frame pointer (callee-saved)
/// - R12..R15: sp, fp, cp, hp (callee-saved)
/// - R8..R10: r0, r1, r2 (spilled around callbacks)
/// - RAX, RCX, RDX, R11: temporaries
pub mod regs {
    use super::Reg;

    pub const FRAME: Reg = Reg::Rbx;
    pub const SP: Reg = Reg::R12;
    pub const FP: Reg = Reg::R13;
    pub const CP: Reg = Reg::R14;
    pub const HP: Reg = Reg::R15;
    pub const R0: Reg = Reg::R8;
    pub const R1: Reg = Reg::R9;
    pub const R2: Reg = Reg::R10;

    pub const TMP0: Reg = Reg::Rax;
    pub const TMP1: Reg = Reg::Rcx;
    pub const TMP2: Reg = Reg::Rdx;
    /// Holds immediates too wide for an imm32 operand.
    pub const WIDE: Reg = Reg::R11;
}

/// Size of an item in memory.
pub const ITEM_SIZE: i64 = Item::SIZE as i64;

fn host_reg(reg: ucode::Reg) -> Reg {
    match reg {
        ucode::Reg::R0 => regs::R0,
        ucode::Reg::R1 => regs::R1,
        ucode::Reg::R2 => regs::R2,
        ucode::Reg::Sp => regs::SP,
        ucode::Reg::Fp => regs::FP,
        ucode::Reg::Cp => regs::CP,
        ucode::Reg::Hp => regs::HP,
    }
}

/// How branches inside a group are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupShape {
    /// A syntactic range. Outside function mode, only entry points are valid
    /// internal targets.
    Static { function: bool },
    /// A recorded path that loops back to its first position.
    Trace,
}

/// Input of `compile_group`.
#[derive(Debug, Clone, Copy)]
pub struct GroupSource<'a> {
    /// U-code of each position.
    pub positions: &'a [Code<UInstr>],
    /// B-code cp of each position.
    pub cps: &'a [usize],
    pub entries: &'a [usize],
    pub shape: GroupShape,
}

/// Native code for one group.
pub struct CompiledGroup {
    memory: ExecutableMemory,
    entries: Vec<usize>,
    positions: usize,
    code_size: usize,
}

impl CompiledGroup {
    pub fn entries(&self) -> &[usize] {
        &self.entries
    }

    /// Number of B-instructions compiled.
    pub fn len(&self) -> usize {
        self.positions
    }

    pub fn is_empty(&self) -> bool {
        self.positions == 0
    }

    /// Native code size in bytes.
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Get the entry point as a function pointer.
    ///
    /// # Safety
    /// The memory holds code emitted by `compile_group`, which follows the
    /// System V ABI and expects a valid frame with a live host.
    unsafe fn entry_point(&self) -> unsafe extern "C" fn(*mut JitFrame) {
        unsafe { std::mem::transmute::<*const u8, unsafe extern "C" fn(*mut JitFrame)>(self.memory.as_ptr()) }
    }

    /// Run from the current state until control leaves the group.
    ///
    /// Returns whether the run stopped early so the host can collect. The
    /// state then stands at the start of the instruction that ran out of heap.
    pub fn run(&self, state: &mut MachineState, io: &mut dyn IntReader) -> bool {
        let collecting = state.heap_collects();
        let mut frame = JitFrame::new(state);
        let mut host = JitHost {
            state,
            io,
            fault: None,
            collecting,
        };
        frame.host = (&mut host as *mut JitHost<'_>).cast();

        // SAFETY: the frame points at live memories and at `host`, both of which
        // outlive the call. The code only touches memory checked against the
        // lengths in the frame.
        unsafe {
            let entry = self.entry_point();
            entry(&mut frame);
        }

        let JitHost { state, fault, .. } = host;
        frame.store(state);
        if Status::from_code(frame.status) == Status::RuntimeError {
            state.fail(fault.unwrap_or(RuntimeError::CompiledCheckFailed { cp: state.cp }));
        } else {
            state.status = Status::from_code(frame.status);
        }
        frame.yielded != 0
    }
}

/// Compile a group to native code.
pub fn compile_group(source: &GroupSource<'_>) -> Result<CompiledGroup, JitError> {
    if !cfg!(all(target_arch = "x86_64", unix)) {
        return Err(JitError::UnsupportedTarget);
    }
    let mut compiler = GroupCompiler::new(source);
    compiler.compile()?;
    let code_size = compiler.buf.len();
    let memory = compiler.buf.finalize()?;
    Ok(CompiledGroup {
        memory,
        entries: source.entries.to_vec(),
        positions: source.positions.len(),
        code_size,
    })
}

struct GroupCompiler<'a> {
    buf: CodeBuffer,
    source: &'a GroupSource<'a>,
    /// Start of every position.
    labels: Vec<Label>,
    exit: Label,
    error: Label,
    yield_: Label,
}

impl<'a> GroupCompiler<'a> {
    fn new(source: &'a GroupSource<'a>) -> Self {
        let size: usize = source.positions.iter().map(|code| code.len()).sum();
        let mut buf = CodeBuffer::with_capacity(64 + size * 24);
        let labels = (0..source.positions.len()).map(|_| buf.new_label()).collect();
        let exit = buf.new_label();
        let error = buf.new_label();
        let yield_ = buf.new_label();
        Self {
            buf,
            source,
            labels,
            exit,
            error,
            yield_,
        }
    }

    fn asm(&mut self) -> X86_64Assembler<'_> {
        X86_64Assembler::new(&mut self.buf)
    }

    fn compile(&mut self) -> Result<(), JitError> {
        self.emit_prologue();
        self.emit_dispatch()?;
        let source = self.source;
        for (pos, code) in source.positions.iter().enumerate() {
            let label = self.labels[pos];
            self.asm().bind(label);
            for instr in code.iter() {
                self.emit_instr(pos, instr)?;
            }
        }
        let after = match self.source.shape {
            GroupShape::Trace if !self.labels.is_empty() => self.labels[0],
            _ => self.exit,
        };
        self.asm().jmp(after);
        self.emit_stubs();
        Ok(())
    }

    // ==================== Frame ====================

    fn emit_prologue(&mut self) {
        let mut asm = self.asm();
        asm.push(Reg::Rbp);
        asm.mov_rr(Reg::Rbp, Reg::Rsp);
        asm.push(Reg::Rbx);
        asm.push(Reg::R12);
        asm.push(Reg::R13);
        asm.push(Reg::R14);
        asm.push(Reg::R15);
        // six pushes plus the return address: realign for callbacks
        asm.sub_ri32(Reg::Rsp, 8);

        asm.mov_rr(regs::FRAME, Reg::Rdi);
        asm.mov_rm(regs::SP, regs::FRAME, frame::SP);
        asm.mov_rm(regs::FP, regs::FRAME, frame::FP);
        asm.mov_rm(regs::CP, regs::FRAME, frame::CP);
        asm.mov_rm(regs::HP, regs::FRAME, frame::HP);
    }

    /// `cmp cp, k; je label` for every entry point.
    fn emit_dispatch(&mut self) -> Result<(), JitError> {
        let source = self.source;
        for &entry in source.entries {
            let target = match source.shape {
                GroupShape::Trace => (source.cps.first() == Some(&entry)).then_some(0),
                GroupShape::Static { .. } => source.cps.iter().position(|&cp| cp == entry),
            };
            if let Some(pos) = target {
                let label = self.labels[pos];
                self.cmp_cp(entry)?;
                self.asm().jcc(Cond::E, label);
            }
        }
        let exit = self.exit;
        self.asm().jmp(exit);
        Ok(())
    }

    fn emit_stubs(&mut self) {
        let (exit, error, yield_) = (self.exit, self.error, self.yield_);
        let mut asm = self.asm();

        asm.bind(yield_);
        asm.mov_mi32(regs::FRAME, frame::YIELDED, 1);
        asm.jmp(exit);

        asm.bind(error);
        asm.mov_mi32(regs::FRAME, frame::STATUS, Status::RuntimeError.code() as i32);

        asm.bind(exit);
        asm.mov_mr(regs::FRAME, frame::SP, regs::SP);
        asm.mov_mr(regs::FRAME, frame::FP, regs::FP);
        asm.mov_mr(regs::FRAME, frame::CP, regs::CP);
        asm.mov_mr(regs::FRAME, frame::HP, regs::HP);
        asm.add_ri32(Reg::Rsp, 8);
        asm.pop(Reg::R15);
        asm.pop(Reg::R14);
        asm.pop(Reg::R13);
        asm.pop(Reg::R12);
        asm.pop(Reg::Rbx);
        asm.pop(Reg::Rbp);
        asm.ret();
    }

    // ==================== Helpers ====================

    fn cmp_cp(&mut self, cp: usize) -> Result<(), JitError> {
        let cp = i64::try_from(cp).map_err(|_| JitError::OffsetOutOfRange(i64::MAX))?;
        let mut asm = self.asm();
        match i32::try_from(cp) {
            Ok(imm) => asm.cmp_ri32(regs::CP, imm),
            Err(_) => {
                asm.mov_ri64(regs::WIDE, cp);
                asm.cmp_rr(regs::CP, regs::WIDE);
            }
        }
        Ok(())
    }

    fn load(&mut self, dst: Reg, operand: Operand) {
        let mut asm = self.asm();
        match operand {
            Operand::Reg(reg) => {
                let src = host_reg(reg);
                if src != dst {
                    asm.mov_rr(dst, src);
                }
            }
            Operand::Imm(value) => asm.mov_imm(dst, value),
        }
    }

    /// `dst += imm` for any immediate.
    fn add_imm(&mut self, dst: Reg, imm: i64) {
        let mut asm = self.asm();
        match i32::try_from(imm) {
            Ok(0) => {}
            Ok(imm) => asm.add_ri32(dst, imm),
            Err(_) => {
                asm.mov_ri64(regs::WIDE, imm);
                asm.add_rr(dst, regs::WIDE);
            }
        }
    }

    /// Leave TMP0 pointing at the item of `loc` and return the field displacement.
    fn address(&mut self, loc: Location) -> Result<i32, JitError> {
        let data = match loc.region() {
            Region::Stack => frame::STACK_DATA,
            Region::Heap => frame::HEAP_DATA,
        };
        let disp = loc
            .offset
            .checked_mul(ITEM_SIZE)
            .and_then(|bytes| bytes.checked_add(loc.field.byte_offset()))
            .and_then(|bytes| i32::try_from(bytes).ok())
            .ok_or(JitError::OffsetOutOfRange(loc.offset))?;
        let mut asm = self.asm();
        asm.mov_rm(regs::TMP0, regs::FRAME, data);
        asm.mov_rr(regs::TMP1, host_reg(loc.base()));
        asm.shl_ri(regs::TMP1, 4);
        asm.add_rr(regs::TMP0, regs::TMP1);
        Ok(disp)
    }

    fn spill(&mut self) {
        let mut asm = self.asm();
        for (slot, reg) in [regs::R0, regs::R1, regs::R2].into_iter().enumerate() {
            asm.mov_mr(regs::FRAME, frame::SPILL + 8 * slot as i32, reg);
        }
    }

    fn reload(&mut self) {
        let mut asm = self.asm();
        for (slot, reg) in [regs::R0, regs::R1, regs::R2].into_iter().enumerate() {
            asm.mov_rm(reg, regs::FRAME, frame::SPILL + 8 * slot as i32);
        }
    }

    /// Label a direct branch from `pos` to `dest` goes to.
    fn resolve(&self, pos: usize, dest: usize) -> Label {
        let cps = self.source.cps;
        let target = match self.source.shape {
            GroupShape::Trace => {
                if cps.get(pos + 1) == Some(&dest) {
                    Some(pos + 1)
                } else if cps.first() == Some(&dest) {
                    Some(0)
                } else {
                    None
                }
            }
            GroupShape::Static { function: true } => cps.iter().position(|&cp| cp == dest),
            GroupShape::Static { function: false } => {
                if self.source.entries.contains(&dest) {
                    cps.iter().position(|&cp| cp == dest)
                } else {
                    None
                }
            }
        };
        target.map_or(self.exit, |pos| self.labels[pos])
    }

    /// `cp = dest`, then go there.
    fn jump_to(&mut self, pos: usize, dest: usize) -> Result<(), JitError> {
        let target = self.resolve(pos, dest);
        let dest = i64::try_from(dest).map_err(|_| JitError::OffsetOutOfRange(i64::MAX))?;
        let mut asm = self.asm();
        asm.mov_imm(regs::CP, dest);
        asm.jmp(target);
        Ok(())
    }

    // ==================== Instructions ====================

    fn emit_instr(&mut self, pos: usize, instr: &UInstr) -> Result<(), JitError> {
        match instr.kind {
            UKind::Get { dst, src } => {
                let disp = self.address(src)?;
                self.asm().mov_rm(host_reg(dst), regs::TMP0, disp);
            }
            UKind::Set { dst, src } => {
                let disp = self.address(dst)?;
                let value = match src {
                    Operand::Reg(reg) => host_reg(reg),
                    Operand::Imm(value) => {
                        self.asm().mov_imm(regs::TMP2, value);
                        regs::TMP2
                    }
                };
                self.asm().mov_mr(regs::TMP0, disp, value);
            }
            UKind::Move { dst, src } => self.load(host_reg(dst), src),
            UKind::Unary { op, dst, src } => self.emit_unary(op, host_reg(dst), src),
            UKind::Oper { op, dst, lhs, rhs } => self.emit_oper(op, host_reg(dst), lhs, rhs),
            UKind::Label => {
                self.cmp_cp(instr.cp)?;
                let exit = self.exit;
                self.asm().jcc(Cond::Ne, exit);
            }
            UKind::MemCheck(loc) => self.emit_mem_check(loc),
            UKind::TagCheck { arg, a, b } => self.emit_tag_check(arg, a, b)?,
            UKind::Halt => {
                let exit = self.exit;
                let mut asm = self.asm();
                asm.mov_mi32(regs::FRAME, frame::STATUS, Status::Halted.code() as i32);
                asm.jmp(exit);
            }
            UKind::Goto(dest) => self.jump_to(pos, dest)?,
            UKind::Branch { cond, dest } => {
                let taken = self.resolve(pos, instr.cp + 1);
                self.load(regs::TMP0, cond);
                let mut asm = self.asm();
                let otherwise = asm.new_label();
                asm.test_rr(regs::TMP0, regs::TMP0);
                asm.jcc(Cond::E, otherwise);
                asm.add_ri32(regs::CP, 1);
                asm.jmp(taken);
                asm.bind(otherwise);
                self.jump_to(pos, dest)?;
            }
            UKind::Apply | UKind::Return | UKind::Guard => {}
        }
        Ok(())
    }

    fn emit_mem_check(&mut self, loc: Location) {
        let (len, region) = match loc.region() {
            Region::Stack => (frame::STACK_LEN, REGION_STACK),
            Region::Heap => (frame::HEAP_LEN, REGION_HEAP),
        };
        let (error, yield_) = (self.error, self.yield_);
        let retry = self.asm().new_label();
        let ok = self.asm().new_label();

        self.asm().bind(retry);
        self.load(regs::TMP0, Operand::Reg(loc.base()));
        self.add_imm(regs::TMP0, loc.offset);
        {
            let mut asm = self.asm();
            asm.test_rr(regs::TMP0, regs::TMP0);
            asm.jcc(Cond::S, error);
            asm.mov_rm(regs::TMP1, regs::FRAME, len);
            asm.cmp_rr(regs::TMP0, regs::TMP1);
            asm.jcc(Cond::B, ok);
        }

        self.spill();
        {
            let mut asm = self.asm();
            asm.mov_rr(Reg::Rdi, regs::FRAME);
            asm.mov_ri32(Reg::Rsi, region as i32);
            asm.call_m(regs::FRAME, frame::GROW);
        }
        self.reload();

        let mut asm = self.asm();
        asm.test_rr(Reg::Rax, Reg::Rax);
        asm.jcc(Cond::E, retry);
        asm.cmp_ri32(Reg::Rax, frame::GROW_YIELD as i32);
        asm.jcc(Cond::E, yield_);
        asm.jmp(error);
        asm.bind(ok);
    }

    fn emit_tag_check(&mut self, arg: UArg, a: Tag, b: Tag) -> Result<(), JitError> {
        let error = self.error;
        match arg {
            UArg::Imm(value) => {
                if value != a.code() as i64 && value != b.code() as i64 {
                    self.asm().jmp(error);
                }
                return Ok(());
            }
            UArg::Reg(reg) => self.load(regs::TMP0, Operand::Reg(reg)),
            UArg::Loc(loc) => {
                let disp = self.address(loc)?;
                self.asm().mov_rm(regs::TMP0, regs::TMP0, disp);
            }
        }
        let mut asm = self.asm();
        if a == b {
            asm.cmp_ri32(regs::TMP0, a.code() as i32);
            asm.jcc(Cond::Ne, error);
        } else {
            let ok = asm.new_label();
            asm.cmp_ri32(regs::TMP0, a.code() as i32);
            asm.jcc(Cond::E, ok);
            asm.cmp_ri32(regs::TMP0, b.code() as i32);
            asm.jcc(Cond::Ne, error);
            asm.bind(ok);
        }
        Ok(())
    }

    fn emit_unary(&mut self, op: UnaryOp, dst: Reg, src: Operand) {
        match op {
            UnaryOp::Not => {
                self.load(regs::TMP0, src);
                let mut asm = self.asm();
                asm.test_rr(regs::TMP0, regs::TMP0);
                asm.set_bool(Cond::E, regs::TMP0);
                asm.mov_rr(dst, regs::TMP0);
            }
            UnaryOp::Neg => {
                self.load(regs::TMP0, src);
                let mut asm = self.asm();
                asm.neg(regs::TMP0);
                asm.mov_rr(dst, regs::TMP0);
            }
            UnaryOp::Read => {
                let error = self.error;
                self.spill();
                {
                    let mut asm = self.asm();
                    asm.mov_rr(Reg::Rdi, regs::FRAME);
                    asm.call_m(regs::FRAME, frame::READ_INT);
                }
                self.reload();
                let mut asm = self.asm();
                asm.test_rr(Reg::Rax, Reg::Rax);
                asm.jcc(Cond::Ne, error);
                asm.mov_rm(dst, regs::FRAME, frame::READ_VALUE);
            }
        }
    }

    fn emit_oper(&mut self, op: BinaryOp, dst: Reg, lhs: Operand, rhs: Operand) {
        // register bumps such as `cp += 1`
        if let (BinaryOp::Add | BinaryOp::Sub, Operand::Reg(reg), Operand::Imm(imm)) = (op, lhs, rhs)
            && host_reg(reg) == dst
            && let Ok(imm) = i32::try_from(imm)
        {
            let mut asm = self.asm();
            match op {
                BinaryOp::Add => asm.add_ri32(dst, imm),
                _ => asm.sub_ri32(dst, imm),
            }
            return;
        }

        let error = self.error;
        if op == BinaryOp::Div && rhs == Operand::Imm(0) {
            self.asm().jmp(error);
            return;
        }
        self.load(regs::TMP0, lhs);
        self.load(regs::TMP1, rhs);
        let (acc, arg) = (regs::TMP0, regs::TMP1);
        let mut asm = self.asm();
        match op {
            BinaryOp::And => asm.and_rr(acc, arg),
            BinaryOp::Or => asm.or_rr(acc, arg),
            BinaryOp::Add => asm.add_rr(acc, arg),
            BinaryOp::Sub => asm.sub_rr(acc, arg),
            BinaryOp::Mul => asm.imul_rr(acc, arg),
            BinaryOp::Eq => {
                asm.cmp_rr(acc, arg);
                asm.set_bool(Cond::E, acc);
            }
            BinaryOp::Lt => {
                asm.cmp_rr(acc, arg);
                asm.set_bool(Cond::L, acc);
            }
            BinaryOp::Div => {
                // MIN / -1 traps in IDIV; wrapping gives MIN, which is -MIN
                let divide = asm.new_label();
                let done = asm.new_label();
                asm.test_rr(arg, arg);
                asm.jcc(Cond::E, error);
                asm.cmp_ri32(arg, -1);
                asm.jcc(Cond::Ne, divide);
                asm.neg(acc);
                asm.jmp(done);
                asm.bind(divide);
                asm.cqo();
                asm.idiv(arg);
                asm.bind(done);
            }
        }
        asm.mov_rr(dst, acc);
    }
}

#[cfg(all(test, target_arch = "x86_64", unix))]
mod tests {
    use super::*;
    use crate::bcode::{self, BInstr};
    use crate::config::{MemoryPolicy, OptimizationPass};
    use crate::opt::OptimizationPipeline;
    use crate::vm::{Item, ScriptedReader, shared_manager};

    const COUNTDOWN: &str = "\
PUSH STACK_INT 5
LABEL top
PUSH STACK_INT -1
OPER ADD
PUSH STACK_INT 0
LOOKUP STACK_LOCATION 0
OPER LT
TEST done
GOTO top
LABEL done
HALT";

    fn lowered(code: &Code<BInstr>, cps: &[usize]) -> Vec<Code<UInstr>> {
        cps.iter().map(|&cp| bcode::lower(&code[cp], cp)).collect()
    }

    fn compile(positions: &[Code<UInstr>], cps: &[usize], entries: &[usize], shape: GroupShape) -> CompiledGroup {
        compile_group(&GroupSource {
            positions,
            cps,
            entries,
            shape,
        })
        .unwrap()
    }

    fn whole_program(source: &str) -> (Code<BInstr>, CompiledGroup) {
        let code = bcode::decode(source).unwrap();
        let cps: Vec<usize> = (0..code.len()).collect();
        let group = compile(&lowered(&code, &cps), &cps, &[0], GroupShape::Static { function: true });
        (code, group)
    }

    fn state(policy: MemoryPolicy) -> MachineState {
        MachineState::new(shared_manager(policy))
    }

    fn interpret_rest(code: &Code<BInstr>, state: &mut MachineState, io: &mut ScriptedReader) {
        while state.is_running() && state.cp < code.len() {
            let cp = state.cp;
            if let Err(err) = bcode::interpret(&code[cp], state, io) {
                state.fail(err);
            }
        }
    }

    /// Run the group wherever it can be entered and interpret elsewhere.
    fn drive(code: &Code<BInstr>, group: &CompiledGroup, state: &mut MachineState, io: &mut ScriptedReader) {
        while state.is_running() && state.cp < code.len() {
            if group.entries().contains(&state.cp) && !group.run(state, io) {
                continue;
            }
            if state.is_running() {
                let cp = state.cp;
                if let Err(err) = bcode::interpret(&code[cp], state, io) {
                    state.fail(err);
                }
            }
        }
    }

    #[test]
    fn test_straight_line_arithmetic() {
        let (_, group) = whole_program("PUSH STACK_INT 3\nPUSH STACK_INT 4\nOPER ADD\nHALT");
        let mut state = state(MemoryPolicy::Amortized);
        let yielded = group.run(&mut state, &mut ScriptedReader::default());
        assert!(!yielded);
        assert_eq!(state.status, Status::Halted);
        assert_eq!(state.cp, 3);
        assert_eq!(state.sp, 1);
        assert_eq!(state.top(), Some(Item::int(7)));
    }

    #[test]
    fn test_division_by_zero_fails() {
        let (_, group) = whole_program("PUSH STACK_INT 1\nPUSH STACK_INT 0\nOPER DIV\nHALT");
        let mut state = state(MemoryPolicy::Amortized);
        group.run(&mut state, &mut ScriptedReader::default());
        assert_eq!(state.status, Status::RuntimeError);
    }

    #[test]
    fn test_division_wraps_and_truncates() {
        let (_, group) = whole_program("PUSH STACK_INT -7\nPUSH STACK_INT 2\nOPER DIV\nHALT");
        let mut state = state(MemoryPolicy::Amortized);
        group.run(&mut state, &mut ScriptedReader::default());
        assert_eq!(state.top(), Some(Item::int(-3)));
    }

    #[test]
    fn test_read_calls_back_into_host() {
        let source = "PUSH STACK_UNIT\nUNARY READ\nUNARY NEG\nHALT";
        let (_, group) = whole_program(source);
        let mut state = state(MemoryPolicy::Amortized);
        group.run(&mut state, &mut ScriptedReader::new([12]));
        assert_eq!(state.status, Status::Halted);
        assert_eq!(state.top(), Some(Item::int(-12)));

        let mut state = self::state(MemoryPolicy::Amortized);
        group.run(&mut state, &mut ScriptedReader::default());
        assert_eq!(state.fault, Some(RuntimeError::ReadFailed));
    }

    #[test]
    fn test_fixed_stack_overflow_fails() {
        let source = "LABEL top\nPUSH STACK_UNIT\nGOTO top";
        let (_, group) = whole_program(source);
        let mut state = state(MemoryPolicy::None);
        group.run(&mut state, &mut ScriptedReader::default());
        assert_eq!(state.status, Status::RuntimeError);
        assert!(matches!(state.fault, Some(RuntimeError::GrowthRejected { .. })));
    }

    #[test]
    fn test_loop_matches_interpreter() {
        let (code, group) = whole_program(COUNTDOWN);
        let mut compiled = state(MemoryPolicy::Amortized);
        group.run(&mut compiled, &mut ScriptedReader::default());

        let mut interpreted = state(MemoryPolicy::Amortized);
        interpret_rest(&code, &mut interpreted, &mut ScriptedReader::default());

        assert_eq!(compiled.status, Status::Halted);
        assert_eq!(compiled.status, interpreted.status);
        assert_eq!(compiled.sp, interpreted.sp);
        assert_eq!(compiled.cp, interpreted.cp);
        assert_eq!(compiled.top(), Some(Item::int(0)));
    }

    #[test]
    fn test_trace_loops_until_exit() {
        let code = bcode::decode(COUNTDOWN).unwrap();
        let cps: Vec<usize> = (1..=8).collect();
        let group = compile(&lowered(&code, &cps), &cps, &[1], GroupShape::Trace);

        let mut state = state(MemoryPolicy::Amortized);
        let mut io = ScriptedReader::default();
        bcode::interpret(&code[0], &mut state, &mut io).unwrap();
        group.run(&mut state, &mut io);
        // left through the false edge of TEST
        assert_eq!(state.status, Status::Running);
        assert_eq!(state.cp, 9);
        assert_eq!(state.top(), Some(Item::int(0)));
        interpret_rest(&code, &mut state, &mut io);
        assert_eq!(state.status, Status::Halted);
    }

    #[test]
    fn test_block_exits_through_unknown_targets() {
        let code = bcode::decode(COUNTDOWN).unwrap();
        let cps: Vec<usize> = (1..=7).collect();
        let group = compile(&lowered(&code, &cps), &cps, &[1], GroupShape::Static { function: false });

        let mut state = state(MemoryPolicy::Amortized);
        let mut io = ScriptedReader::default();
        bcode::interpret(&code[0], &mut state, &mut io).unwrap();
        group.run(&mut state, &mut io);
        assert_eq!(state.status, Status::Running);
        assert_eq!(state.cp, 8);
        assert_eq!(state.top(), Some(Item::int(4)));
    }

    #[test]
    fn test_wrong_entry_leaves_state_alone() {
        let (_, group) = whole_program("PUSH STACK_INT 3\nHALT");
        let mut state = state(MemoryPolicy::Amortized);
        state.cp = 1;
        assert!(!group.run(&mut state, &mut ScriptedReader::default()));
        assert_eq!(state.status, Status::Running);
        assert_eq!((state.sp, state.cp), (0, 1));
    }

    #[test]
    fn test_collecting_heap_yields_before_the_instruction() {
        let source = "PUSH STACK_UNIT\nPUSH STACK_INT 5\nMK_PAIR\nSND\nHALT";
        let (code, group) = whole_program(source);
        let mut state = state(MemoryPolicy::MarkCompact);
        let mut io = ScriptedReader::default();
        let yielded = group.run(&mut state, &mut io);
        assert!(yielded);
        assert_eq!(state.status, Status::Running);
        assert_eq!((state.sp, state.cp, state.hp), (2, 2, 0));

        interpret_rest(&code, &mut state, &mut io);
        assert_eq!(state.top(), Some(Item::int(5)));
    }

    #[test]
    fn test_pair_and_closure_call() {
        let source = "\
PUSH STACK_INT 20
MK_CLOSURE f 0
APPLY
HALT
FUNCTION f
LOOKUP STACK_LOCATION -2
PUSH STACK_INT 22
OPER ADD
RETURN";
        let code = bcode::decode(source).unwrap();
        let cps: Vec<usize> = (0..code.len()).collect();
        // re-entered after the call and after FUNCTION
        let group = compile(&lowered(&code, &cps), &cps, &[0, 3, 5], GroupShape::Static { function: true });
        let mut compiled = state(MemoryPolicy::Amortized);
        drive(&code, &group, &mut compiled, &mut ScriptedReader::default());
        let mut interpreted = state(MemoryPolicy::Amortized);
        interpret_rest(&code, &mut interpreted, &mut ScriptedReader::default());

        assert_eq!(compiled.status, Status::Halted);
        assert_eq!(compiled.sp, interpreted.sp);
        assert_eq!(compiled.top(), interpreted.top());
        assert_eq!(compiled.top(), Some(Item::int(42)));
    }

    #[test]
    fn test_optimized_group_runs_the_same() {
        let code = bcode::decode(COUNTDOWN).unwrap();
        let cps: Vec<usize> = (0..code.len()).collect();
        let passes = [
            OptimizationPass::CopyPropagation,
            OptimizationPass::ConstantFolding,
            OptimizationPass::RedundantChecks,
            OptimizationPass::UnusedWrites,
            OptimizationPass::DeadCode,
        ];
        let positions = OptimizationPipeline::new(&passes).optimize(lowered(&code, &cps), &[0], true);
        let group = compile(&positions, &cps, &[0], GroupShape::Static { function: true });

        let mut state = state(MemoryPolicy::Amortized);
        group.run(&mut state, &mut ScriptedReader::default());
        assert_eq!(state.status, Status::Halted);
        assert_eq!(state.top(), Some(Item::int(0)));
        assert_eq!(state.sp, 1);
    }
}
