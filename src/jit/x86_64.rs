//! x86-64 instruction encoding for JIT compilation.
//!
//! Only the 64-bit forms the code generator needs. Uses System V AMD64 ABI
//! conventions.

use super::codebuf::{CodeBuffer, Label};

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Get the register code (lower 3 bits).
    #[inline(always)]
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }

    pub fn needs_rex_ext(self) -> bool {
        (self as u8) >= 8
    }

    /// REX.B bit for this register used as base/rm.
    pub fn rex_b(self) -> u8 {
        if self.needs_rex_ext() { 0x01 } else { 0x00 }
    }

    /// REX.R bit for this register used as reg.
    pub fn rex_r(self) -> u8 {
        if self.needs_rex_ext() { 0x04 } else { 0x00 }
    }
}

/// x86-64 condition codes (for Jcc and SETcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    B = 0x2,  // Below (unsigned <)
    E = 0x4,  // Equal
    Ne = 0x5, // Not equal
    S = 0x8,  // Sign (negative)
    L = 0xC,  // Less (signed <)
}

/// x86-64 assembler.
pub struct X86_64Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> X86_64Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    pub fn new_label(&mut self) -> Label {
        self.buf.new_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.buf.bind(label);
    }

    // ==================== Encoding helpers ====================

    fn emit_rex_w(&mut self, reg: Reg, rm: Reg) {
        self.buf.emit_u8(0x48 | reg.rex_r() | rm.rex_b());
    }

    fn emit_rex_w_single(&mut self, rm: Reg) {
        self.buf.emit_u8(0x48 | rm.rex_b());
    }

    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// ModR/M (plus SIB and displacement) for `[base + disp]`.
    fn emit_mem(&mut self, reg: u8, base: Reg, disp: i32) {
        // rm = 100 selects a SIB byte, mod = 00 with rm = 101 means rip-relative
        let sib = base.code() == 0b100;
        let mode = if disp == 0 && base.code() != 0b101 {
            0b00
        } else if (-128..=127).contains(&disp) {
            0b01
        } else {
            0b10
        };
        self.buf.emit_u8(Self::modrm(mode, reg, base.code()));
        if sib {
            self.buf.emit_u8(0x24);
        }
        match mode {
            0b01 => self.buf.emit_u8(disp as u8),
            0b10 => self.buf.emit_u32(disp as u32),
            _ => {}
        }
    }

    // ==================== Data Movement ====================

    /// MOV r64, r64
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(0x89);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// MOV r64, imm64
    pub fn mov_ri64(&mut self, dst: Reg, imm: i64) {
        self.emit_rex_w_single(dst);
        self.buf.emit_u8(0xB8 + dst.code());
        self.buf.emit_u64(imm as u64);
    }

    /// MOV r64, imm32 (sign-extended)
    pub fn mov_ri32(&mut self, dst: Reg, imm: i32) {
        self.emit_rex_w_single(dst);
        self.buf.emit_u8(0xC7);
        self.buf.emit_u8(Self::modrm(0b11, 0, dst.code()));
        self.buf.emit_u32(imm as u32);
    }

    /// Shortest MOV of any immediate.
    pub fn mov_imm(&mut self, dst: Reg, imm: i64) {
        match i32::try_from(imm) {
            Ok(imm) => self.mov_ri32(dst, imm),
            Err(_) => self.mov_ri64(dst, imm),
        }
    }

    /// MOV r64, [base + disp]
    pub fn mov_rm(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex_w(dst, base);
        self.buf.emit_u8(0x8B);
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOV [base + disp], r64
    pub fn mov_mr(&mut self, base: Reg, disp: i32, src: Reg) {
        self.emit_rex_w(src, base);
        self.buf.emit_u8(0x89);
        self.emit_mem(src.code(), base, disp);
    }

    /// MOV QWORD [base + disp], imm32 (sign-extended)
    pub fn mov_mi32(&mut self, base: Reg, disp: i32, imm: i32) {
        self.emit_rex_w_single(base);
        self.buf.emit_u8(0xC7);
        self.emit_mem(0, base, disp);
        self.buf.emit_u32(imm as u32);
    }

    // ==================== Arithmetic Operations ====================

    /// ADD r64, r64
    pub fn add_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(0x01);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// ADD r64, imm32 (sign-extended)
    pub fn add_ri32(&mut self, dst: Reg, imm: i32) {
        self.group1_ri(0, dst, imm);
    }

    /// SUB r64, r64
    pub fn sub_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(0x29);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// SUB r64, imm32 (sign-extended)
    pub fn sub_ri32(&mut self, dst: Reg, imm: i32) {
        self.group1_ri(5, dst, imm);
    }

    /// CMP r64, imm32 (sign-extended)
    pub fn cmp_ri32(&mut self, dst: Reg, imm: i32) {
        self.group1_ri(7, dst, imm);
    }

    /// The 0x81/0x83 family with `ext` in the reg field.
    fn group1_ri(&mut self, ext: u8, dst: Reg, imm: i32) {
        self.emit_rex_w_single(dst);
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x83);
            self.buf.emit_u8(Self::modrm(0b11, ext, dst.code()));
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x81);
            self.buf.emit_u8(Self::modrm(0b11, ext, dst.code()));
            self.buf.emit_u32(imm as u32);
        }
    }

    /// IMUL r64, r64 (signed multiply, result in first operand)
    pub fn imul_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(dst, src);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0xAF);
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
    }

    /// IDIV r64 (signed divide RDX:RAX by r64, quotient in RAX)
    pub fn idiv(&mut self, src: Reg) {
        self.emit_rex_w_single(src);
        self.buf.emit_u8(0xF7);
        self.buf.emit_u8(Self::modrm(0b11, 7, src.code()));
    }

    /// CQO (sign-extend RAX into RDX:RAX, needed before IDIV)
    pub fn cqo(&mut self) {
        self.buf.emit_u8(0x48);
        self.buf.emit_u8(0x99);
    }

    /// CMP r64, r64
    pub fn cmp_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(0x39);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// AND r64, r64
    pub fn and_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(0x21);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// OR r64, r64
    pub fn or_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(0x09);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// SHL r64, imm8
    pub fn shl_ri(&mut self, dst: Reg, imm: u8) {
        self.emit_rex_w_single(dst);
        self.buf.emit_u8(0xC1);
        self.buf.emit_u8(Self::modrm(0b11, 4, dst.code()));
        self.buf.emit_u8(imm);
    }

    /// NEG r64 (two's complement negation)
    pub fn neg(&mut self, dst: Reg) {
        self.emit_rex_w_single(dst);
        self.buf.emit_u8(0xF7);
        self.buf.emit_u8(Self::modrm(0b11, 3, dst.code()));
    }

    /// TEST r64, r64
    pub fn test_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex_w(src, dst);
        self.buf.emit_u8(0x85);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// SETcc r8 followed by MOVZX r64, r8.
    pub fn set_bool(&mut self, cond: Cond, dst: Reg) {
        if dst.needs_rex_ext() || matches!(dst, Reg::Rsp | Reg::Rbp | Reg::Rsi | Reg::Rdi) {
            // SPL, BPL, SIL, DIL and R8B-R15B need a REX prefix
            self.buf.emit_u8(0x40 | dst.rex_b());
        }
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x90 + cond as u8);
        self.buf.emit_u8(Self::modrm(0b11, 0, dst.code()));
        // MOVZX r64, r/m8
        self.emit_rex_w(dst, dst);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0xB6);
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), dst.code()));
    }

    // ==================== Stack Operations ====================

    /// PUSH r64
    pub fn push(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0x50 + reg.code());
    }

    /// POP r64
    pub fn pop(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0x58 + reg.code());
    }

    // ==================== Control Flow ====================

    /// JMP rel32 to a label.
    pub fn jmp(&mut self, target: Label) {
        self.buf.emit_u8(0xE9);
        self.buf.emit_label_ref(target);
    }

    /// Jcc rel32 to a label.
    pub fn jcc(&mut self, cond: Cond, target: Label) {
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x80 + cond as u8);
        self.buf.emit_label_ref(target);
    }

    /// CALL QWORD [base + disp]
    pub fn call_m(&mut self, base: Reg, disp: i32) {
        if base.needs_rex_ext() {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0xFF);
        self.emit_mem(2, base, disp);
    }

    pub fn ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(f: impl FnOnce(&mut X86_64Assembler<'_>)) -> Vec<u8> {
        let mut buf = CodeBuffer::new();
        f(&mut X86_64Assembler::new(&mut buf));
        buf.code().to_vec()
    }

    #[test]
    fn test_mov_encodings() {
        assert_eq!(assemble(|a| a.mov_rr(Reg::Rax, Reg::R8)), [0x4C, 0x89, 0xC0]);
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::Rbx, 8)), [0x48, 0x8B, 0x43, 0x08]);
        assert_eq!(assemble(|a| a.mov_mr(Reg::Rax, 8, Reg::R8)), [0x4C, 0x89, 0x40, 0x08]);
        assert_eq!(assemble(|a| a.mov_imm(Reg::Rcx, -1)), [0x48, 0xC7, 0xC1, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(assemble(|a| a.mov_imm(Reg::Rax, 1 << 40)).len(), 10);
    }

    #[test]
    fn test_memory_operand_special_bases() {
        // r13 with no displacement still needs disp8, r12 needs a SIB byte
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::R13, 0)), [0x49, 0x8B, 0x45, 0x00]);
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::R12, 0)), [0x49, 0x8B, 0x04, 0x24]);
        assert_eq!(
            assemble(|a| a.mov_rm(Reg::Rax, Reg::Rbx, 0x200)),
            [0x48, 0x8B, 0x83, 0x00, 0x02, 0x00, 0x00]
        );
    }

    #[test]
    fn test_arithmetic_encodings() {
        assert_eq!(assemble(|a| a.add_ri32(Reg::R12, 1)), [0x49, 0x83, 0xC4, 0x01]);
        assert_eq!(assemble(|a| a.cmp_ri32(Reg::R14, 7)), [0x49, 0x83, 0xFE, 0x07]);
        assert_eq!(assemble(|a| a.imul_rr(Reg::Rax, Reg::Rcx)), [0x48, 0x0F, 0xAF, 0xC1]);
        assert_eq!(assemble(|a| a.idiv(Reg::Rcx)), [0x48, 0xF7, 0xF9]);
        assert_eq!(assemble(|a| a.shl_ri(Reg::Rcx, 4)), [0x48, 0xC1, 0xE1, 0x04]);
        assert_eq!(
            assemble(|a| a.set_bool(Cond::E, Reg::Rax)),
            [0x0F, 0x94, 0xC0, 0x48, 0x0F, 0xB6, 0xC0]
        );
    }

    #[test]
    fn test_control_flow_encodings() {
        assert_eq!(assemble(|a| a.push(Reg::R12)), [0x41, 0x54]);
        assert_eq!(assemble(|a| a.pop(Reg::Rbx)), [0x5B]);
        assert_eq!(assemble(|a| a.call_m(Reg::Rbx, 0x10)), [0xFF, 0x53, 0x10]);
        let jump = assemble(|a| {
            let here = a.new_label();
            a.bind(here);
            a.jcc(Cond::Ne, here);
        });
        assert_eq!(&jump[..2], &[0x0F, 0x85]);
    }
}
