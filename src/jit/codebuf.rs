//! Code buffer for building JIT code.
//!
//! Machine code is assembled here, with jumps to labels patched once every
//! label is bound, before the bytes are copied to executable memory.

use super::JitError;
use super::memory::ExecutableMemory;

/// A jump target inside one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// A buffer for building machine code.
pub struct CodeBuffer {
    code: Vec<u8>,
    /// Bound offset of every label created so far.
    labels: Vec<Option<usize>>,
    /// Rel32 slots to patch: (offset of the slot, target).
    fixups: Vec<(usize, Label)>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit value (little-endian).
    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current position.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    /// Emit a rel32 slot jumping to `label`, patched by `patch_labels`.
    pub fn emit_label_ref(&mut self, label: Label) {
        self.fixups.push((self.code.len(), label));
        self.emit_u32(0);
    }

    /// Resolve every pending jump.
    pub fn patch_labels(&mut self) -> Result<(), JitError> {
        for (offset, label) in self.fixups.drain(..) {
            let target = self.labels[label.0].ok_or(JitError::UndefinedLabel(label.0))?;
            // relative to the end of the slot
            let rel = target as i64 - (offset as i64 + 4);
            let rel = i32::try_from(rel).map_err(|_| JitError::OffsetOutOfRange(rel))?;
            self.code[offset..offset + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(())
    }

    /// Patch the jumps and copy the code to executable memory.
    pub fn finalize(mut self) -> Result<ExecutableMemory, JitError> {
        self.patch_labels()?;
        let mut memory = ExecutableMemory::new(self.code.len())?;
        memory.write(0, &self.code)?;
        memory.make_executable()?;
        Ok(memory)
    }

    #[cfg(test)]
    pub fn code(&self) -> &[u8] {
        &self.code
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_bytes() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0x90);
        buf.emit_u32(0xDEADBEEF);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf.code(), &[0x90, 0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_forward_and_backward_refs() {
        let mut buf = CodeBuffer::new();
        let back = buf.new_label();
        let ahead = buf.new_label();
        buf.bind(back);
        buf.emit_u8(0xE9);
        buf.emit_label_ref(ahead);
        buf.emit_u8(0xE9);
        buf.emit_label_ref(back);
        buf.bind(ahead);
        buf.patch_labels().unwrap();

        assert_eq!(buf.len(), 10);
        assert_eq!(&buf.code()[1..5], &5i32.to_le_bytes());
        assert_eq!(&buf.code()[6..10], &(-10i32).to_le_bytes());
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let mut buf = CodeBuffer::new();
        let nowhere = buf.new_label();
        buf.emit_u8(0xE9);
        buf.emit_label_ref(nowhere);
        assert!(matches!(buf.patch_labels(), Err(JitError::UndefinedLabel(0))));
    }
}
