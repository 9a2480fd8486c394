//! Executable memory management using mmap.
//!
//! Memory is mapped writable, filled, then flipped to read+execute. It is
//! never writable and executable at the same time.

use std::ptr::NonNull;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecMemoryError {
    #[error("memory allocation failed")]
    AllocationFailed,
    #[error("memory protection change failed")]
    ProtectionFailed,
    #[error("invalid memory size")]
    InvalidSize,
}

/// A block of memory allocated via mmap, later made executable.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Allocate at least `size` writable bytes, rounded up to whole pages.
    pub fn new(size: usize) -> Result<Self, ExecMemoryError> {
        if size == 0 {
            return Err(ExecMemoryError::InvalidSize);
        }
        let page_size = page_size();
        let aligned_size = size
            .checked_add(page_size - 1)
            .ok_or(ExecMemoryError::InvalidSize)?
            & !(page_size - 1);
        let ptr = mmap_alloc(aligned_size)?;
        Ok(Self {
            ptr,
            size: aligned_size,
            executable: false,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Copy `data` to `offset`. Fails once the memory is executable.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), ExecMemoryError> {
        if self.executable {
            return Err(ExecMemoryError::ProtectionFailed);
        }
        match offset.checked_add(data.len()) {
            Some(end) if end <= self.size => {}
            _ => return Err(ExecMemoryError::InvalidSize),
        }
        // SAFETY: the range was checked against the mapping above.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Make the memory executable (and read-only).
    pub fn make_executable(&mut self) -> Result<(), ExecMemoryError> {
        if !self.executable {
            protect_exec(self.ptr, self.size)?;
            self.executable = true;
        }
        Ok(())
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unmap(self.ptr, self.size);
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

#[cfg(unix)]
fn mmap_alloc(size: usize) -> Result<NonNull<u8>, ExecMemoryError> {
    // SAFETY: an anonymous private mapping touches no existing memory.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(ExecMemoryError::AllocationFailed);
    }
    NonNull::new(ptr.cast::<u8>()).ok_or(ExecMemoryError::AllocationFailed)
}

#[cfg(unix)]
fn protect_exec(ptr: NonNull<u8>, size: usize) -> Result<(), ExecMemoryError> {
    // SAFETY: `ptr..ptr + size` is a mapping created by `mmap_alloc`.
    let result = unsafe { libc::mprotect(ptr.as_ptr().cast(), size, libc::PROT_READ | libc::PROT_EXEC) };
    if result != 0 {
        return Err(ExecMemoryError::ProtectionFailed);
    }
    Ok(())
}

#[cfg(unix)]
fn unmap(ptr: NonNull<u8>, size: usize) {
    // SAFETY: the mapping is owned by the dropped value and unused afterwards.
    unsafe {
        libc::munmap(ptr.as_ptr().cast(), size);
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

#[cfg(not(unix))]
fn mmap_alloc(_size: usize) -> Result<NonNull<u8>, ExecMemoryError> {
    Err(ExecMemoryError::AllocationFailed)
}

#[cfg(not(unix))]
fn protect_exec(_ptr: NonNull<u8>, _size: usize) -> Result<(), ExecMemoryError> {
    Err(ExecMemoryError::ProtectionFailed)
}

#[cfg(not(unix))]
fn unmap(_ptr: NonNull<u8>, _size: usize) {}
