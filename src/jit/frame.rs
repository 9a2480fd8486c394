//! The block of state shared between compiled code and the host.
//!
//! Compiled code keeps the VM registers in native registers while it runs and
//! writes them back on exit. It reaches memory through the data pointers and
//! calls back into the host only to grow a memory or to read input.

use std::ffi::c_void;
use std::mem::offset_of;

use crate::vm::{IntReader, Item, MachineState, RuntimeError};

/// Region codes passed to the grow callback.
pub const REGION_STACK: u64 = 0;
pub const REGION_HEAP: u64 = 1;

/// Grow callback results.
pub const GROW_OK: u64 = 0;
pub const GROW_FAILED: u64 = 1;
pub const GROW_YIELD: u64 = 2;

#[repr(C)]
pub struct JitFrame {
    pub sp: u64,
    pub fp: u64,
    pub cp: u64,
    pub hp: u64,
    pub status: u64,
    pub stack_data: *mut Item,
    pub stack_len: u64,
    pub heap_data: *mut Item,
    pub heap_len: u64,
    /// `r0..r2` across callbacks.
    pub spill: [u64; 3],
    pub yielded: u64,
    pub read_value: u64,
    pub grow: extern "C" fn(*mut JitFrame, u64) -> u64,
    pub read_int: extern "C" fn(*mut JitFrame) -> u64,
    pub host: *mut c_void,
}

// Field offsets used by the code generator.
pub const SP: i32 = offset_of!(JitFrame, sp) as i32;
pub const FP: i32 = offset_of!(JitFrame, fp) as i32;
pub const CP: i32 = offset_of!(JitFrame, cp) as i32;
pub const HP: i32 = offset_of!(JitFrame, hp) as i32;
pub const STATUS: i32 = offset_of!(JitFrame, status) as i32;
pub const STACK_DATA: i32 = offset_of!(JitFrame, stack_data) as i32;
pub const STACK_LEN: i32 = offset_of!(JitFrame, stack_len) as i32;
pub const HEAP_DATA: i32 = offset_of!(JitFrame, heap_data) as i32;
pub const HEAP_LEN: i32 = offset_of!(JitFrame, heap_len) as i32;
pub const SPILL: i32 = offset_of!(JitFrame, spill) as i32;
pub const YIELDED: i32 = offset_of!(JitFrame, yielded) as i32;
pub const READ_VALUE: i32 = offset_of!(JitFrame, read_value) as i32;
pub const GROW: i32 = offset_of!(JitFrame, grow) as i32;
pub const READ_INT: i32 = offset_of!(JitFrame, read_int) as i32;

/// What the callbacks reach through `JitFrame::host`.
pub struct JitHost<'a> {
    pub state: &'a mut MachineState,
    pub io: &'a mut dyn IntReader,
    pub fault: Option<RuntimeError>,
    /// Heap exhaustion goes back to the host so the collector can run.
    pub collecting: bool,
}

impl JitFrame {
    /// Snapshot of `state`, with no host attached yet.
    pub fn new(state: &mut MachineState) -> Self {
        let mut frame = Self {
            sp: state.sp as u64,
            fp: state.fp as u64,
            cp: state.cp as u64,
            hp: state.hp as u64,
            status: state.status.code(),
            stack_data: std::ptr::null_mut(),
            stack_len: 0,
            heap_data: std::ptr::null_mut(),
            heap_len: 0,
            spill: [0; 3],
            yielded: 0,
            read_value: 0,
            grow: grow_bridge,
            read_int: read_bridge,
            host: std::ptr::null_mut(),
        };
        frame.refresh(state);
        frame
    }

    /// Reload the memory views after a growth.
    pub fn refresh(&mut self, state: &mut MachineState) {
        self.stack_data = state.stack.as_mut_ptr();
        self.stack_len = state.stack.size() as u64;
        self.heap_data = state.heap.as_mut_ptr();
        self.heap_len = state.heap.size() as u64;
    }

    /// Write the registers back.
    pub fn store(&self, state: &mut MachineState) {
        state.sp = self.sp as usize;
        state.fp = self.fp as usize;
        state.cp = self.cp as usize;
        state.hp = self.hp as usize;
    }
}

extern "C" fn grow_bridge(frame: *mut JitFrame, region: u64) -> u64 {
    // SAFETY: compiled code passes the frame it was entered with, and the host
    // it points to lives across the whole native call.
    let frame = unsafe { &mut *frame };
    let host = unsafe { &mut *frame.host.cast::<JitHost<'_>>() };
    if region == REGION_HEAP && host.collecting {
        return GROW_YIELD;
    }
    let memory = if region == REGION_HEAP {
        &mut host.state.heap
    } else {
        &mut host.state.stack
    };
    match memory.grow() {
        Ok(()) => {
            frame.refresh(host.state);
            GROW_OK
        }
        Err(err) => {
            host.fault.get_or_insert(err);
            GROW_FAILED
        }
    }
}

extern "C" fn read_bridge(frame: *mut JitFrame) -> u64 {
    // SAFETY: as in `grow_bridge`.
    let frame = unsafe { &mut *frame };
    let host = unsafe { &mut *frame.host.cast::<JitHost<'_>>() };
    match host.io.read_int() {
        Ok(value) => {
            frame.read_value = value as u64;
            0
        }
        Err(err) => {
            host.fault.get_or_insert(err);
            1
        }
    }
}
