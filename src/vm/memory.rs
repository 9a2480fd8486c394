use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use super::error::RuntimeError;
use super::memory_manager::MemoryManager;

/// Type tag stored in the first word of every [`Item`].
///
/// The discriminants are part of the native ABI: compiled code compares and
/// stores them as raw `u64` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[repr(u64)]
pub enum Tag {
    #[default]
    Unit = 0,
    Bool = 1,
    Int = 2,
    HeapIndex = 3,
    HeapRef = 4,
    CodeIndex = 5,
    ReturnAddress = 6,
    FramePointer = 7,
    PairHeader = 8,
    InlHeader = 9,
    InrHeader = 10,
    ClosureHeader = 11,
}

impl Tag {
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Tags whose value is an index into the heap.
    pub fn is_pointer(self) -> bool {
        matches!(self, Tag::HeapIndex | Tag::HeapRef)
    }

    /// Tags whose value is the length of the object they start.
    pub fn is_header(self) -> bool {
        matches!(
            self,
            Tag::PairHeader | Tag::InlHeader | Tag::InrHeader | Tag::ClosureHeader
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One tagged memory cell: 16 bytes, tag at offset 0 and value at offset 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Item {
    pub tag: Tag,
    pub value: u64,
}

impl Item {
    pub const SIZE: usize = 16;
    pub const TAG_OFFSET: usize = 0;
    pub const VALUE_OFFSET: usize = 8;

    pub const fn new(tag: Tag, value: u64) -> Self {
        Self { tag, value }
    }

    pub const fn unit() -> Self {
        Self::new(Tag::Unit, 0)
    }

    pub const fn boolean(value: bool) -> Self {
        Self::new(Tag::Bool, value as u64)
    }

    pub const fn int(value: i64) -> Self {
        Self::new(Tag::Int, value as u64)
    }

    pub const fn as_int(self) -> i64 {
        self.value as i64
    }

    pub const fn as_bool(self) -> bool {
        self.value != 0
    }

    pub const fn as_index(self) -> usize {
        self.value as usize
    }
}

/// Shared handle to the manager that decides how a [`Memory`] grows.
pub type SharedMemoryManager = Rc<RefCell<dyn MemoryManager>>;

/// A resizable array of items used for both the stack and the heap.
///
/// Every access runs a size check first. An out of range index asks the
/// manager for more room until it fits or the manager refuses.
pub struct Memory {
    items: Vec<Item>,
    manager: Option<SharedMemoryManager>,
}

impl Memory {
    /// A fixed-size memory without a manager. Growth always fails.
    pub fn new(size: usize) -> Self {
        Self {
            items: vec![Item::default(); size],
            manager: None,
        }
    }

    /// An empty memory that grows through `manager`.
    pub fn with_manager(manager: SharedMemoryManager) -> Self {
        Self {
            items: Vec::new(),
            manager: Some(manager),
        }
    }

    pub fn set_manager(&mut self, manager: SharedMemoryManager) {
        self.manager = Some(manager);
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Grow until `index` is addressable.
    pub fn check_size(&mut self, index: usize) -> Result<(), RuntimeError> {
        while index >= self.size() {
            self.grow()?;
        }
        Ok(())
    }

    /// Ask the manager for one growth step.
    pub fn grow(&mut self) -> Result<(), RuntimeError> {
        let manager = self.manager.clone().ok_or(RuntimeError::GrowthRejected {
            size: self.size(),
        })?;
        let new_size = manager.borrow_mut().grow(self.size())?;
        if new_size <= self.size() {
            return Err(RuntimeError::GrowthRejected { size: self.size() });
        }
        self.resize(new_size);
        Ok(())
    }

    /// Resize in place, keeping the overlapping prefix.
    pub fn resize(&mut self, new_size: usize) {
        self.items.resize(new_size, Item::default());
    }

    /// Copy the overlapping prefix of `other` into this memory.
    pub fn copy_from(&mut self, other: &Memory) {
        let len = self.size().min(other.size());
        self.items[..len].copy_from_slice(&other.items[..len]);
    }

    pub fn get(&mut self, index: usize) -> Result<Item, RuntimeError> {
        self.check_size(index)?;
        Ok(self.items[index])
    }

    pub fn set(&mut self, index: usize, item: Item) -> Result<(), RuntimeError> {
        self.check_size(index)?;
        self.items[index] = item;
        Ok(())
    }

    pub fn check_tag(&mut self, index: usize, tag: Tag) -> Result<(), RuntimeError> {
        self.get_and_check(index, tag).map(|_| ())
    }

    /// Accept either of two tags and return the one found.
    pub fn check_tags(&mut self, index: usize, a: Tag, b: Tag) -> Result<Tag, RuntimeError> {
        let item = self.get(index)?;
        if item.tag == a || item.tag == b {
            Ok(item.tag)
        } else {
            Err(RuntimeError::TagMismatch {
                expected: a,
                found: item.tag,
            })
        }
    }

    pub fn get_and_check(&mut self, index: usize, tag: Tag) -> Result<Item, RuntimeError> {
        let item = self.get(index)?;
        if item.tag != tag {
            return Err(RuntimeError::TagMismatch {
                expected: tag,
                found: item.tag,
            });
        }
        Ok(item)
    }

    /// Read without growing.
    pub fn peek(&self, index: usize) -> Option<Item> {
        self.items.get(index).copied()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [Item] {
        &mut self.items
    }

    /// Swap in a new backing array. The manager is kept.
    pub fn replace_items(&mut self, items: Vec<Item>) -> Vec<Item> {
        std::mem::replace(&mut self.items, items)
    }

    pub fn as_mut_ptr(&mut self) -> *mut Item {
        self.items.as_mut_ptr()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("size", &self.size())
            .field("managed", &self.manager.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::memory_manager::{AmortizedAllocation, NoAllocation};

    fn amortized() -> Memory {
        Memory::with_manager(Rc::new(RefCell::new(AmortizedAllocation)))
    }

    #[test]
    fn test_item_layout() {
        assert_eq!(std::mem::size_of::<Item>(), Item::SIZE);
        assert_eq!(std::mem::offset_of!(Item, tag), Item::TAG_OFFSET);
        assert_eq!(std::mem::offset_of!(Item, value), Item::VALUE_OFFSET);
    }

    #[test]
    fn test_set_then_get() {
        let mut memory = Memory::new(8);
        memory.set(3, Item::int(-42)).unwrap();
        assert_eq!(memory.get(3).unwrap(), Item::int(-42));
        assert_eq!(memory.get(3).unwrap().as_int(), -42);
    }

    #[test]
    fn test_unmanaged_memory_rejects_growth() {
        let mut memory = Memory::new(2);
        assert!(memory.get(1).is_ok());
        assert_eq!(
            memory.get(2),
            Err(RuntimeError::GrowthRejected { size: 2 })
        );
    }

    #[test]
    fn test_amortized_growth_reaches_any_index() {
        let mut memory = amortized();
        memory.set(1000, Item::boolean(true)).unwrap();
        assert!(memory.size() > 1000);
        assert_eq!(memory.get(1000).unwrap(), Item::boolean(true));
        assert_eq!(memory.get(999).unwrap(), Item::unit());
    }

    #[test]
    fn test_growth_preserves_contents() {
        let mut memory = amortized();
        for i in 0..20 {
            memory.set(i, Item::int(i as i64)).unwrap();
        }
        for i in 0..20 {
            assert_eq!(memory.get(i).unwrap().as_int(), i as i64);
        }
    }

    #[test]
    fn test_no_allocation_sizes_once() {
        let mut memory = Memory::with_manager(Rc::new(RefCell::new(NoAllocation::new(4))));
        memory.set(3, Item::int(1)).unwrap();
        assert_eq!(memory.size(), 4);
        assert!(memory.set(4, Item::int(1)).is_err());
    }

    #[test]
    fn test_tag_checks() {
        let mut memory = Memory::new(4);
        memory.set(0, Item::int(7)).unwrap();
        assert_eq!(memory.get_and_check(0, Tag::Int).unwrap().as_int(), 7);
        assert_eq!(
            memory.check_tag(0, Tag::Bool),
            Err(RuntimeError::TagMismatch {
                expected: Tag::Bool,
                found: Tag::Int
            })
        );
        assert_eq!(memory.check_tags(0, Tag::Bool, Tag::Int), Ok(Tag::Int));
    }

    #[test]
    fn test_copy_from_copies_prefix() {
        let mut small = Memory::new(2);
        small.set(0, Item::int(1)).unwrap();
        small.set(1, Item::int(2)).unwrap();
        let mut large = Memory::new(4);
        large.copy_from(&small);
        assert_eq!(large.peek(1), Some(Item::int(2)));
        assert_eq!(large.peek(2), Some(Item::unit()));
        assert_eq!(large.peek(4), None);
    }
}
