use std::ptr::NonNull;

use crate::PAGE_SIZE;

/// A contiguous range of virtual memory: a base address and a length.
///
/// Regions, Heaps and Big allocations never subtract raw pointers from each
/// other directly. They ask the arena that owns the memory for offsets and
/// page indexes instead, which keeps every computation bounded by `len`.
///
/// ```text
/// base                                   base + len
///  +-------+-------+-------+-------+-------+
///  | page0 | page1 | page2 |  ...  | pageN |
///  +-------+-------+-------+-------+-------+
///  ^ offset 0      ^ offset 2 * PAGE_SIZE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Arena {
    base: NonNull<u8>,
    len: usize,
}

impl Arena {
    #[inline]
    pub const fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Tells whether `ptr` points inside the arena.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr.addr();
        let base = self.base.as_ptr().addr();

        addr >= base && addr - base < self.len
    }

    /// Byte offset of `ptr` from the start of the arena.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        debug_assert!(self.contains(ptr.as_ptr()), "{ptr:p} outside of {self:?}");
        ptr.as_ptr().addr() - self.base.as_ptr().addr()
    }

    /// Pointer `offset` bytes into the arena. `offset == len` is allowed and
    /// yields the one-past-the-end address.
    #[inline]
    pub fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.len, "offset {offset} outside of {self:?}");
        unsafe { self.base.add(offset) }
    }

    /// Index of the page containing `ptr`.
    #[inline]
    pub fn page_of(&self, ptr: NonNull<u8>) -> usize {
        self.offset_of(ptr) / PAGE_SIZE
    }

    /// Address of the first byte of page `index`.
    #[inline]
    pub fn page(&self, index: usize) -> NonNull<u8> {
        self.at(index * PAGE_SIZE)
    }

    /// Splits the arena into `[0, offset)` and `[offset, len)`.
    pub fn split_at(self, offset: usize) -> (Arena, Arena) {
        let tail = self.at(offset);

        (
            Arena::new(self.base, offset),
            Arena::new(tail, self.len - offset),
        )
    }
}
