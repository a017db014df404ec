//! Size arithmetic shared by the tiers: rounding to a power of two with
//! [`align`] and [`checked_align`], and converting between bytes and
//! [`PAGE_SIZE`] pages.

use crate::PAGE_SIZE;

/// It aligns `to_be_aligned` using `alignment`, which must be a power of two.
///
/// This method is used to round request sizes up to [`crate::ALLOC_ALIGN`] and
/// mapping lengths up to a multiple of the page size.
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is too close to `usize::MAX`.
pub const fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(alignment - 1) {
        Some(sum) => Some(sum & !(alignment - 1)),
        None => None,
    }
}

/// Number of [`PAGE_SIZE`] pages needed to hold `bytes`.
pub const fn bytes_to_pages(bytes: usize) -> usize {
    align(bytes, PAGE_SIZE) / PAGE_SIZE
}

#[inline]
pub const fn pages_to_bytes(pages: usize) -> usize {
    pages * PAGE_SIZE
}
