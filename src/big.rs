//! Big-Allocation path.
//!
//! Requests of [`crate::BIG_ALLOC_THRESHOLD`] bytes and more get an
//! anonymous mapping of their own. There is no shared state here, so none of
//! these functions take the Region lock.

use std::ptr::NonNull;

use crate::{
    arena::Arena,
    block::{self, BLOCK_HEADER_SIZE, BlockNode, Kind},
    error::AllocError,
    kernel,
    utils::checked_align,
};

/// Length of the mapping backing a Big allocation of `size` bytes.
#[inline]
fn mapping_len(size: usize) -> Option<usize> {
    size.checked_add(BLOCK_HEADER_SIZE)
        .and_then(|len| checked_align(len, kernel::page_size()))
}

/// The mapping a Big header sits at the start of.
///
/// **SAFETY**: `node` must be a live Big-tier header.
unsafe fn mapping(node: NonNull<BlockNode>) -> Arena {
    let size = unsafe { node.as_ref().data.size };
    // The length was computable when the mapping was created and sizes only shrink.
    let len = mapping_len(size).unwrap_or(usize::MAX);

    Arena::new(node.cast(), len)
}

/// Maps a standalone allocation of `bytes` bytes.
pub(crate) fn allocate(bytes: usize) -> Result<NonNull<u8>, AllocError> {
    let len = mapping_len(bytes).ok_or(AllocError::TooLarge { bytes })?;
    let arena = kernel::request_memory(len)?;

    log::trace!("big allocation of {bytes} bytes mapped at {:p}", arena.base());

    Ok(unsafe { block::write_header(arena.base(), Kind::Big, bytes) })
}

/// Unmaps a Big allocation.
///
/// **SAFETY**: `node` must be a live Big-tier header.
pub(crate) unsafe fn free(node: NonNull<BlockNode>) {
    unsafe {
        let arena = mapping(node);
        log::trace!("big allocation at {:p} unmapped", arena.base());
        kernel::return_memory(arena);
    }
}

/// Shrinks a Big allocation to `size` bytes, giving the trailing pages back.
///
/// **SAFETY**: `node` must be a live Big-tier header and `size` must not
/// exceed its current size.
pub(crate) unsafe fn truncate(mut node: NonNull<BlockNode>, size: usize) {
    unsafe {
        let arena = mapping(node);
        // Never larger than the current mapping.
        let keep = mapping_len(size).unwrap_or(arena.len());

        kernel::trim_memory(arena, keep);
        node.as_mut().data.size = size;
    }
}
