use std::{mem, ptr::NonNull};

use crate::{ALLOC_ALIGN, heap::HeapNode, list::Node, region::RegionNode};

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Block` as a node of a linked list.
pub const BLOCK_HEADER_SIZE: usize = mem::size_of::<Node<Block>>();

const _: () = assert!(BLOCK_HEADER_SIZE % ALLOC_ALIGN == 0);

/// Which tier produced an allocation, and who owns it.
///
/// The owner is carried by the variant itself, so nothing can look at a
/// Heap pointer without first having matched a Heap kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    /// Unused space inside a Heap.
    Free(NonNull<HeapNode>),
    /// Small allocation carved from a Heap.
    Heap(NonNull<HeapNode>),
    /// Page-granular allocation taken directly from a Region.
    Region(NonNull<RegionNode>),
    /// Standalone mapping.
    Big,
}

impl Kind {
    #[inline]
    pub fn is_free(&self) -> bool {
        matches!(self, Kind::Free(_))
    }
}

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// The following diagram represents the whole header, [`Node`] links included:
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |        prev         |        |
/// +---------------------+        | -> Header (BLOCK_HEADER_SIZE)
/// |   kind (+ owner)    |        |
/// +---------------------+        |
/// |        size         |        |
/// +---------------------+ <------+ 32 byte aligned
/// |       Content       |        |
/// |         ...         |        | -> Addressable content (size bytes)
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// Links are only used by Heap blocks; Region and Big headers leave them empty.
#[repr(C, align(32))]
#[derive(Debug)]
pub(crate) struct Block {
    pub kind: Kind,
    /// Payload size in bytes.
    pub size: usize,
}

pub(crate) type BlockNode = Node<Block>;

/// Writes a standalone (unlinked) header at `addr` and returns its payload.
///
/// **SAFETY**: `addr` must be 32 byte aligned and valid for
/// `BLOCK_HEADER_SIZE + size` bytes.
pub(crate) unsafe fn write_header(addr: NonNull<u8>, kind: Kind, size: usize) -> NonNull<u8> {
    let node = addr.cast::<BlockNode>();

    unsafe {
        node.as_ptr().write(Node {
            next: None,
            prev: None,
            data: Block { kind, size },
        });
    }

    payload(node)
}

/// Address of the content following `node`.
#[inline]
pub(crate) fn payload(node: NonNull<BlockNode>) -> NonNull<u8> {
    unsafe { node.add(1).cast() }
}

/// Walks back from a payload pointer to its header.
///
/// **SAFETY**: `ptr` must have been returned by this allocator and still be live.
#[inline]
pub(crate) unsafe fn header(ptr: NonNull<u8>) -> NonNull<BlockNode> {
    unsafe { ptr.sub(BLOCK_HEADER_SIZE).cast() }
}
