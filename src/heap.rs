use std::{mem, ptr::NonNull};

use crate::{
    ALLOC_ALIGN, MIN_HEAP_SIZE, MIN_HEAP_WASTE,
    block::{self, BLOCK_HEADER_SIZE, Block, BlockNode, Kind},
    list::{Link, List, Node},
    region::{Release, RegionNode},
    trail::{Event, Trail},
    utils::{align, bytes_to_pages, pages_to_bytes},
};

/// Bytes taken by the [`Heap`] header in front of its first block.
pub(crate) const HEAP_HEADER_SIZE: usize = align(mem::size_of::<HeapNode>(), ALLOC_ALIGN);

/// Fixed cost of a fresh Heap: its own header plus the two block headers
/// it starts with (the first allocation and the free remainder).
pub const HEAP_OVERHEAD: usize = HEAP_HEADER_SIZE + 2 * BLOCK_HEADER_SIZE;

/// Pages carved from a Region for every Heap.
pub(crate) const HEAP_PAGES: usize = bytes_to_pages(MIN_HEAP_SIZE + HEAP_OVERHEAD);

/// A Heap is a sub-arena of a [`crate::region::Region`] that serves small
/// requests. Its pages hold the header followed by a list of blocks that
/// exactly tile the rest of the space:
///
/// ```text
/// +------+-------+---------+-------+---------+-------+-----------------+
/// | Heap | Block | payload | Block | payload | Block |  free payload   |
/// +------+-------+---------+-------+---------+-------+-----------------+
///         \_____ used ____/ \_____ used ____/ \_________ free ________/
/// ```
///
/// Allocating splits a free block in two, freeing merges a block with its
/// free neighbours. A block list never holds two adjacent free blocks.
pub(crate) struct Heap {
    /// Pages backing this Heap.
    pub pages: usize,
    /// Size of the largest free block.
    pub max_linear: usize,
    /// Region the pages come from.
    pub region: NonNull<RegionNode>,
    /// Blocks in address order.
    pub blocks: List<Block>,
}

pub(crate) type HeapNode = Node<Heap>;

/// What is left in a Heap after a free.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeapState {
    InUse,
    /// The freed block was the last one, the Heap should be destroyed.
    Empty,
}

impl Heap {
    /// Tries to merge the given block `node` with the next one on the
    /// list. This can be performed if that next block is free.
    unsafe fn merge_with_next(&mut self, mut node: NonNull<BlockNode>) {
        unsafe {
            if let Some(next) = node.as_ref().next {
                if next.as_ref().data.kind.is_free() {
                    // We need to cover the header and the actual content of the block
                    node.as_mut().data.size += BLOCK_HEADER_SIZE + next.as_ref().data.size;
                    self.blocks.remove(next);
                }
            }
        }
    }

    /// Tries to merge the given block `node` into the previous one on the
    /// list. On success `node` points to the previous block afterwards.
    unsafe fn merge_with_prev(&mut self, node: &mut NonNull<BlockNode>) {
        unsafe {
            if let Some(mut prev) = node.as_ref().prev {
                if prev.as_ref().data.kind.is_free() {
                    prev.as_mut().data.size += BLOCK_HEADER_SIZE + node.as_ref().data.size;
                    self.blocks.remove(*node);

                    // The current block is now its previous one
                    *node = prev;
                }
            }
        }
    }

    /// Raises `max_linear` if a free block of `size` bytes beats it.
    #[inline]
    fn offer(&mut self, size: usize) {
        if size > self.max_linear {
            self.max_linear = size;
        }
    }
}

/// Largest free block from `current` to the end of the list, never smaller than `seed`.
fn largest_free(mut current: Link<BlockNode>, seed: usize) -> usize {
    let mut largest = seed;

    while let Some(node) = current {
        let block = unsafe { &node.as_ref().data };
        if block.kind.is_free() && block.size > largest {
            largest = block.size;
        }
        current = unsafe { node.as_ref().next };
    }

    largest
}

/// Carves a new Heap out of `region`, links it at the head of the Region's
/// Heap list and serves the first `bytes` from it.
///
/// **SAFETY**: `region` must be live, the caller must hold the lock and
/// `bytes` must be a multiple of [`ALLOC_ALIGN`] below [`MIN_HEAP_SIZE`] + 1.
pub(crate) unsafe fn create(
    mut region: NonNull<RegionNode>,
    bytes: usize,
    trail: &mut Trail,
) -> Option<NonNull<u8>> {
    let region_ref = unsafe { &mut region.as_mut().data };
    let addr = region_ref.allocate_pages(HEAP_PAGES, trail)?;

    // One free block spanning everything after the Heap header.
    let capacity = pages_to_bytes(HEAP_PAGES) - HEAP_HEADER_SIZE - BLOCK_HEADER_SIZE;

    let heap = Heap {
        pages: HEAP_PAGES,
        max_linear: capacity,
        region,
        blocks: List::new(),
    };

    unsafe {
        let mut heap = region_ref.heaps.push_front(heap, addr);
        let first = addr.add(HEAP_HEADER_SIZE);

        heap.as_mut().data.blocks.push_front(
            Block {
                kind: Kind::Free(heap),
                size: capacity,
            },
            first,
        );

        trail.record(Event::HeapCreated {
            base: addr.as_ptr().addr(),
            pages: HEAP_PAGES,
        });

        allocate(heap, bytes)
    }
}

/// First fit search of the block list for `bytes` bytes.
///
/// The matched free block keeps its position. When what remains after
/// `bytes` is big enough to hold a header and [`MIN_HEAP_WASTE`] bytes, it is
/// split off as a new free block right behind the allocation.
///
/// **SAFETY**: `heap` must be live and the caller must hold the lock.
pub(crate) unsafe fn allocate(mut heap: NonNull<HeapNode>, bytes: usize) -> Option<NonNull<u8>> {
    let heap_ref = unsafe { &mut heap.as_mut().data };
    // Largest free block seen before the match.
    let mut seen = 0;
    let mut current = heap_ref.blocks.first();

    while let Some(mut node) = current {
        let (kind, size) = unsafe { (node.as_ref().data.kind, node.as_ref().data.size) };

        if kind.is_free() {
            if size >= bytes {
                let rescan = heap_ref.max_linear == size;

                unsafe {
                    if size - bytes >= BLOCK_HEADER_SIZE + MIN_HEAP_WASTE {
                        let rest = Block {
                            kind: Kind::Free(heap),
                            size: size - bytes - BLOCK_HEADER_SIZE,
                        };
                        let addr = block::payload(node).add(bytes);

                        node.as_mut().data.size = bytes;
                        heap_ref.blocks.insert_after(node, rest, addr);
                    }
                    node.as_mut().data.kind = Kind::Heap(heap);

                    if rescan {
                        heap_ref.max_linear = largest_free(node.as_ref().next, seen);
                    }
                }

                return Some(block::payload(node));
            }
            seen = seen.max(size);
        }

        current = unsafe { node.as_ref().next };
    }

    // Every free block was visited, `seen` is exact.
    heap_ref.max_linear = seen;

    None
}

/// Frees a Heap block, merging it with free neighbours.
///
/// **SAFETY**: `node` must be a live Heap-tier header owned by `heap` and
/// the caller must hold the lock.
pub(crate) unsafe fn free(mut heap: NonNull<HeapNode>, mut node: NonNull<BlockNode>) -> HeapState {
    let heap_ref = unsafe { &mut heap.as_mut().data };

    unsafe {
        heap_ref.merge_with_next(node);
        heap_ref.merge_with_prev(&mut node);
    }

    if heap_ref.blocks.len() == 1 {
        return HeapState::Empty;
    }

    unsafe {
        node.as_mut().data.kind = Kind::Free(heap);
        heap_ref.offer(node.as_ref().data.size);
    }

    HeapState::InUse
}

/// Shrinks a Heap block to `size` bytes, turning the tail into a free block
/// when it is worth a header.
///
/// **SAFETY**: same as [`free`], `size` must not exceed the current size.
pub(crate) unsafe fn truncate(mut heap: NonNull<HeapNode>, mut node: NonNull<BlockNode>, size: usize) {
    let heap_ref = unsafe { &mut heap.as_mut().data };
    let old = unsafe { node.as_ref().data.size };

    if old - size < BLOCK_HEADER_SIZE + MIN_HEAP_WASTE {
        return;
    }

    let mut rest = old - size - BLOCK_HEADER_SIZE;

    unsafe {
        // Absorb a free block that directly follows.
        if let Some(next) = node.as_ref().next {
            if next.as_ref().data.kind.is_free() {
                rest += BLOCK_HEADER_SIZE + next.as_ref().data.size;
                heap_ref.blocks.remove(next);
            }
        }

        let addr = block::payload(node).add(size);
        node.as_mut().data.size = size;
        heap_ref.blocks.insert_after(
            node,
            Block {
                kind: Kind::Free(heap),
                size: rest,
            },
            addr,
        );
    }

    heap_ref.offer(rest);
}

/// Unlinks an empty Heap from its Region and gives its pages back.
///
/// **SAFETY**: `heap` must be live, hold a single block and the caller must hold the lock.
pub(crate) unsafe fn destroy(heap: NonNull<HeapNode>) -> Release {
    unsafe {
        let pages = heap.as_ref().data.pages;
        let mut region = heap.as_ref().data.region;
        let region_ref = &mut region.as_mut().data;

        region_ref.heaps.remove(heap);
        region_ref.free_pages(heap.cast(), pages)
    }
}
