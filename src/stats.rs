use crate::{heap::Heap, region::Region};

/// Point-in-time summary of the Region and Heap tiers of an
/// [`crate::Allocator`]. Big allocations are independent mappings and are
/// not tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Live Regions.
    pub regions: usize,
    /// Bytes mapped for Regions, headers and page tables included.
    pub mapped_bytes: usize,
    /// Free user pages over all Regions.
    pub free_pages: usize,
    /// Longest free page run in any Region.
    pub largest_free_run: usize,
    /// Live Heaps.
    pub heaps: usize,
    /// Blocks over all Heaps, free or not.
    pub heap_blocks: usize,
    /// Free blocks over all Heaps.
    pub free_blocks: usize,
    /// Payload bytes of every free Heap block.
    pub free_heap_bytes: usize,
    /// Largest free Heap block.
    pub largest_free_block: usize,
}

impl AllocatorStats {
    pub(crate) fn add_region(&mut self, region: &mut Region) {
        self.regions += 1;
        self.mapped_bytes += region.mapping().len();

        for run in region.runs().runs().filter(|run| run.free) {
            self.free_pages += run.pages;
            self.largest_free_run = self.largest_free_run.max(run.pages);
        }

        for heap in &region.heaps {
            self.add_heap(unsafe { &heap.as_ref().data });
        }
    }

    fn add_heap(&mut self, heap: &Heap) {
        self.heaps += 1;

        for node in &heap.blocks {
            let block = unsafe { &node.as_ref().data };

            self.heap_blocks += 1;
            if block.kind.is_free() {
                self.free_blocks += 1;
                self.free_heap_bytes += block.size;
                self.largest_free_block = self.largest_free_block.max(block.size);
            }
        }
    }
}
