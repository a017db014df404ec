use std::{mem, ptr::NonNull, slice};

use crate::{
    PAGE_SIZE, REGION_PAGES,
    arena::Arena,
    block::{self, BLOCK_HEADER_SIZE, BlockNode, Kind},
    error::MapError,
    heap::Heap,
    kernel,
    list::{List, Node},
    page_map::PageRuns,
    trail::{Event, Trail},
    utils::{bytes_to_pages, pages_to_bytes},
};

/// Pages needed by the Page-Run Table, one `u32` per user page.
pub(crate) const MAP_PAGES: usize = bytes_to_pages(REGION_PAGES * mem::size_of::<u32>());

/// Pages of one Region mapping: header page, table pages and user pages.
pub(crate) const MMAP_PAGES: usize = 1 + MAP_PAGES + REGION_PAGES;

/// A Region is a single large anonymous mapping.
///
/// ```text
/// +--------+--------------------+-------------------------------------+
/// | Region |   Page-Run Table   |            user pages               |
/// | (page) | (MAP_PAGES pages)  |         (REGION_PAGES pages)        |
/// +--------+--------------------+-------------------------------------+
///                                 ^ Heaps and Region-tier allocations
/// ```
///
/// User pages are handed out in runs, either to a [`Heap`] or directly to a
/// single Region-tier allocation. As every other header, this is
/// represented as a [`Node<Region>`] written at the very start of the mapping.
pub(crate) struct Region {
    /// The whole mapping, header included.
    mapping: Arena,
    /// The user pages.
    pages: Arena,
    /// First entry of the Page-Run Table.
    map: NonNull<u32>,
    /// Heaps carved from this Region.
    pub heaps: List<Heap>,
    /// Largest free run of user pages.
    pub max_linear: usize,
}

pub(crate) type RegionNode = Node<Region>;

const _: () = assert!(mem::size_of::<RegionNode>() <= PAGE_SIZE);

/// Outcome of giving pages back to a Region.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    Retained,
    /// Every user page is free again, the Region should be unmapped.
    Emptied,
}

impl Region {
    /// Maps a new Region and links it at the head of `regions`.
    pub fn create(regions: &mut List<Region>) -> Result<NonNull<RegionNode>, MapError> {
        let mapping = kernel::request_memory(pages_to_bytes(MMAP_PAGES))?;
        let (header, pages) = mapping.split_at(pages_to_bytes(1 + MAP_PAGES));

        let region = Region {
            mapping,
            pages,
            map: header.page(1).cast(),
            heaps: List::new(),
            max_linear: REGION_PAGES,
        };

        unsafe {
            let mut node = regions.push_front(region, mapping.base());
            node.as_mut().data.runs().reset();

            Ok(node)
        }
    }

    #[inline]
    pub fn mapping(&self) -> Arena {
        self.mapping
    }

    /// The Page-Run Table of this Region.
    pub fn runs(&mut self) -> PageRuns<'_> {
        // The table lives in its own pages of the mapping, disjoint from `self`.
        let map = unsafe { slice::from_raw_parts_mut(self.map.as_ptr(), REGION_PAGES) };
        PageRuns::new(map)
    }

    /// Takes `pages` contiguous user pages, first fit.
    pub fn allocate_pages(&mut self, pages: usize, trail: &mut Trail) -> Option<NonNull<u8>> {
        if self.max_linear < pages {
            return None;
        }

        let mut max_linear = self.max_linear;
        let start = self.runs().take(pages, &mut max_linear);
        self.max_linear = max_linear;

        match start {
            Some(start) => Some(self.pages.page(start)),
            None => {
                trail.record(Event::Inconsistent("region page scan found no fit"));
                None
            }
        }
    }

    /// Gives back the run of `pages` pages starting at `addr`.
    pub fn free_pages(&mut self, addr: NonNull<u8>, pages: usize) -> Release {
        let start = self.pages.page_of(addr);
        let run = self.runs().release(start, pages);

        if run.pages > self.max_linear {
            if run.pages == REGION_PAGES {
                return Release::Emptied;
            }
            self.max_linear = run.pages;
        }

        Release::Retained
    }

    /// Shrinks the used run at `addr` from `old_pages` to `new_pages`.
    pub fn shrink_pages(&mut self, addr: NonNull<u8>, old_pages: usize, new_pages: usize) {
        let start = self.pages.page_of(addr);
        let run = self.runs().shrink(start, old_pages, new_pages);

        // The run being shrunk is still in use, the Region can't be empty here.
        if run.pages > self.max_linear {
            self.max_linear = run.pages;
        }
    }

    /// Every run of the Region, in address order.
    #[cfg(test)]
    pub fn page_runs(&mut self) -> Vec<crate::page_map::Run> {
        self.runs().runs().collect()
    }
}

/// Pages backing a Region-tier allocation of `size` payload bytes.
#[inline]
pub(crate) const fn pages_of(size: usize) -> usize {
    bytes_to_pages(BLOCK_HEADER_SIZE + size)
}

/// Serves `bytes` straight from the pages of `region`.
///
/// **SAFETY**: `region` must be a live Region and the caller must hold the lock.
pub(crate) unsafe fn allocate(
    mut region: NonNull<RegionNode>,
    bytes: usize,
    trail: &mut Trail,
) -> Option<NonNull<u8>> {
    let addr = unsafe { region.as_mut() }.data.allocate_pages(pages_of(bytes), trail)?;

    Some(unsafe { block::write_header(addr, Kind::Region(region), bytes) })
}

/// **SAFETY**: `node` must be a live Region-tier header owned by `region`.
pub(crate) unsafe fn free(mut region: NonNull<RegionNode>, node: NonNull<BlockNode>) -> Release {
    unsafe {
        let size = node.as_ref().data.size;
        region.as_mut().data.free_pages(node.cast(), pages_of(size))
    }
}

/// Shrinks a Region-tier allocation in place, giving trailing pages back.
///
/// **SAFETY**: same as [`free`], `size` must be smaller than the current size.
pub(crate) unsafe fn truncate(mut region: NonNull<RegionNode>, mut node: NonNull<BlockNode>, size: usize) {
    unsafe {
        let old_pages = pages_of(node.as_ref().data.size);
        let new_pages = pages_of(size);

        if new_pages < old_pages {
            region.as_mut().data.shrink_pages(node.cast(), old_pages, new_pages);
        }
        node.as_mut().data.size = size;
    }
}

/// Unmaps `region`. It must already be unlinked from the Region list.
///
/// **SAFETY**: nothing may reference the Region afterwards.
pub(crate) unsafe fn destroy(region: NonNull<RegionNode>) {
    unsafe {
        let mapping = region.as_ref().data.mapping();
        kernel::return_memory(mapping);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MIN_HEAP_SIZE, page_map::Run};

    struct Fixture {
        regions: List<Region>,
        region: NonNull<RegionNode>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut regions = List::new();
            let region = Region::create(&mut regions).unwrap();
            Self { regions, region }
        }

        fn region(&mut self) -> &mut Region {
            unsafe { &mut self.region.as_mut().data }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            unsafe {
                self.regions.remove(self.region);
                destroy(self.region);
            }
        }
    }

    #[test]
    fn fresh_region_is_one_free_run() {
        let mut fixture = Fixture::new();
        let node = fixture.region.cast::<u8>();
        let region = fixture.region();

        assert_eq!(region.max_linear, REGION_PAGES);
        assert_eq!(
            region.page_runs(),
            vec![Run { start: 0, pages: REGION_PAGES, free: true }]
        );
        assert_eq!(region.mapping().len(), MMAP_PAGES * PAGE_SIZE);
        assert_eq!(region.mapping().base(), node);
    }

    #[test]
    fn region_allocation_is_page_aligned_and_writable() {
        let mut fixture = Fixture::new();
        let mut trail = Trail::default();

        unsafe {
            let ptr = allocate(fixture.region, MIN_HEAP_SIZE, &mut trail).unwrap();
            let node = block::header(ptr);

            assert_eq!(node.cast::<u8>().as_ptr().addr() % PAGE_SIZE, 0);
            assert_eq!(node.as_ref().data.kind, Kind::Region(fixture.region));

            ptr.as_ptr().write_bytes(0x5A, MIN_HEAP_SIZE);
            assert_eq!(*ptr.as_ptr().add(MIN_HEAP_SIZE - 1), 0x5A);

            let used = pages_of(MIN_HEAP_SIZE);
            assert_eq!(fixture.region().max_linear, REGION_PAGES - used);

            // Freeing the only allocation empties the Region.
            assert_eq!(free(fixture.region, node), Release::Emptied);
        }
        assert_eq!(trail.events().count(), 0);
    }

    #[test]
    fn truncate_returns_trailing_pages() {
        let mut fixture = Fixture::new();
        let mut trail = Trail::default();

        unsafe {
            let keep = allocate(fixture.region, 64 * PAGE_SIZE, &mut trail).unwrap();
            let ptr = allocate(fixture.region, 64 * PAGE_SIZE, &mut trail).unwrap();
            let node = block::header(ptr);
            let before = fixture.region().max_linear;

            truncate(fixture.region, node, PAGE_SIZE);
            assert_eq!(node.as_ref().data.size, PAGE_SIZE);

            let runs = fixture.region().page_runs();
            let start = fixture.region().pages.page_of(node.cast());
            let used = runs.iter().find(|run| run.start == start).unwrap();
            assert_eq!(used.pages, pages_of(PAGE_SIZE));
            assert!(!used.free);
            // The released tail is now a free run right after the kept pages.
            assert!(runs.iter().any(|run| run.free && run.start == start + used.pages));
            assert_eq!(fixture.region().max_linear, before);

            assert_eq!(free(fixture.region, node), Release::Retained);
            assert_eq!(free(fixture.region, block::header(keep)), Release::Emptied);
        }
    }

    #[test]
    fn oversized_request_is_rejected_by_max_linear() {
        let mut fixture = Fixture::new();
        let mut trail = Trail::default();

        assert!(fixture.region().allocate_pages(REGION_PAGES + 1, &mut trail).is_none());
        assert_eq!(trail.events().count(), 0);
    }
}
