//! The allocator façade: size based routing between the three tiers and the
//! lock that serializes the Heap and Region tiers.

use std::ptr::{self, NonNull};

use parking_lot::Mutex;

use crate::{
    ALLOC_ALIGN, BIG_ALLOC_THRESHOLD, MIN_HEAP_SIZE, REGION_PAGES, big,
    block::{self, BlockNode, Kind},
    error::AllocError,
    heap::{self, HeapState},
    list::List,
    region::{self, Region, RegionNode, Release},
    stats::AllocatorStats,
    trail::{Event, Trail},
    utils::checked_align,
};

/// Every Region owned by one [`Allocator`], newest first.
struct Regions {
    list: List<Region>,
}

// Regions are only reachable through the allocator's mutex.
unsafe impl Send for Regions {}

impl Regions {
    const fn new() -> Self {
        Self { list: List::new() }
    }

    /// Serves `bytes` (already aligned) from an existing Region, or from a
    /// new one when none can. `direct` selects the Region tier over the Heap tier.
    fn allocate(&mut self, bytes: usize, direct: bool, trail: &mut Trail) -> Result<NonNull<u8>, AllocError> {
        for region in &self.list {
            if let Some(ptr) = unsafe { Self::allocate_in(region, bytes, direct, trail) } {
                return Ok(ptr);
            }
        }

        let region = Region::create(&mut self.list)?;
        trail.record(Event::RegionCreated {
            base: region.as_ptr().addr(),
        });

        match unsafe { Self::allocate_in(region, bytes, direct, trail) } {
            Some(ptr) => Ok(ptr),
            None => {
                // Don't keep a Region nobody uses.
                unsafe { self.release(region, trail) };
                Err(AllocError::TooLarge { bytes })
            }
        }
    }

    /// **SAFETY**: `region` must belong to this list.
    unsafe fn allocate_in(
        region: NonNull<RegionNode>,
        bytes: usize,
        direct: bool,
        trail: &mut Trail,
    ) -> Option<NonNull<u8>> {
        if direct {
            return unsafe { region::allocate(region, bytes, trail) };
        }

        let heaps = unsafe { &region.as_ref().data.heaps };
        for heap in heaps {
            if unsafe { heap.as_ref().data.max_linear } >= bytes {
                if let Some(ptr) = unsafe { heap::allocate(heap, bytes) } {
                    return Some(ptr);
                }
                trail.record(Event::Inconsistent("heap block scan found no fit"));
            }
        }

        unsafe { heap::create(region, bytes, trail) }
    }

    /// Frees a Heap or Region tier block, tearing down whatever becomes empty.
    ///
    /// **SAFETY**: `node` must be a live Heap or Region tier header owned by this list.
    unsafe fn free(&mut self, node: NonNull<BlockNode>, trail: &mut Trail) {
        let (region, release) = match unsafe { node.as_ref().data.kind } {
            Kind::Heap(heap) => match unsafe { heap::free(heap, node) } {
                HeapState::InUse => return,
                HeapState::Empty => {
                    trail.record(Event::HeapDestroyed {
                        base: heap.as_ptr().addr(),
                    });
                    let region = unsafe { heap.as_ref().data.region };
                    (region, unsafe { heap::destroy(heap) })
                }
            },
            Kind::Region(region) => (region, unsafe { region::free(region, node) }),
            Kind::Free(_) | Kind::Big => return,
        };

        if release == Release::Emptied {
            unsafe { self.release(region, trail) };
        }
    }

    /// **SAFETY**: same as [`Regions::free`], `size` must be below the current size.
    unsafe fn truncate(&mut self, node: NonNull<BlockNode>, size: usize) {
        match unsafe { node.as_ref().data.kind } {
            Kind::Heap(heap) => unsafe { heap::truncate(heap, node, size) },
            Kind::Region(region) => unsafe { region::truncate(region, node, size) },
            Kind::Free(_) | Kind::Big => {}
        }
    }

    /// Unlinks and unmaps `region`.
    ///
    /// **SAFETY**: `region` must belong to this list and hold no live allocation.
    unsafe fn release(&mut self, region: NonNull<RegionNode>, trail: &mut Trail) {
        trail.record(Event::RegionReleased {
            base: region.as_ptr().addr(),
        });

        unsafe {
            self.list.remove(region);
            region::destroy(region);
        }
    }

    fn stats(&mut self) -> AllocatorStats {
        let mut stats = AllocatorStats::default();

        for mut region in &self.list {
            stats.add_region(unsafe { &mut region.as_mut().data });
        }

        stats
    }
}

impl Drop for Regions {
    fn drop(&mut self) {
        while let Some(region) = self.list.first() {
            unsafe {
                self.list.remove(region);
                region::destroy(region);
            }
        }
    }
}

/// General purpose allocator with three size based tiers.
///
/// * Requests below [`MIN_HEAP_SIZE`] are carved from Heaps, small
///   sub-arenas with an in-place free list.
/// * Requests below [`BIG_ALLOC_THRESHOLD`] take whole pages straight from a
///   Region, a 128 MiB anonymous mapping.
/// * Anything bigger gets a mapping of its own.
///
/// Heap and Region state sits behind a single mutex. The Big path never
/// takes it.
///
/// ```
/// use tieralloc::Allocator;
///
/// let allocator = Allocator::new();
/// let ptr = allocator.allocate(100).unwrap();
///
/// unsafe {
///     ptr.as_ptr().write_bytes(0xAB, 100);
///     allocator.free(ptr);
/// }
/// ```
///
/// Dropping the allocator unmaps every Region it owns. Big allocations
/// still alive at that point are left mapped.
pub struct Allocator {
    regions: Mutex<Regions>,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    /// Creates an allocator that owns no memory yet.
    pub const fn new() -> Self {
        Self {
            regions: parking_lot::const_mutex(Regions::new()),
        }
    }

    /// Allocates `bytes` bytes aligned to [`ALLOC_ALIGN`], reporting why it
    /// failed when it does.
    pub fn try_allocate(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        let size = checked_align(bytes, ALLOC_ALIGN).ok_or(AllocError::TooLarge { bytes })?;

        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        if bytes >= BIG_ALLOC_THRESHOLD {
            return big::allocate(size);
        }

        // Routing looks at the requested size, the tier then serves the aligned one.
        let direct = bytes >= MIN_HEAP_SIZE;
        if direct && region::pages_of(size) > REGION_PAGES {
            return Err(AllocError::TooLarge { bytes });
        }

        let mut trail = Trail::default();
        let result = self.regions.lock().allocate(size, direct, &mut trail);
        trail.emit();

        result
    }

    /// Allocates `bytes` bytes aligned to [`ALLOC_ALIGN`].
    ///
    /// Returns `None` for zero sized requests and when memory is exhausted.
    pub fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        match self.try_allocate(bytes) {
            Ok(ptr) => Some(ptr),
            Err(AllocError::ZeroSize) => None,
            Err(err) => {
                log::warn!("allocate({bytes}) failed: {err}");
                None
            }
        }
    }

    /// Allocates `count * size` zeroed bytes.
    ///
    /// The product is not checked for overflow: it wraps, and the smaller
    /// wrapped size is what gets allocated.
    pub fn zero_allocate(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let bytes = count.wrapping_mul(size);
        let ptr = self.allocate(bytes)?;

        // Big allocations are fresh anonymous mappings, already zeroed.
        if bytes < BIG_ALLOC_THRESHOLD {
            unsafe { ptr.as_ptr().write_bytes(0, bytes) };
        }

        Some(ptr)
    }

    /// Resizes an allocation.
    ///
    /// * `None` behaves as [`Allocator::allocate`].
    /// * A `size` that aligns to zero frees `ptr` and returns `None`.
    /// * Shrinking happens in place and returns `ptr`.
    /// * Growing always moves: a new block is allocated, the old content
    ///   copied over and `ptr` freed. On failure `ptr` is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not freed yet.
    pub unsafe fn reallocate(&self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        let new_size = match checked_align(size, ALLOC_ALIGN) {
            Some(0) => {
                unsafe { self.free(ptr) };
                return None;
            }
            Some(new_size) => new_size,
            None => return None,
        };

        let node = unsafe { block::header(ptr) };
        let (kind, old_size) = unsafe { (node.as_ref().data.kind, node.as_ref().data.size) };

        if new_size == old_size {
            return Some(ptr);
        }

        if new_size < old_size {
            match kind {
                Kind::Big => unsafe { big::truncate(node, new_size) },
                _ => unsafe { self.regions.lock().truncate(node, new_size) },
            }
            return Some(ptr);
        }

        let new = self.allocate(size)?;
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), old_size.min(new_size));
            self.free(ptr);
        }

        Some(new)
    }

    /// Gives an allocation back.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not freed yet.
    /// The header in front of it is trusted as is.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        let node = unsafe { block::header(ptr) };

        match unsafe { node.as_ref().data.kind } {
            Kind::Big => unsafe { big::free(node) },
            Kind::Free(_) => log::warn!("free({ptr:p}): block is already free"),
            Kind::Heap(_) | Kind::Region(_) => {
                let mut trail = Trail::default();
                unsafe { self.regions.lock().free(node, &mut trail) };
                trail.emit();
            }
        }
    }

    /// Payload bytes available at `ptr`, which can exceed the requested size.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not freed yet.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { block::header(ptr).as_ref().data.size }
    }

    /// Summary of the Region and Heap tiers.
    pub fn stats(&self) -> AllocatorStats {
        self.regions.lock().stats()
    }
}
