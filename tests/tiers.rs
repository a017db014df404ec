//! Integration tests of the public allocator API: routing between the tiers,
//! reuse of freed space and the resizing rules.

use std::ptr::NonNull;

use tieralloc::{
    ALLOC_ALIGN, AllocError, Allocator, AllocatorStats, BIG_ALLOC_THRESHOLD, BLOCK_HEADER_SIZE,
    MIN_HEAP_SIZE, PAGE_SIZE,
};

fn fill(ptr: NonNull<u8>, len: usize, byte: u8) {
    unsafe { ptr.as_ptr().write_bytes(byte, len) };
}

fn all_equal(ptr: NonNull<u8>, len: usize, byte: u8) -> bool {
    unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
        .iter()
        .all(|b| *b == byte)
}

#[test]
fn test_largest_heap_request_uses_a_heap() {
    let allocator = Allocator::new();
    let ptr = allocator.allocate(MIN_HEAP_SIZE - 1).unwrap();

    let stats = allocator.stats();
    assert_eq!(stats.regions, 1);
    assert_eq!(stats.heaps, 1);
    unsafe {
        assert_eq!(allocator.usable_size(ptr), MIN_HEAP_SIZE);
        allocator.free(ptr);
    }
    assert_eq!(allocator.stats(), AllocatorStats::default());
}

#[test]
fn test_smallest_region_request_skips_heaps() {
    let allocator = Allocator::new();
    let ptr = allocator.allocate(MIN_HEAP_SIZE).unwrap();

    let stats = allocator.stats();
    assert_eq!(stats.regions, 1);
    assert_eq!(stats.heaps, 0);
    // Payload right behind a page aligned header.
    assert_eq!(ptr.as_ptr().addr() % PAGE_SIZE, BLOCK_HEADER_SIZE);

    unsafe { allocator.free(ptr) };
    assert_eq!(allocator.stats().regions, 0);
}

#[test]
fn test_big_request_leaves_regions_alone() {
    let allocator = Allocator::new();
    let ptr = allocator.allocate(BIG_ALLOC_THRESHOLD).unwrap();

    assert_eq!(allocator.stats().regions, 0);

    unsafe {
        assert_eq!(allocator.usable_size(ptr), BIG_ALLOC_THRESHOLD);
        *ptr.as_ptr() = 1;
        *ptr.as_ptr().add(BIG_ALLOC_THRESHOLD - 1) = 2;
        allocator.free(ptr);
    }
}

#[test]
fn test_pointers_are_aligned_and_disjoint() {
    let allocator = Allocator::new();
    let sizes = [1, 31, 32, 33, 100, 4000, 70_000, MIN_HEAP_SIZE, 300_000];

    let ptrs: Vec<_> = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let ptr = allocator.allocate(size).unwrap();
            assert_eq!(ptr.as_ptr().addr() % ALLOC_ALIGN, 0);
            fill(ptr, size, i as u8);
            (ptr, size, i as u8)
        })
        .collect();

    for &(ptr, size, byte) in &ptrs {
        assert!(all_equal(ptr, size, byte));
    }

    for (ptr, _, _) in ptrs {
        unsafe { allocator.free(ptr) };
    }
    assert_eq!(allocator.stats().regions, 0);
}

#[test]
fn test_freed_block_is_reused() {
    let allocator = Allocator::new();

    let a = allocator.allocate(96).unwrap();
    let b = allocator.allocate(96).unwrap();
    let c = allocator.allocate(96).unwrap();

    unsafe { allocator.free(b) };
    let d = allocator.allocate(96).unwrap();
    assert_eq!(d, b);

    unsafe {
        allocator.free(a);
        allocator.free(c);
        allocator.free(d);
    }
}

#[test]
fn test_neighbours_coalesce() {
    let allocator = Allocator::new();
    let size = 1024;

    let a = allocator.allocate(size).unwrap();
    let b = allocator.allocate(size).unwrap();
    let c = allocator.allocate(size).unwrap();
    // Keeps the Heap alive once A, B and C are gone.
    let guard = allocator.allocate(32).unwrap();

    unsafe {
        allocator.free(a);
        allocator.free(c);
        allocator.free(b);
    }

    let merged = allocator.allocate(3 * size + 2 * BLOCK_HEADER_SIZE).unwrap();
    assert_eq!(merged, a);

    unsafe {
        allocator.free(merged);
        allocator.free(guard);
    }
    assert_eq!(allocator.stats().regions, 0);
}

#[test]
fn test_heap_and_region_are_released_when_empty() {
    let allocator = Allocator::new();

    let small = allocator.allocate(200).unwrap();
    let medium = allocator.allocate(200_000).unwrap();
    assert_eq!(allocator.stats().regions, 1);

    unsafe { allocator.free(small) };
    let stats = allocator.stats();
    assert_eq!((stats.regions, stats.heaps), (1, 0));

    unsafe { allocator.free(medium) };
    assert_eq!(allocator.stats(), AllocatorStats::default());
}

#[test]
fn test_zero_sized_requests() {
    let allocator = Allocator::new();

    assert!(allocator.allocate(0).is_none());
    assert!(matches!(allocator.try_allocate(0), Err(AllocError::ZeroSize)));
    assert!(allocator.zero_allocate(0, 16).is_none());
    assert!(allocator.zero_allocate(16, 0).is_none());
    unsafe {
        assert!(allocator.reallocate(None, 0).is_none());
    }
}

#[test]
fn test_unsatisfiable_request() {
    let allocator = Allocator::new();

    assert!(allocator.allocate(usize::MAX).is_none());
    assert!(matches!(
        allocator.try_allocate(usize::MAX - 1),
        Err(AllocError::TooLarge { .. })
    ));
}

#[test]
fn test_zero_allocate_clears_reused_memory() {
    let allocator = Allocator::new();
    let keep = allocator.allocate(32).unwrap();

    let dirty = allocator.allocate(1000).unwrap();
    fill(dirty, 1000, 0xFF);
    unsafe { allocator.free(dirty) };

    let clean = allocator.zero_allocate(10, 100).unwrap();
    assert!(all_equal(clean, 1000, 0));

    unsafe {
        allocator.free(clean);
        allocator.free(keep);
    }
}

#[test]
fn test_zero_allocate_product_wraps() {
    let allocator = Allocator::new();
    let half = usize::MAX / 2 + 1;

    // Wraps to zero.
    assert!(allocator.zero_allocate(half, 2).is_none());

    // Wraps to two bytes, which is what gets allocated.
    let ptr = allocator.zero_allocate(half + 1, 2).unwrap();
    unsafe {
        assert_eq!(allocator.usable_size(ptr), ALLOC_ALIGN);
        allocator.free(ptr);
    }
}

#[test]
fn test_reallocate_null_allocates() {
    let allocator = Allocator::new();

    unsafe {
        let ptr = allocator.reallocate(None, 64).unwrap();
        assert_eq!(allocator.usable_size(ptr), 64);
        allocator.free(ptr);
    }
}

#[test]
fn test_reallocate_to_zero_frees() {
    let allocator = Allocator::new();
    let ptr = allocator.allocate(64).unwrap();

    unsafe {
        assert!(allocator.reallocate(Some(ptr), 0).is_none());
    }
    assert_eq!(allocator.stats().regions, 0);
}

#[test]
fn test_reallocate_same_rounded_size_is_a_no_op() {
    let allocator = Allocator::new();
    let ptr = allocator.allocate(50).unwrap();

    unsafe {
        assert_eq!(allocator.reallocate(Some(ptr), 64), Some(ptr));
        allocator.free(ptr);
    }
}

#[test]
fn test_reallocate_shrinks_in_place() {
    let allocator = Allocator::new();

    for size in [4096, 1 << 20] {
        let ptr = allocator.allocate(size).unwrap();
        fill(ptr, size, 0x42);

        unsafe {
            let shrunk = allocator.reallocate(Some(ptr), 100).unwrap();
            assert_eq!(shrunk, ptr);
            assert_eq!(allocator.usable_size(shrunk), 128);
            assert!(all_equal(shrunk, 100, 0x42));
            allocator.free(shrunk);
        }
    }
    assert_eq!(allocator.stats().regions, 0);
}

#[test]
fn test_reallocate_grows_across_tiers() {
    let allocator = Allocator::new();
    let ptr = allocator.allocate(1000).unwrap();
    fill(ptr, 1000, 0x24);

    unsafe {
        let grown = allocator.reallocate(Some(ptr), 500_000).unwrap();
        assert!(all_equal(grown, 1000, 0x24));
        assert_eq!(allocator.usable_size(grown), 500_000);

        // The old Heap went away with its only block.
        assert_eq!(allocator.stats().heaps, 0);

        allocator.free(grown);
    }
    assert_eq!(allocator.stats().regions, 0);
}

#[test]
fn test_many_heaps_share_a_region() {
    let allocator = Allocator::new();

    let ptrs: Vec<_> = (0..8)
        .map(|_| allocator.allocate(MIN_HEAP_SIZE - 1).unwrap())
        .collect();

    let stats = allocator.stats();
    assert_eq!(stats.regions, 1);
    assert_eq!(stats.heaps, 8);

    for ptr in ptrs {
        unsafe { allocator.free(ptr) };
    }
    assert_eq!(allocator.stats(), AllocatorStats::default());
}

#[test]
fn test_free_restores_capacity_of_live_region() {
    let allocator = Allocator::new();
    // Keep a Heap and a Region alive for the whole test.
    let small = allocator.allocate(64).unwrap();
    let medium = allocator.allocate(200_000).unwrap();
    let before = allocator.stats();

    for bytes in [1, 100, MIN_HEAP_SIZE - 1, MIN_HEAP_SIZE, 1 << 20] {
        let ptr = allocator.allocate(bytes).unwrap();
        fill(ptr, bytes, 0x5C);
        unsafe { allocator.free(ptr) };

        assert_eq!(allocator.stats(), before, "after allocating {bytes} bytes");
    }

    unsafe {
        allocator.free(small);
        allocator.free(medium);
    }
    assert_eq!(allocator.stats(), AllocatorStats::default());
}
