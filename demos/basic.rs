use std::ptr::NonNull;

use tieralloc::{Allocator, MIN_HEAP_SIZE, REGION_SIZE};

static ALLOCATOR: Allocator = Allocator::new();

fn log_alloc(bytes: usize, addr: NonNull<u8>) {
    let usable = unsafe { ALLOCATOR.usable_size(addr) };
    println!("Requested {bytes} bytes of memory");
    println!("Received this address: {addr:?} ({usable} usable bytes)");
}

fn main() {
    let small = 100;
    let medium = MIN_HEAP_SIZE;
    let big = REGION_SIZE;

    let addr1 = ALLOCATOR.allocate(small).expect("small allocation");
    log_alloc(small, addr1);

    let addr2 = ALLOCATOR.allocate(medium).expect("region allocation");
    log_alloc(medium, addr2);

    let addr3 = ALLOCATOR.allocate(big).expect("big allocation");
    log_alloc(big, addr3);

    println!("{:#?}", ALLOCATOR.stats());

    unsafe {
        let grown = ALLOCATOR.reallocate(Some(addr1), 4096).expect("reallocation");
        log_alloc(4096, grown);

        ALLOCATOR.free(grown);
        ALLOCATOR.free(addr2);
        ALLOCATOR.free(addr3);
    }

    println!("{:#?}", ALLOCATOR.stats());
}
