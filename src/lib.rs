//! Three tier general purpose memory allocator.
//!
//! ```text
//!   request size          served by
//!   < 128 KiB             Heap: free list inside a few pages of a Region
//!   < 128 MiB             Region: a run of whole pages of a Region
//!   >= 128 MiB            Big: an anonymous mapping of its own
//! ```
//!
//! Regions are 128 MiB anonymous mappings whose pages are tracked by a
//! Page-Run Table. Every allocation is preceded by a [`BLOCK_HEADER_SIZE`]
//! byte header recording its tier and owner, which is all `free` and
//! `reallocate` need to find their way back. See [`Allocator`].

mod allocator;
mod arena;
mod big;
mod block;
mod error;
mod heap;
mod kernel;
mod list;
mod page_map;
mod region;
mod stats;
mod trail;
mod utils;

pub use allocator::Allocator;
pub use block::BLOCK_HEADER_SIZE;
pub use error::{AllocError, MapError};
pub use heap::HEAP_OVERHEAD;
pub use stats::AllocatorStats;

/// Alignment of every pointer handed out and granularity of every size.
pub const ALLOC_ALIGN: usize = 32;

/// Page size the Page-Run Table works with.
pub const PAGE_SIZE: usize = 4096;

/// Bytes of user pages in one Region.
pub const REGION_SIZE: usize = 128 << 20;

/// User pages in one Region.
pub const REGION_PAGES: usize = REGION_SIZE / PAGE_SIZE;

/// Smallest request served directly by a Region. Also the guaranteed
/// capacity of a fresh Heap.
pub const MIN_HEAP_SIZE: usize = 128 << 10;

/// Smallest request that gets a mapping of its own.
pub const BIG_ALLOC_THRESHOLD: usize = REGION_SIZE;

/// A free remainder smaller than this (plus a header) stays attached to
/// the block it was cut from.
pub const MIN_HEAP_WASTE: usize = ALLOC_ALIGN;

const _: () = assert!(PAGE_SIZE % ALLOC_ALIGN == 0);
