use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{arena::Arena, error::MapError};

/// Virtual memory page size of the computer, queried once. This is usually
/// 4096. It can't be a constant since we don't know the value at compile time.
static OS_PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Zero sized handle to the operating system primitives the allocator
/// builds on. Nothing else in the crate talks to the OS directly.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request an anonymous, private, read-write mapping of `len` bytes.
    /// It returns a pointer to the mapping or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the whole mapping of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize);

    /// Gives back the trailing `len` bytes at `addr` of a mapping that stays
    /// alive. `addr` is page aligned.
    unsafe fn trim_memory(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub(crate) fn page_size() -> usize {
    match OS_PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { Kernel::page_size() };
            OS_PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Maps `len` bytes of fresh anonymous memory.
pub(crate) fn request_memory(len: usize) -> Result<Arena, MapError> {
    match unsafe { Kernel::request_memory(len) } {
        Some(base) => Ok(Arena::new(base, len)),
        None => Err(MapError::last_os_error(len)),
    }
}

/// Unmaps the whole `arena`.
///
/// **SAFETY**: `arena` must describe a mapping obtained from [`request_memory`]
/// and nothing may reference it afterwards.
#[inline]
pub(crate) unsafe fn return_memory(arena: Arena) {
    unsafe { Kernel::return_memory(arena.base(), arena.len()) }
}

/// Releases the `[offset, len)` tail of `arena`.
///
/// **SAFETY**: `offset` must be page aligned and the tail must be unused.
pub(crate) unsafe fn trim_memory(arena: Arena, offset: usize) {
    let len = arena.len() - offset;

    if len > 0 {
        unsafe { Kernel::trim_memory(arena.at(offset), len) }
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
            let status = unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) };
            debug_assert_eq!(status, 0, "munmap failed at {addr:p}");
        }

        unsafe fn trim_memory(addr: NonNull<u8>, len: usize) {
            // Partial munmap is fine on unix.
            let status = unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) };
            debug_assert_eq!(status, 0, "munmap failed at {addr:p}");
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) {
            // MEM_RELEASE always frees the whole reservation.
            unsafe {
                let released = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
                debug_assert!(released.is_ok(), "VirtualFree(MEM_RELEASE) failed at {addr:p}");
            }
        }

        unsafe fn trim_memory(addr: NonNull<u8>, len: usize) {
            // A reservation can't be partially released, decommit the tail instead.
            unsafe {
                let decommitted = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), len, Memory::MEM_DECOMMIT);
                debug_assert!(decommitted.is_ok(), "VirtualFree(MEM_DECOMMIT) failed at {addr:p}");
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_cached_power_of_two() {
        let size = page_size();

        assert!(size.is_power_of_two());
        assert_eq!(size, page_size());
    }

    #[test]
    fn request_write_and_return() {
        let len = 4 * page_size();
        let arena = request_memory(len).unwrap();

        unsafe {
            let bytes = std::slice::from_raw_parts_mut(arena.base().as_ptr(), len);
            // Anonymous memory comes zeroed.
            assert!(bytes.iter().all(|&b| b == 0));
            bytes.fill(0xA5);
            assert_eq!(bytes[len - 1], 0xA5);

            trim_memory(arena, 2 * page_size());
            assert_eq!(*arena.base().as_ptr(), 0xA5);

            return_memory(arena);
        }
    }
}
