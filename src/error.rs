use std::io;

use thiserror::Error;

/// The operating system refused to hand out an anonymous mapping.
#[derive(Debug, Error)]
#[error("failed to map {len} bytes of anonymous memory: {source}")]
pub struct MapError {
    /// Length of the mapping that was requested.
    pub len: usize,
    #[source]
    pub source: io::Error,
}

impl MapError {
    /// Captures the last OS error for a failed mapping of `len` bytes.
    pub(crate) fn last_os_error(len: usize) -> Self {
        Self {
            len,
            source: io::Error::last_os_error(),
        }
    }
}

/// Why an allocation request could not be satisfied.
///
/// The public `allocate`/`reallocate`/`zero_allocate` entry points collapse
/// every variant into a null result; [`crate::Allocator::try_allocate`]
/// reports it.
#[derive(Debug, Error)]
pub enum AllocError {
    /// The request rounds to zero bytes.
    #[error("zero sized allocation")]
    ZeroSize,
    /// The request does not fit in a fresh Region or overflows the address space.
    #[error("allocation of {bytes} bytes cannot be satisfied by any tier")]
    TooLarge { bytes: usize },
    #[error(transparent)]
    Map(#[from] MapError),
}
