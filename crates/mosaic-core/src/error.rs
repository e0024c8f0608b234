//! Construction errors.

use thiserror::Error;

/// Failure to construct an allocator or one of its backing arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CreateError {
    /// The requested pool cannot hold even one minimal block.
    #[error("pool of {requested} bytes is below the minimum of {minimum} bytes")]
    SizeTooSmall { requested: usize, minimum: usize },
    /// The host allocator refused to provide the backing region.
    #[error("host allocator failed to provide a {size}-byte backing region")]
    BackingAllocFailed { size: usize },
}
