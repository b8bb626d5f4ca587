use thiserror::Error;

/// Errors that can occur when a [`DynamicArray`][crate::DynamicArray] or
/// [`RawStorage`][crate::RawStorage] needs a new block of memory.
///
/// Whenever one of these is returned (or, for the infallible methods, raised as a panic), the
/// container is left exactly as it was before the call.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The requested number of slots does not fit into the address space once multiplied by
    /// the element size, or exceeds `isize::MAX` bytes.
    #[error("capacity overflow: cannot reserve {requested} slots")]
    CapacityOverflow {
        /// The number of slots that was requested.
        requested: usize,
    },

    /// The global allocator could not supply a block of the requested size.
    #[error("out of memory: failed to allocate {bytes} bytes with alignment {align}")]
    OutOfMemory {
        /// Size of the rejected allocation, in bytes.
        bytes: usize,

        /// Alignment of the rejected allocation, in bytes.
        align: usize,
    },
}

/// A specialized `Result` type for storage operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
