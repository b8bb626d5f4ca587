use std::alloc::{Layout, alloc, dealloc};
use std::any::type_name;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::{fmt, mem};

use tracing::debug;

use crate::{Error, Result};

/// An owned block of uninitialized memory with room for exactly `capacity` values of `T`.
///
/// `RawStorage` separates "own N slots of storage" from "construct/destroy objects in those
/// slots". It never reads, writes, constructs or drops a `T` - it only hands out slot addresses.
/// Whoever places values into the slots is responsible for dropping them again before the
/// storage is dropped. Any value still present when the storage is dropped is leaked, never
/// dropped.
///
/// The storage cannot be cloned because it has no idea which slots hold live values. Ownership
/// of the block moves with the `RawStorage` itself and can be exchanged between two instances
/// via [`swap()`](Self::swap), which never fails and is used as the commit step by
/// [`DynamicArray`][crate::DynamicArray] whenever it replaces its storage.
///
/// A storage with zero capacity (and any storage of a zero-sized `T`) owns no allocation.
///
/// # Examples
///
/// ```
/// use dynamic_array::RawStorage;
///
/// let storage = RawStorage::<u64>::allocate(4);
/// assert_eq!(storage.capacity(), 4);
///
/// // SAFETY: Slot 0 is in bounds and uninitialized, so writing does not overwrite a live value.
/// unsafe { storage.slot(0).write(42) };
///
/// // SAFETY: Slot 0 is in bounds and we initialized it above. Reading moves the value out,
/// // leaving the slot logically uninitialized again before the storage is dropped.
/// let value = unsafe { storage.slot(0).read() };
/// assert_eq!(value, 42);
/// ```
pub struct RawStorage<T> {
    /// Start of the allocation. Dangling (but aligned) when nothing is allocated.
    buffer: NonNull<T>,

    /// Number of `T`-sized slots the allocation has room for.
    capacity: usize,

    // The storage is logically a container of `T` for auto trait and variance purposes,
    // even though it never drops any `T` itself.
    _slots: PhantomData<T>,
}

impl<T> RawStorage<T> {
    /// Creates a storage with zero capacity. This does not allocate.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            buffer: NonNull::dangling(),
            capacity: 0,
            _slots: PhantomData,
        }
    }

    /// Allocates a storage block with room for exactly `capacity` values of `T`.
    ///
    /// No allocation takes place if `capacity` is zero or `T` is zero-sized.
    ///
    /// # Panics
    ///
    /// Panics if the block size overflows or the allocator cannot supply the memory.
    /// Use [`try_allocate()`](Self::try_allocate) to handle these conditions.
    #[must_use]
    pub fn allocate(capacity: usize) -> Self {
        match Self::try_allocate(capacity) {
            Ok(storage) => storage,
            Err(error) => panic!("{error}"),
        }
    }

    /// Allocates a storage block with room for exactly `capacity` values of `T`, returning
    /// an error if the block size overflows or the allocator cannot supply the memory.
    ///
    /// No allocation takes place if `capacity` is zero or `T` is zero-sized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if `capacity * size_of::<T>()` exceeds
    /// `isize::MAX` bytes and [`Error::OutOfMemory`] if the allocator returns null.
    pub fn try_allocate(capacity: usize) -> Result<Self> {
        let layout = Self::layout(capacity)?;

        if layout.size() == 0 {
            return Ok(Self {
                buffer: NonNull::dangling(),
                capacity,
                _slots: PhantomData,
            });
        }

        // SAFETY: The layout has a non-zero size (checked above) and was calculated by
        // Layout::array, so it is valid for an array of `capacity` values of `T`.
        let Some(buffer) = NonNull::new(unsafe { alloc(layout) }) else {
            debug!(
                element = type_name::<T>(),
                capacity,
                bytes = layout.size(),
                "storage allocation failed"
            );

            return Err(Error::OutOfMemory {
                bytes: layout.size(),
                align: layout.align(),
            });
        };

        Ok(Self {
            buffer: buffer.cast(),
            capacity,
            _slots: PhantomData,
        })
    }

    fn layout(capacity: usize) -> Result<Layout> {
        Layout::array::<T>(capacity).map_err(|_layout_error| Error::CapacityOverflow {
            requested: capacity,
        })
    }

    /// Returns the number of slots in the block.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a pointer to the first slot.
    ///
    /// The pointer is dangling (but aligned and non-null) if nothing is allocated.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.buffer
    }

    /// Returns a pointer to the slot at `offset`.
    ///
    /// `offset == capacity` is permitted and yields the one-past-the-end address, which
    /// must not be read or written.
    ///
    /// The storage does not know which slots are initialized. Reading from the returned
    /// pointer is only valid if the owner has previously written a value into the slot.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `offset <= capacity`. This is only checked in debug builds.
    #[must_use]
    #[inline]
    pub unsafe fn slot(&self, offset: usize) -> NonNull<T> {
        debug_assert!(
            offset <= self.capacity,
            "slot {offset} out of bounds in storage of capacity {}",
            self.capacity
        );

        // SAFETY: The caller guarantees the offset is within the block or one past its end,
        // so the result stays within the same allocated object.
        // For zero-sized `T` or an empty block, adding to a dangling pointer is a no-op.
        unsafe { self.buffer.add(offset) }
    }

    /// Exchanges the blocks owned by `self` and `other`.
    ///
    /// This never fails and touches no slot contents.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.buffer, &mut other.buffer);
        mem::swap(&mut self.capacity, &mut other.capacity);
    }

    /// Moves the block out of `self`, leaving `self` with zero capacity.
    #[must_use]
    #[inline]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }
}

impl<T> Default for RawStorage<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RawStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("buffer", &self.buffer)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> Drop for RawStorage<T> {
    fn drop(&mut self) {
        let layout = Self::layout(self.capacity)
            .expect("layout was already calculated successfully when the block was allocated");

        if layout.size() == 0 {
            return;
        }

        // SAFETY: A non-zero-sized layout means we allocated the block in try_allocate() using
        // this exact layout, and the block is released exactly once because ownership moves
        // only via swap()/take(), both of which keep one owner per block.
        unsafe {
            dealloc(self.buffer.as_ptr().cast(), layout);
        }
    }
}

// SAFETY: The storage exclusively owns its block. Sending it to another thread sends the
// (caller-managed) `T` values with it, which is sound when `T: Send`.
unsafe impl<T: Send> Send for RawStorage<T> {}

// SAFETY: Shared access only exposes raw pointers; any shared access to the `T` values is
// performed by the owner under its own rules, which requires `T: Sync`.
unsafe impl<T: Sync> Sync for RawStorage<T> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(RawStorage<u32>: Send, Sync, Default);
    assert_not_impl_any!(RawStorage<Rc<u32>>: Send, Sync);
    assert_not_impl_any!(RawStorage<u32>: Clone);

    #[test]
    fn new_is_empty() {
        let storage = RawStorage::<u64>::new();

        assert_eq!(storage.capacity(), 0);
        assert_eq!(storage.as_ptr(), NonNull::dangling());
    }

    #[test]
    fn zero_capacity_does_not_allocate() {
        let storage = RawStorage::<u64>::allocate(0);

        assert_eq!(storage.capacity(), 0);
        assert_eq!(storage.as_ptr(), NonNull::dangling());
    }

    #[test]
    fn slots_are_contiguous_and_aligned() {
        #[repr(align(32))]
        struct Wide {
            _data: [u8; 32],
        }

        let storage = RawStorage::<Wide>::allocate(5);

        assert_eq!(storage.capacity(), 5);

        for index in 0..5 {
            let address = unsafe { storage.slot(index) }.as_ptr() as usize;
            assert_eq!(address % 32, 0);
            assert_eq!(address - storage.as_ptr().as_ptr() as usize, index * 32);
        }
    }

    #[test]
    fn one_past_end_is_addressable() {
        let storage = RawStorage::<u16>::allocate(3);

        let end = unsafe { storage.slot(3) }.as_ptr() as usize;
        assert_eq!(end - storage.as_ptr().as_ptr() as usize, 6);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn slot_beyond_end_panics_in_debug() {
        let storage = RawStorage::<u16>::allocate(3);

        _ = unsafe { storage.slot(4) };
    }

    #[test]
    fn write_and_read_back() {
        let storage = RawStorage::<String>::allocate(2);

        unsafe {
            storage.slot(0).write("first".to_string());
            storage.slot(1).write("second".to_string());

            assert_eq!(storage.slot(0).as_ref(), "first");
            assert_eq!(storage.slot(1).as_ref(), "second");

            // Move the values out again so nothing leaks.
            drop(storage.slot(0).read());
            drop(storage.slot(1).read());
        }
    }

    #[test]
    fn drop_never_drops_slot_contents() {
        struct PanicOnDrop;

        impl Drop for PanicOnDrop {
            fn drop(&mut self) {
                panic!("storage must not drop slot contents");
            }
        }

        let storage = RawStorage::<PanicOnDrop>::allocate(2);

        unsafe {
            storage.slot(0).write(PanicOnDrop);
        }

        // The value is leaked, which is the documented outcome.
        drop(storage);
    }

    #[test]
    fn swap_exchanges_blocks() {
        let mut a = RawStorage::<u32>::allocate(2);
        let mut b = RawStorage::<u32>::allocate(7);

        let a_ptr = a.as_ptr();
        let b_ptr = b.as_ptr();

        a.swap(&mut b);

        assert_eq!(a.capacity(), 7);
        assert_eq!(b.capacity(), 2);
        assert_eq!(a.as_ptr(), b_ptr);
        assert_eq!(b.as_ptr(), a_ptr);
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut source = RawStorage::<u32>::allocate(4);
        let source_ptr = source.as_ptr();

        let target = source.take();

        assert_eq!(target.capacity(), 4);
        assert_eq!(target.as_ptr(), source_ptr);
        assert_eq!(source.capacity(), 0);
    }

    #[test]
    fn zero_sized_type_never_allocates() {
        let storage = RawStorage::<()>::allocate(1000);

        assert_eq!(storage.capacity(), 1000);
        assert_eq!(storage.as_ptr(), NonNull::dangling());
        assert_eq!(unsafe { storage.slot(999) }, NonNull::dangling());
    }

    #[test]
    fn overflowing_capacity_is_error() {
        let result = RawStorage::<u64>::try_allocate(usize::MAX);

        assert_eq!(
            result.unwrap_err(),
            Error::CapacityOverflow {
                requested: usize::MAX
            }
        );
    }

    #[test]
    #[should_panic]
    fn overflowing_capacity_panics_in_allocate() {
        drop(RawStorage::<u64>::allocate(usize::MAX / 2));
    }

    #[test]
    fn slot_contents_are_owner_managed() {
        let counter = Rc::new(Cell::new(0_u32));
        let storage = RawStorage::<Rc<Cell<u32>>>::allocate(1);

        unsafe {
            storage.slot(0).write(Rc::clone(&counter));
            storage.slot(0).as_ref().set(5);
        }

        assert_eq!(counter.get(), 5);
        assert_eq!(Rc::strong_count(&counter), 2);

        unsafe {
            storage.slot(0).drop_in_place();
        }

        assert_eq!(Rc::strong_count(&counter), 1);
    }
}
