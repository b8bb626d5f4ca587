use std::any::type_name;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::{cmp, fmt, mem, slice};

use scopeguard::ScopeGuard;
use tracing::trace;

use crate::{
    CopyElements, DynamicArrayBuilder, Error, MoveElements, RawStorage, Result, Transplant,
};

/// A growable, contiguous array with value semantics, built directly on top of [`RawStorage`].
///
/// The array owns one storage block and tracks how many of its slots hold live elements.
/// Slots `[0, len)` are live and contiguous, slots `[len, capacity)` are uninitialized.
///
/// # Growth and strong exception safety
///
/// When the array runs out of capacity it never grows its block in place. Instead it
/// allocates a fresh block, transplants the existing elements into it and only then swaps
/// the new block in. If the allocation fails or an element constructor or clone panics before
/// the swap, the array is left exactly as it was before the call.
///
/// Implicit growth (appending or inserting into a full array) doubles the capacity, starting
/// from one slot, which makes appending O(1) amortized.
///
/// # Transplant strategy
///
/// The second type parameter selects at compile time how elements are carried from one slot
/// to another. [`MoveElements`] (the default) relocates them bitwise, which cannot fail.
/// [`CopyElements`] clones them and only destroys the originals once every clone succeeded.
/// See the [`transplant`][crate::transplant] module for details.
///
/// # Allocation failure
///
/// The `try_*` methods return an [`Error`] if the needed memory cannot be allocated. The other
/// methods panic with the same error. In both cases the array remains unchanged.
///
/// # Examples
///
/// ```
/// use dynamic_array::DynamicArray;
///
/// let mut array = DynamicArray::<u32>::new();
///
/// array.push(1);
/// array.push(2);
/// array.push(3);
///
/// array.erase(1);
/// assert_eq!(array.as_slice(), &[1, 3]);
///
/// array.insert(1, 9);
/// assert_eq!(array.as_slice(), &[1, 9, 3]);
///
/// array.resize(1);
/// assert_eq!(array.as_slice(), &[1]);
/// ```
pub struct DynamicArray<T, S = MoveElements> {
    storage: RawStorage<T>,

    /// Number of live elements at the start of the storage block.
    len: usize,

    _strategy: PhantomData<S>,
}

impl<T, S: Transplant<T>> DynamicArray<T, S> {
    /// Creates an empty array. This does not allocate.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self::from_storage(RawStorage::new())
    }

    /// Creates a builder for configuring a new array.
    ///
    /// # Examples
    ///
    /// ```
    /// use dynamic_array::DynamicArray;
    ///
    /// let array = DynamicArray::<String>::builder().capacity(16).build();
    ///
    /// assert!(array.is_empty());
    /// assert_eq!(array.capacity(), 16);
    /// ```
    #[inline]
    pub fn builder() -> DynamicArrayBuilder<T, S> {
        DynamicArrayBuilder::new()
    }

    #[inline]
    pub(crate) const fn from_storage(storage: RawStorage<T>) -> Self {
        Self {
            storage,
            len: 0,
            _strategy: PhantomData,
        }
    }

    /// Creates an array of `len` default-constructed elements, with exactly `len` capacity.
    ///
    /// If a `T::default()` call panics, the elements constructed so far are dropped and the
    /// block is released before the panic propagates.
    ///
    /// # Panics
    ///
    /// Panics if the memory cannot be allocated.
    #[must_use]
    pub fn with_len(len: usize) -> Self
    where
        T: Default,
    {
        unwrap_storage_result(Self::try_with_len(len))
    }

    /// Creates an array of `len` default-constructed elements, with exactly `len` capacity,
    /// returning an error if the memory cannot be allocated.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the storage block cannot be allocated.
    pub fn try_with_len(len: usize) -> Result<Self>
    where
        T: Default,
    {
        let storage = RawStorage::try_allocate(len)?;

        // SAFETY: The block is freshly allocated with exactly `len` slots, all uninitialized.
        unsafe {
            fill_default(storage.as_ptr(), len);
        }

        let mut array = Self::from_storage(storage);
        array.len = len;

        #[cfg(debug_assertions)]
        array.integrity_check();

        Ok(array)
    }

    /// Returns the number of live elements.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the array holds no elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of elements the array can hold without allocating a new block.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Returns the live elements as a slice.
    #[must_use]
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: The first `len` slots hold live elements and the pointer is non-null and
        // aligned even when nothing is allocated.
        unsafe { slice::from_raw_parts(self.storage.as_ptr().as_ptr(), self.len) }
    }

    /// Returns the live elements as a mutable slice.
    #[must_use]
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: The first `len` slots hold live elements, and we hold `&mut self` so nobody
        // else has access to them.
        unsafe { slice::from_raw_parts_mut(self.storage.as_ptr().as_ptr(), self.len) }
    }

    /// Ensures the array can hold at least `capacity` elements in total.
    ///
    /// Does nothing if the capacity is already sufficient. Otherwise allocates a block of
    /// exactly `capacity` slots and transplants the elements into it.
    ///
    /// # Panics
    ///
    /// Panics if the memory cannot be allocated. The array is unchanged in that case.
    pub fn reserve(&mut self, capacity: usize) {
        unwrap_storage_result(self.try_reserve(capacity));
    }

    /// Ensures the array can hold at least `capacity` elements in total, returning an error
    /// if the memory cannot be allocated.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if a new storage block is needed but cannot be allocated.
    /// The array is unchanged in that case.
    pub fn try_reserve(&mut self, capacity: usize) -> Result<()> {
        if capacity <= self.capacity() {
            return Ok(());
        }

        self.relocate(capacity)
    }

    /// Resizes the array to exactly `len` elements.
    ///
    /// Shrinking drops the excess elements at the end. Growing ensures capacity for `len`
    /// elements and appends default-constructed ones. If a `T::default()` call panics, the
    /// elements constructed by this call are dropped again and the length is unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the memory cannot be allocated. The array is unchanged in that case.
    pub fn resize(&mut self, len: usize)
    where
        T: Default,
    {
        unwrap_storage_result(self.try_resize(len));
    }

    /// Resizes the array to exactly `len` elements, returning an error if the memory cannot
    /// be allocated.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if a new storage block is needed but cannot be allocated.
    /// The array is unchanged in that case.
    pub fn try_resize(&mut self, len: usize) -> Result<()>
    where
        T: Default,
    {
        if len <= self.len {
            self.truncate(len);
            return Ok(());
        }

        self.try_reserve(len)?;

        // Cannot underflow because len > self.len.
        let added = len.wrapping_sub(self.len);

        // SAFETY: We just ensured capacity for `len` elements, so the slot after the live
        // range is inside the block.
        let first_added = unsafe { self.storage.slot(self.len) };

        // SAFETY: The `added` slots from there on are inside the block and uninitialized.
        unsafe {
            fill_default(first_added, added);
        }

        self.len = len;

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Appends an element to the end of the array and returns a reference to it.
    ///
    /// # Panics
    ///
    /// Panics if the array is full and a larger block cannot be allocated.
    /// The array is unchanged in that case.
    pub fn push(&mut self, value: T) -> &mut T {
        unwrap_storage_result(self.try_push_with(|| value))
    }

    /// Appends an element to the end of the array and returns a reference to it, returning
    /// an error if the array is full and a larger block cannot be allocated.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the memory cannot be allocated. The array is unchanged and
    /// `value` is dropped in that case.
    pub fn try_push(&mut self, value: T) -> Result<&mut T> {
        self.try_push_with(|| value)
    }

    /// Appends an element constructed in place by `f` and returns a reference to it.
    ///
    /// If the array is full, the new block is allocated first and the element is constructed
    /// directly in its final slot of the new block before the existing elements are
    /// transplanted. If `f` panics, the array is unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the array is full and a larger block cannot be allocated.
    /// The array is unchanged in that case.
    pub fn push_with(&mut self, f: impl FnOnce() -> T) -> &mut T {
        unwrap_storage_result(self.try_push_with(f))
    }

    fn try_push_with(&mut self, f: impl FnOnce() -> T) -> Result<&mut T> {
        let index = self.len;

        if self.len < self.capacity() {
            let value = f();

            // SAFETY: len < capacity, so the slot is inside the block.
            let slot = unsafe { self.storage.slot(index) };

            // SAFETY: The slot is past the live range, so it is uninitialized.
            unsafe {
                slot.write(value);
            }

            // Cannot overflow because len < capacity.
            self.len = self.len.wrapping_add(1);
        } else {
            self.relocate_with(self.grown_capacity()?, index, f)?;
        }

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(self.element_mut(index))
    }

    /// Removes the last element and returns it, or `None` if the array is empty.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        // Cannot underflow because len > 0.
        self.len = self.len.wrapping_sub(1);

        // SAFETY: The old length was within capacity, so the slot is inside the block.
        let slot = unsafe { self.storage.slot(self.len) };

        // SAFETY: The slot was live and is no longer covered by the length, so we take
        // ownership of its contents.
        Some(unsafe { slot.read() })
    }

    /// Drops the last element.
    ///
    /// # Panics
    ///
    /// Panics if the array is empty.
    pub fn remove_last(&mut self) {
        assert!(
            self.len > 0,
            "remove_last() called on an empty {}",
            type_name::<Self>()
        );

        // Cannot underflow because len > 0.
        self.len = self.len.wrapping_sub(1);

        // SAFETY: The old length was within capacity, so the slot is inside the block.
        let slot = unsafe { self.storage.slot(self.len) };

        // SAFETY: The slot was live and is no longer covered by the length.
        unsafe {
            slot.drop_in_place();
        }
    }

    /// Inserts an element before `index` and returns a reference to it in its final location.
    ///
    /// `index == len()` appends. Elements at `[index, len)` shift one slot to the right.
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`, or if the array is full and a larger block cannot be
    /// allocated. The array is unchanged in the latter case.
    pub fn insert(&mut self, index: usize, value: T) -> &mut T {
        unwrap_storage_result(self.try_insert_with(index, || value))
    }

    /// Inserts an element before `index` and returns a reference to it in its final location,
    /// returning an error if the array is full and a larger block cannot be allocated.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the memory cannot be allocated. The array is unchanged and
    /// `value` is dropped in that case.
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`.
    pub fn try_insert(&mut self, index: usize, value: T) -> Result<&mut T> {
        self.try_insert_with(index, || value)
    }

    /// Inserts an element constructed by `f` before `index` and returns a reference to it in
    /// its final location.
    ///
    /// If `f` panics, the array is unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`, or if the array is full and a larger block cannot be
    /// allocated. The array is unchanged in the latter case.
    pub fn insert_with(&mut self, index: usize, f: impl FnOnce() -> T) -> &mut T {
        unwrap_storage_result(self.try_insert_with(index, f))
    }

    fn try_insert_with(&mut self, index: usize, f: impl FnOnce() -> T) -> Result<&mut T> {
        assert!(
            index <= self.len,
            "insertion index {index} out of bounds in {} of length {}",
            type_name::<Self>(),
            self.len
        );

        if index == self.len {
            return self.try_push_with(f);
        }

        if self.len < self.capacity() {
            // The new value is fully built before any element is touched.
            let value = f();

            // SAFETY: index < len < capacity, so the block has room for one more element.
            unsafe {
                S::insert_within(self.storage.as_ptr(), &mut self.len, index, value);
            }
        } else {
            self.relocate_with(self.grown_capacity()?, index, f)?;
        }

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(self.element_mut(index))
    }

    /// Drops the element at `index`, shifting the elements behind it one slot to the left.
    ///
    /// Returns `index`, which now denotes the element that took the erased element's place,
    /// or the new end of the array if the erased element was the last one.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn erase(&mut self, index: usize) -> usize {
        assert!(
            index < self.len,
            "erase index {index} out of bounds in {} of length {}",
            type_name::<Self>(),
            self.len
        );

        // SAFETY: index < len.
        unsafe {
            S::erase_within(self.storage.as_ptr(), &mut self.len, index);
        }

        #[cfg(debug_assertions)]
        self.integrity_check();

        index
    }

    /// Removes the element at `index` and returns it, shifting the elements behind it one
    /// slot to the left.
    ///
    /// Taking the element out by value moves it regardless of the transplant strategy.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn remove(&mut self, index: usize) -> T {
        assert!(
            index < self.len,
            "removal index {index} out of bounds in {} of length {}",
            type_name::<Self>(),
            self.len
        );

        // SAFETY: index < len, so the slot is inside the block.
        let removed_slot = unsafe { self.storage.slot(index) };

        // SAFETY: The slot holds a live element which we take ownership of.
        let removed = unsafe { removed_slot.read() };

        // Cannot underflow because index < len.
        let tail_len = self.len.wrapping_sub(index).wrapping_sub(1);

        // SAFETY: index + 1 <= len, so this is at most one past the last live element.
        let behind = unsafe { removed_slot.add(1) };

        // SAFETY: Both ranges lie within the live range; ptr::copy handles the overlap.
        unsafe {
            ptr::copy(behind.as_ptr(), removed_slot.as_ptr(), tail_len);
        }

        // Cannot underflow because index < len.
        self.len = self.len.wrapping_sub(1);

        removed
    }

    /// Drops all elements from `len` onwards. Does nothing if `len >= self.len()`.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }

        // Cannot underflow because len < self.len.
        let dropped = self.len.wrapping_sub(len);

        // SAFETY: len < self.len, so the slot is inside the live range.
        let tail = unsafe { self.storage.slot(len) };

        // Shorten first so that a panicking destructor cannot lead to a double drop.
        self.len = len;

        // SAFETY: The tail range was live and is no longer covered by the length.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(tail.as_ptr(), dropped));
        }
    }

    /// Drops all elements. The capacity is unchanged.
    #[inline]
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Exchanges the contents of two arrays without touching any element.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        self.storage.swap(&mut other.storage);
        mem::swap(&mut self.len, &mut other.len);
    }

    /// Moves the contents out of `self` into a new array, leaving `self` empty and without
    /// an allocated block.
    #[must_use]
    #[inline]
    pub fn take(&mut self) -> Self {
        let mut taken = Self::new();
        self.swap(&mut taken);
        taken
    }

    /// The capacity to grow to when an element is added to a full array.
    fn grown_capacity(&self) -> Result<usize> {
        let doubled = self
            .capacity()
            .checked_mul(2)
            .ok_or(Error::CapacityOverflow {
                requested: usize::MAX,
            })?;

        Ok(cmp::max(1, doubled))
    }

    /// Moves all elements into a new block of exactly `capacity` slots.
    fn relocate(&mut self, capacity: usize) -> Result<()> {
        debug_assert!(capacity >= self.len);

        let mut storage = RawStorage::try_allocate(capacity)?;

        trace!(
            element = type_name::<T>(),
            strategy = S::NAME,
            len = self.len,
            old_capacity = self.capacity(),
            new_capacity = capacity,
            "relocating storage"
        );

        // SAFETY: The first `len` slots of the current block are live, the new block has at
        // least `len` uninitialized slots and the two blocks are distinct allocations.
        unsafe {
            S::transplant(self.storage.as_ptr(), storage.as_ptr(), self.len);
        }

        self.commit(&mut storage, self.len);

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Moves all elements into a new block of exactly `capacity` slots, with a new element
    /// constructed by `f` at `index` and the elements from `index` onwards one slot later.
    fn relocate_with(
        &mut self,
        capacity: usize,
        index: usize,
        f: impl FnOnce() -> T,
    ) -> Result<()> {
        debug_assert!(index <= self.len);
        debug_assert!(capacity > self.len);

        let mut storage = RawStorage::try_allocate(capacity)?;

        trace!(
            element = type_name::<T>(),
            strategy = S::NAME,
            len = self.len,
            old_capacity = self.capacity(),
            new_capacity = capacity,
            index,
            "relocating storage to make room for new element"
        );

        let old_base = self.storage.as_ptr();
        let new_base = storage.as_ptr();

        // Cannot underflow because index <= len.
        let suffix_len = self.len.wrapping_sub(index);

        // The new element goes into its final slot first. If `f` panics, the new block is
        // released and nothing else has happened yet.
        // SAFETY: index <= len < capacity, so the slot is inside the new block.
        let new_slot = unsafe { storage.slot(index) };

        // SAFETY: See above. The slot is uninitialized.
        unsafe {
            new_slot.write(f());
        }

        // Panics from here on can only come from a cloning transplant. The guards tear down
        // whatever has been built in the new block so far; the old block is untouched.
        let new_element = scopeguard::guard(new_slot, |slot| {
            // SAFETY: We initialized this slot above and it is not yet owned by the array.
            unsafe {
                slot.drop_in_place();
            }
        });

        // SAFETY: The prefix `[0, index)` of the old block is live and the same range of the
        // new block is uninitialized. The blocks are distinct allocations.
        unsafe {
            S::transplant(old_base, new_base, index);
        }

        let prefix = scopeguard::guard(new_base, |base| {
            // SAFETY: The prefix was fully transplanted above and is not yet owned by the array.
            unsafe {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(base.as_ptr(), index));
            }
        });

        // SAFETY: index <= len, so this is at most one past the last live element of the
        // old block.
        let old_suffix = unsafe { old_base.add(index) };

        // SAFETY: index + 1 <= len + 1 <= capacity, so this is at most one past the end of
        // the new block.
        let new_suffix = unsafe { new_slot.add(1) };

        // SAFETY: The suffix `[index, len)` of the old block is live and `[index + 1, len + 1)`
        // of the new block is uninitialized. The blocks are distinct allocations.
        unsafe {
            S::transplant(old_suffix, new_suffix, suffix_len);
        }

        ScopeGuard::into_inner(prefix);
        ScopeGuard::into_inner(new_element);

        // Cannot overflow because len < capacity.
        let len = self.len.wrapping_add(1);

        self.commit(&mut storage, len);

        Ok(())
    }

    /// Swaps in a new block whose first `len` slots hold live elements, then retires the
    /// transplanted originals left in the previous block, which is released afterwards.
    ///
    /// The new block and its final length are in place before any original is destroyed.
    fn commit(&mut self, storage: &mut RawStorage<T>, len: usize) {
        self.storage.swap(storage);

        let retired = mem::replace(&mut self.len, len);

        // SAFETY: After the swap, `storage` holds the previous block whose first `retired`
        // slots are the sources of a completed transplant. The block is dropped right after.
        unsafe {
            S::retire(storage.as_ptr(), retired);
        }
    }

    /// Returns the element at `index` with the lifetime of the exclusive borrow of `self`.
    fn element_mut(&mut self, index: usize) -> &mut T {
        debug_assert!(index < self.len);

        // SAFETY: index < len, so the slot is inside the block.
        let mut slot = unsafe { self.storage.slot(index) };

        // SAFETY: The slot holds a live element, and the returned reference borrows `self`
        // mutably for its lifetime.
        unsafe { slot.as_mut() }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Performs an integrity check on the array.
    ///
    /// This method is only available in debug builds and is used for testing and validation.
    pub(crate) fn integrity_check(&self) {
        assert!(
            self.len <= self.capacity(),
            "{} length {} exceeds capacity {}",
            type_name::<Self>(),
            self.len,
            self.capacity()
        );

        assert!(
            self.storage.as_ptr().is_aligned(),
            "{} storage block is misaligned",
            type_name::<Self>()
        );
    }
}

/// Default-constructs `count` elements starting at `first`. If a constructor panics, the
/// elements constructed so far are dropped before the panic propagates.
///
/// # Safety
///
/// The `count` slots starting at `first` must be inside one block and uninitialized.
unsafe fn fill_default<T: Default>(first: NonNull<T>, count: usize) {
    let mut constructed = scopeguard::guard(0_usize, |constructed| {
        // SAFETY: Exactly the first `constructed` slots were initialized below.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(first.as_ptr(), constructed));
        }
    });

    for index in 0..count {
        let value = T::default();

        // SAFETY: The caller guarantees `count` slots inside one block.
        let slot = unsafe { first.add(index) };

        // SAFETY: The caller guarantees the slots are uninitialized.
        unsafe {
            slot.write(value);
        }

        // Cannot overflow because index < count.
        *constructed = constructed.wrapping_add(1);
    }

    ScopeGuard::into_inner(constructed);
}

fn unwrap_storage_result<R>(result: Result<R>) -> R {
    match result {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

impl<T, S: Transplant<T>> Default for DynamicArray<T, S> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> Drop for DynamicArray<T, S> {
    fn drop(&mut self) {
        // SAFETY: The first `len` slots hold live elements that nobody will use again.
        // The storage releases the block itself once we return.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                self.storage.as_ptr().as_ptr(),
                self.len,
            ));
        }
    }
}

impl<T: Clone, S: Transplant<T>> Clone for DynamicArray<T, S> {
    /// Creates an independent copy with exactly `len()` capacity.
    ///
    /// If a clone panics, the clones made so far are dropped and the block is released.
    fn clone(&self) -> Self {
        let storage = RawStorage::allocate(self.len);

        // SAFETY: Our first `len` slots are live, the new block has exactly `len`
        // uninitialized slots and the blocks are distinct allocations.
        unsafe {
            <CopyElements as Transplant<T>>::transplant(
                self.storage.as_ptr(),
                storage.as_ptr(),
                self.len,
            );
        }

        let mut copy = Self::from_storage(storage);
        copy.len = self.len;
        copy
    }

    /// Makes `self` a copy of `source`, reusing the existing block if it is large enough.
    ///
    /// If `source` does not fit, a complete copy is built first and then swapped in.
    /// Otherwise the overlapping prefix is assigned element by element, after which the
    /// extra elements are cloned in or the excess elements are dropped.
    fn clone_from(&mut self, source: &Self) {
        if source.len > self.capacity() {
            let mut copy = source.clone();
            self.swap(&mut copy);
            return;
        }

        let overlap = cmp::min(self.len, source.len);

        for (target, original) in self.as_mut_slice().iter_mut().zip(source.as_slice()) {
            target.clone_from(original);
        }

        if source.len > self.len {
            // Cannot underflow because source.len > self.len.
            let extra = source.len.wrapping_sub(overlap);

            // SAFETY: overlap < source.len, so the slot is inside the source block.
            let source_tail = unsafe { source.storage.slot(overlap) };

            // SAFETY: overlap < source.len <= capacity, so the slot is inside our block.
            let target_tail = unsafe { self.storage.slot(overlap) };

            // SAFETY: The source slots from `overlap` on are live, our slots from `overlap`
            // on are uninitialized and within capacity. The blocks are distinct allocations.
            unsafe {
                <CopyElements as Transplant<T>>::transplant(source_tail, target_tail, extra);
            }

            self.len = source.len;
        } else {
            self.truncate(source.len);
        }

        #[cfg(debug_assertions)]
        self.integrity_check();
    }
}

impl<T, S> Deref for DynamicArray<T, S>
where
    S: Transplant<T>,
{
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T, S> DerefMut for DynamicArray<T, S>
where
    S: Transplant<T>,
{
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl<T: fmt::Debug, S: Transplant<T>> fmt::Debug for DynamicArray<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<T: PartialEq, S: Transplant<T>> PartialEq for DynamicArray<T, S> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, S: Transplant<T>> Eq for DynamicArray<T, S> {}

impl<T, S: Transplant<T>> Extend<T> for DynamicArray<T, S> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<T, S: Transplant<T>> FromIterator<T> for DynamicArray<T, S> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut array = Self::new();
        array.extend(iter);
        array
    }
}

impl<'a, T, S: Transplant<T>> IntoIterator for &'a DynamicArray<T, S> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<'a, T, S: Transplant<T>> IntoIterator for &'a mut DynamicArray<T, S> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.as_mut_slice().iter_mut()
    }
}

#[cfg(test)]
#[allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(DynamicArray<u32>: Send, Sync, Default, Clone);
    assert_impl_all!(DynamicArray<u32, CopyElements>: Send, Sync);
    assert_not_impl_any!(DynamicArray<Rc<u32>>: Send, Sync);
    assert_not_impl_any!(DynamicArray<Cell<u32>>: Sync);

    /// Shared counters for elements created by one test.
    #[derive(Debug, Default)]
    struct Ledger {
        live: Cell<i64>,
        clones: Cell<u32>,
        clone_budget: Cell<Option<u32>>,
        panicking_drops: Cell<u32>,
    }

    #[derive(Debug)]
    struct Counted {
        value: u32,
        ledger: Rc<Ledger>,
    }

    impl Counted {
        fn new(value: u32, ledger: &Rc<Ledger>) -> Self {
            ledger.live.set(ledger.live.get() + 1);

            Self {
                value,
                ledger: Rc::clone(ledger),
            }
        }
    }

    impl Clone for Counted {
        fn clone(&self) -> Self {
            if let Some(budget) = self.ledger.clone_budget.get() {
                assert!(budget > 0, "clone budget exhausted");
                self.ledger.clone_budget.set(Some(budget - 1));
            }

            self.ledger.clones.set(self.ledger.clones.get() + 1);
            Self::new(self.value, &self.ledger)
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.ledger.live.set(self.ledger.live.get() - 1);

            let panicking_drops = self.ledger.panicking_drops.get();
            if panicking_drops > 0 {
                self.ledger.panicking_drops.set(panicking_drops - 1);
                panic!("destructor of element {} panicked", self.value);
            }
        }
    }

    fn values<S: Transplant<Counted>>(array: &DynamicArray<Counted, S>) -> Vec<u32> {
        array.iter().map(|item| item.value).collect()
    }

    #[test]
    fn new_does_not_allocate() {
        let array = DynamicArray::<u32>::new();

        assert_eq!(array.len(), 0);
        assert_eq!(array.capacity(), 0);
        assert!(array.is_empty());
        assert!(array.as_slice().is_empty());
    }

    #[test]
    fn push_doubles_capacity() {
        let mut array = DynamicArray::<u32>::new();
        let mut observed = Vec::new();

        for value in 0..9 {
            array.push(value);
            observed.push(array.capacity());
        }

        assert_eq!(observed, [1, 2, 4, 4, 8, 8, 8, 8, 16]);
        assert_eq!(array.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn push_returns_reference_to_new_element() {
        let mut array = DynamicArray::<String>::new();

        array.push("a".to_string()).push('!');
        let pushed = array.push_with(|| "b".to_string());
        pushed.push('?');

        assert_eq!(array.as_slice(), &["a!", "b?"]);
    }

    #[test]
    fn push_with_panic_leaves_array_unchanged() {
        let mut array = DynamicArray::<String>::new();
        array.push("a".to_string());

        // Full, so this takes the growth path.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            array.push_with(|| panic!("construction failed"));
        }));

        assert!(result.is_err());
        assert_eq!(array.as_slice(), &["a"]);
        assert_eq!(array.capacity(), 1);
    }

    #[test]
    fn with_len_default_constructs() {
        let array = DynamicArray::<String>::with_len(3);

        assert_eq!(array.len(), 3);
        assert_eq!(array.capacity(), 3);
        assert!(array.iter().all(String::is_empty));
    }

    #[test]
    fn with_len_zero_does_not_allocate() {
        let array = DynamicArray::<u64>::with_len(0);

        assert!(array.is_empty());
        assert_eq!(array.capacity(), 0);
    }

    #[test]
    fn pop_and_remove_last() {
        let mut array: DynamicArray<u32> = (1..=4).collect();

        assert_eq!(array.pop(), Some(4));
        array.remove_last();

        assert_eq!(array.as_slice(), &[1, 2]);
        assert_eq!(array.capacity(), 4);

        array.remove_last();
        array.remove_last();

        assert_eq!(array.pop(), None);
    }

    #[test]
    #[should_panic]
    fn remove_last_on_empty_panics() {
        let mut array = DynamicArray::<u32>::new();

        array.remove_last();
    }

    #[test]
    fn insert_within_capacity() {
        let mut array = DynamicArray::<u32>::new();
        array.reserve(8);
        array.extend([1, 2, 3, 4]);

        *array.insert(0, 10) += 1;
        array.insert(3, 20);
        array.insert(6, 30);

        assert_eq!(array.as_slice(), &[11, 1, 2, 20, 3, 4, 30]);
        assert_eq!(array.capacity(), 8);
    }

    #[test]
    fn insert_with_growth() {
        let mut array: DynamicArray<u32> = (1..=4).collect();
        assert_eq!(array.capacity(), 4);

        let inserted = array.insert(2, 99);
        assert_eq!(*inserted, 99);

        assert_eq!(array.as_slice(), &[1, 2, 99, 3, 4]);
        assert_eq!(array.capacity(), 8);
    }

    #[test]
    fn insert_into_empty_allocates_one_slot() {
        let mut array = DynamicArray::<u32>::new();

        array.insert(0, 7);

        assert_eq!(array.as_slice(), &[7]);
        assert_eq!(array.capacity(), 1);
    }

    #[test]
    #[should_panic]
    fn insert_out_of_bounds_panics() {
        let mut array: DynamicArray<u32> = (1..=2).collect();

        array.insert(3, 0);
    }

    #[test]
    fn insert_with_panic_leaves_array_unchanged() {
        let mut array: DynamicArray<String> = ["a", "b"].into_iter().map(String::from).collect();
        array.reserve(4);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            array.insert_with(1, || panic!("construction failed"));
        }));

        assert!(result.is_err());
        assert_eq!(array.as_slice(), &["a", "b"]);
    }

    #[test]
    fn erase_shifts_left() {
        let mut array: DynamicArray<String> =
            ["a", "b", "c", "d"].into_iter().map(String::from).collect();

        assert_eq!(array.erase(1), 1);
        assert_eq!(array.as_slice(), &["a", "c", "d"]);

        assert_eq!(array.erase(2), 2);
        assert_eq!(array.as_slice(), &["a", "c"]);
        assert_eq!(array.len(), 2);
    }

    #[test]
    #[should_panic]
    fn erase_out_of_bounds_panics() {
        let mut array: DynamicArray<u32> = (1..=2).collect();

        array.erase(2);
    }

    #[test]
    fn remove_returns_value() {
        let mut array: DynamicArray<String> =
            ["a", "b", "c"].into_iter().map(String::from).collect();

        assert_eq!(array.remove(0), "a");
        assert_eq!(array.remove(1), "c");
        assert_eq!(array.as_slice(), &["b"]);
    }

    #[test]
    fn reserve_is_exact_and_preserves_order() {
        let mut array: DynamicArray<u32> = (1..=3).collect();

        array.reserve(2);
        assert_eq!(array.capacity(), 4);

        array.reserve(10);
        assert_eq!(array.capacity(), 10);
        assert_eq!(array.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn try_reserve_overflow_leaves_array_unchanged() {
        let mut array: DynamicArray<u64> = (1..=3).collect();

        let result = array.try_reserve(usize::MAX);

        assert_eq!(
            result,
            Err(Error::CapacityOverflow {
                requested: usize::MAX
            })
        );
        assert_eq!(array.as_slice(), &[1, 2, 3]);
        assert_eq!(array.capacity(), 4);
    }

    #[test]
    #[should_panic]
    fn reserve_overflow_panics() {
        let mut array = DynamicArray::<u64>::new();

        array.reserve(usize::MAX);
    }

    #[test]
    fn resize_grows_and_shrinks() {
        let mut array: DynamicArray<u32> = (1..=3).collect();

        array.resize(5);
        assert_eq!(array.as_slice(), &[1, 2, 3, 0, 0]);
        assert_eq!(array.capacity(), 5);

        array.resize(5);
        assert_eq!(array.as_slice(), &[1, 2, 3, 0, 0]);

        array.resize(2);
        assert_eq!(array.as_slice(), &[1, 2]);
        assert_eq!(array.capacity(), 5);
    }

    #[test]
    fn resize_default_panic_rolls_back() {
        thread_local! {
            static DEFAULTS_LEFT: Cell<u32> = const { Cell::new(u32::MAX) };
        }

        #[derive(Debug, PartialEq)]
        struct Fragile(u32);

        impl Default for Fragile {
            fn default() -> Self {
                let left = DEFAULTS_LEFT.get();
                assert!(left > 0, "default budget exhausted");
                DEFAULTS_LEFT.set(left - 1);
                Self(0)
            }
        }

        let mut array = DynamicArray::<Fragile>::new();
        array.push(Fragile(1));

        DEFAULTS_LEFT.set(2);

        let result = panic::catch_unwind(AssertUnwindSafe(|| array.resize(5)));

        assert!(result.is_err());
        assert_eq!(array.as_slice(), &[Fragile(1)]);
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut source: DynamicArray<u32> = (1..=3).collect();

        let target = source.take();

        assert_eq!(target.as_slice(), &[1, 2, 3]);
        assert!(source.is_empty());
        assert_eq!(source.capacity(), 0);
    }

    #[test]
    fn swap_exchanges_contents() {
        let mut a: DynamicArray<u32> = (1..=3).collect();
        let mut b: DynamicArray<u32> = (7..=8).collect();

        a.swap(&mut b);

        assert_eq!(a.as_slice(), &[7, 8]);
        assert_eq!(b.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn clone_is_exact_and_independent() {
        let mut original: DynamicArray<String> =
            ["a", "b", "c"].into_iter().map(String::from).collect();

        let mut copy = original.clone();
        assert_eq!(copy, original);
        assert_eq!(copy.capacity(), 3);

        copy[0].push('!');
        copy.push("d".to_string());
        original.erase(2);

        assert_eq!(original.as_slice(), &["a", "b"]);
        assert_eq!(copy.as_slice(), &["a!", "b", "c", "d"]);
    }

    #[test]
    fn clone_from_reuses_storage_when_it_fits() {
        let source: DynamicArray<u32> = (1..=3).collect();

        let mut shorter: DynamicArray<u32> = (10..=11).collect();
        shorter.reserve(8);
        let shorter_ptr = shorter.as_ptr();
        shorter.clone_from(&source);
        assert_eq!(shorter.as_slice(), &[1, 2, 3]);
        assert_eq!(shorter.as_ptr(), shorter_ptr);

        let mut longer: DynamicArray<u32> = (10..=15).collect();
        let longer_ptr = longer.as_ptr();
        longer.clone_from(&source);
        assert_eq!(longer.as_slice(), &[1, 2, 3]);
        assert_eq!(longer.as_ptr(), longer_ptr);
    }

    #[test]
    fn clone_from_allocates_when_too_small() {
        let source: DynamicArray<u32> = (1..=5).collect();
        let mut target: DynamicArray<u32> = (10..=11).collect();

        target.clone_from(&source);

        assert_eq!(target.as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(target.capacity(), 5);
    }

    #[test]
    fn move_strategy_growth_never_clones() {
        let ledger = Rc::new(Ledger::default());
        let mut array = DynamicArray::<Counted, MoveElements>::new();

        for value in 0..10 {
            array.push(Counted::new(value, &ledger));
        }
        array.insert(3, Counted::new(100, &ledger));
        array.reserve(64);

        assert_eq!(ledger.clones.get(), 0);
        assert_eq!(ledger.live.get(), 11);

        drop(array);
        assert_eq!(ledger.live.get(), 0);
    }

    #[test]
    fn copy_strategy_growth_clones_every_element() {
        let ledger = Rc::new(Ledger::default());
        let mut array = DynamicArray::<Counted, CopyElements>::new();

        array.push(Counted::new(1, &ledger));
        array.push(Counted::new(2, &ledger));
        assert_eq!(ledger.clones.get(), 1);

        // Full at capacity 2, so this grows and clones both existing elements.
        array.insert(1, Counted::new(3, &ledger));
        assert_eq!(ledger.clones.get(), 3);
        assert_eq!(values(&array), [1, 3, 2]);

        // Originals were dropped after the transplant.
        assert_eq!(ledger.live.get(), 3);

        drop(array);
        assert_eq!(ledger.live.get(), 0);
    }

    #[test]
    fn copy_strategy_growth_panic_is_strongly_safe() {
        let ledger = Rc::new(Ledger::default());
        let mut array = DynamicArray::<Counted, CopyElements>::new();
        array.reserve(4);

        for value in 1..=4 {
            array.push(Counted::new(value, &ledger));
        }

        let before_ptr = array.as_ptr();
        ledger.clone_budget.set(Some(2));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            array.push(Counted::new(5, &ledger));
        }));

        assert!(result.is_err());
        assert_eq!(values(&array), [1, 2, 3, 4]);
        assert_eq!(array.capacity(), 4);
        assert_eq!(array.as_ptr(), before_ptr);
        assert_eq!(ledger.live.get(), 4);

        ledger.clone_budget.set(None);
        drop(array);
        assert_eq!(ledger.live.get(), 0);
    }

    #[test]
    fn copy_strategy_insert_growth_panic_is_strongly_safe() {
        let ledger = Rc::new(Ledger::default());
        let mut array = DynamicArray::<Counted, CopyElements>::new();
        array.reserve(3);

        for value in 1..=3 {
            array.push(Counted::new(value, &ledger));
        }

        // The prefix clone succeeds, the suffix clone fails.
        ledger.clone_budget.set(Some(1));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            array.insert(1, Counted::new(9, &ledger));
        }));

        assert!(result.is_err());
        assert_eq!(values(&array), [1, 2, 3]);
        assert_eq!(ledger.live.get(), 3);
    }

    #[test]
    fn copy_strategy_growth_keeps_new_elements_if_original_drop_panics() {
        let ledger = Rc::new(Ledger::default());
        let mut array = DynamicArray::<Counted, CopyElements>::new();
        array.reserve(2);
        array.push(Counted::new(1, &ledger));
        array.push(Counted::new(2, &ledger));

        // The first original to be destroyed after the clones are committed panics.
        ledger.panicking_drops.set(1);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            array.insert(0, Counted::new(9, &ledger));
        }));

        assert!(result.is_err());
        assert_eq!(ledger.panicking_drops.get(), 0);

        // The grown array is fully committed and both originals are gone.
        assert_eq!(array.len(), 3);
        assert_eq!(array.capacity(), 4);
        assert_eq!(values(&array), [9, 1, 2]);
        assert_eq!(ledger.live.get(), 3);

        drop(array);
        assert_eq!(ledger.live.get(), 0);
    }

    #[test]
    fn copy_strategy_reserve_keeps_elements_if_original_drop_panics() {
        let ledger = Rc::new(Ledger::default());
        let mut array = DynamicArray::<Counted, CopyElements>::new();
        array.reserve(2);
        array.push(Counted::new(1, &ledger));
        array.push(Counted::new(2, &ledger));

        ledger.panicking_drops.set(1);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            array.reserve(8);
        }));

        assert!(result.is_err());
        assert_eq!(array.capacity(), 8);
        assert_eq!(values(&array), [1, 2]);
        assert_eq!(ledger.live.get(), 2);
    }

    #[test]
    fn copy_strategy_in_place_insert_and_erase() {
        let ledger = Rc::new(Ledger::default());
        let mut array = DynamicArray::<Counted, CopyElements>::new();
        array.reserve(8);

        for value in 1..=4 {
            array.push(Counted::new(value, &ledger));
        }

        array.insert(1, Counted::new(9, &ledger));
        assert_eq!(values(&array), [1, 9, 2, 3, 4]);

        array.erase(0);
        assert_eq!(values(&array), [9, 2, 3, 4]);
        assert_eq!(ledger.live.get(), 4);
        assert_eq!(array.capacity(), 8);

        drop(array);
        assert_eq!(ledger.live.get(), 0);
    }

    #[test]
    fn debug_lists_elements() {
        let array: DynamicArray<u32> = (1..=3).collect();

        assert_eq!(format!("{array:?}"), "[1, 2, 3]");
    }

    #[test]
    fn iterates_by_reference() {
        let mut array: DynamicArray<u32> = (1..=3).collect();

        for value in &mut array {
            *value *= 10;
        }

        let mut seen = Vec::new();
        for value in &array {
            seen.push(*value);
        }

        assert_eq!(seen, [10, 20, 30]);
    }

    #[test]
    fn zero_sized_elements() {
        let mut array = DynamicArray::<()>::new();

        for _ in 0..100 {
            array.push(());
        }
        array.insert(50, ());
        array.erase(0);

        assert_eq!(array.len(), 100);
        assert_eq!(array.pop(), Some(()));
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut array: DynamicArray<String> =
            ["a", "b"].into_iter().map(String::from).collect();

        array.clear();

        assert!(array.is_empty());
        assert_eq!(array.capacity(), 2);
    }
}
