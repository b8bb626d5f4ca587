use std::marker::PhantomData;

use crate::{DynamicArray, MoveElements, RawStorage, Result, Transplant};

/// Builder for creating an instance of [`DynamicArray`].
///
/// All settings are optional. Without any settings the builder produces the same empty,
/// unallocated array as [`DynamicArray::new()`].
///
/// # Examples
///
/// ```
/// use dynamic_array::{CopyElements, DynamicArray};
///
/// let array = DynamicArray::<String, CopyElements>::builder()
///     .capacity(8)
///     .build();
///
/// assert_eq!(array.capacity(), 8);
/// ```
#[derive(Debug)]
#[must_use]
pub struct DynamicArrayBuilder<T, S = MoveElements> {
    capacity: usize,

    _array: PhantomData<fn() -> DynamicArray<T, S>>,
}

impl<T, S: Transplant<T>> DynamicArrayBuilder<T, S> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            capacity: 0,
            _array: PhantomData,
        }
    }

    /// Sets the number of slots to allocate up front. The array starts out empty either way.
    #[inline]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builds the array with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the requested capacity cannot be allocated.
    #[must_use]
    #[inline]
    pub fn build(self) -> DynamicArray<T, S> {
        DynamicArray::from_storage(RawStorage::allocate(self.capacity))
    }

    /// Builds the array with the specified configuration, returning an error if the requested
    /// capacity cannot be allocated.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`][crate::Error] if the storage block cannot be allocated.
    #[inline]
    pub fn try_build(self) -> Result<DynamicArray<T, S>> {
        Ok(DynamicArray::from_storage(RawStorage::try_allocate(
            self.capacity,
        )?))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::rc::Rc;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{CopyElements, Error};

    // The builder holds no elements, so it is Send and Sync regardless of the element type.
    assert_impl_all!(DynamicArrayBuilder<Rc<u32>>: Send, Sync);

    #[test]
    fn default_builder_does_not_allocate() {
        let array = DynamicArray::<u32>::builder().build();

        assert!(array.is_empty());
        assert_eq!(array.capacity(), 0);
    }

    #[test]
    fn capacity_is_preallocated() {
        let mut array = DynamicArray::<u32, CopyElements>::builder()
            .capacity(4)
            .build();

        assert!(array.is_empty());
        assert_eq!(array.capacity(), 4);

        for value in 0..4 {
            array.push(value);
        }

        assert_eq!(array.capacity(), 4);
    }

    #[test]
    fn try_build_reports_overflow() {
        let result = DynamicArray::<u64>::builder().capacity(usize::MAX).try_build();

        assert_eq!(
            result.unwrap_err(),
            Error::CapacityOverflow {
                requested: usize::MAX
            }
        );
    }

    #[test]
    #[should_panic]
    fn build_panics_on_overflow() {
        drop(DynamicArray::<u64>::builder().capacity(usize::MAX).build());
    }
}
