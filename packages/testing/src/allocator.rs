//! Allocation wrapper for counting allocations and injecting allocation failures.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::fmt;
use std::ptr;
use std::thread::LocalKey;

thread_local! {
    static ALLOCATIONS: Cell<u64> = const { Cell::new(0) };
    static DEALLOCATIONS: Cell<u64> = const { Cell::new(0) };
    static FAIL_NEXT_ALLOCATION: Cell<bool> = const { Cell::new(false) };
}

/// A snapshot of the allocation counters of the current thread.
///
/// Take one snapshot before and one after the code under test and use
/// [`since()`][Self::since] to get the activity in between.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct AllocationCounts {
    /// Number of allocations. A reallocation counts as one allocation and one deallocation.
    pub allocations: u64,

    /// Number of deallocations.
    pub deallocations: u64,
}

impl AllocationCounts {
    /// Returns the counters of the current thread.
    #[must_use]
    pub fn current() -> Self {
        Self {
            allocations: ALLOCATIONS.get(),
            deallocations: DEALLOCATIONS.get(),
        }
    }

    /// Returns the activity between an `earlier` snapshot and this one.
    #[must_use]
    pub fn since(self, earlier: Self) -> Self {
        Self {
            allocations: self.allocations.wrapping_sub(earlier.allocations),
            deallocations: self.deallocations.wrapping_sub(earlier.deallocations),
        }
    }
}

/// Makes the next allocation on the current thread fail by returning a null pointer.
///
/// The flag resets itself once it has been consumed. Use [`clear_allocation_failure()`] to
/// reset it if the code under test ended up not allocating at all.
pub fn fail_next_allocation() {
    FAIL_NEXT_ALLOCATION.set(true);
}

/// Resets the flag set by [`fail_next_allocation()`].
pub fn clear_allocation_failure() {
    FAIL_NEXT_ALLOCATION.set(false);
}

/// A memory allocator that counts the allocations and deallocations of each thread and can
/// be told to fail the next allocation of a thread.
///
/// # Examples
///
/// ```rust
/// use testing::CountingAllocator;
///
/// #[global_allocator]
/// static ALLOCATOR: CountingAllocator<std::alloc::System> = CountingAllocator::system();
/// ```
pub struct CountingAllocator<A: GlobalAlloc> {
    inner: A,
}

impl<A: GlobalAlloc> fmt::Debug for CountingAllocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingAllocator")
            .field("inner", &"<allocator>")
            .finish()
    }
}

impl CountingAllocator<System> {
    /// Creates a counting allocator on top of the system allocator.
    #[must_use]
    #[inline]
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A: GlobalAlloc> CountingAllocator<A> {
    /// Creates a counting allocator on top of the provided allocator.
    #[must_use]
    #[inline]
    pub const fn new(allocator: A) -> Self {
        Self { inner: allocator }
    }
}

/// Returns `true` if the current allocation is to be rejected, consuming the flag.
fn take_injected_failure() -> bool {
    FAIL_NEXT_ALLOCATION.replace(false)
}

fn count(counter: &'static LocalKey<Cell<u64>>) {
    counter.set(counter.get().wrapping_add(1));
}

// SAFETY: We delegate all allocation operations to the underlying allocator, which already
// implements GlobalAlloc safely. Returning null is a valid way to report allocation failure.
unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAllocator<A> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if take_injected_failure() {
            return ptr::null_mut();
        }

        count(&ALLOCATIONS);

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        unsafe { self.inner.alloc(layout) }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        count(&DEALLOCATIONS);

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if take_injected_failure() {
            return ptr::null_mut();
        }

        count(&ALLOCATIONS);

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        unsafe { self.inner.alloc_zeroed(layout) }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if take_injected_failure() {
            return ptr::null_mut();
        }

        // A reallocation releases the old block and acquires a new one.
        count(&ALLOCATIONS);
        count(&DEALLOCATIONS);

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        unsafe { self.inner.realloc(ptr, layout, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(CountingAllocator<System>: Send, Sync);

    #[test]
    fn since_subtracts_counters() {
        let earlier = AllocationCounts {
            allocations: 3,
            deallocations: 1,
        };
        let later = AllocationCounts {
            allocations: 5,
            deallocations: 4,
        };

        assert_eq!(
            later.since(earlier),
            AllocationCounts {
                allocations: 2,
                deallocations: 3
            }
        );
    }

    #[test]
    fn injected_failure_is_consumed_once() {
        fail_next_allocation();

        assert!(take_injected_failure());
        assert!(!take_injected_failure());
    }

    #[test]
    fn injected_failure_can_be_cleared() {
        fail_next_allocation();
        clear_allocation_failure();

        assert!(!take_injected_failure());
    }

    #[test]
    fn wrapped_allocator_returns_null_when_failing() {
        let allocator = CountingAllocator::system();
        let layout = Layout::new::<u64>();

        fail_next_allocation();

        // SAFETY: The layout has a non-zero size.
        let rejected = unsafe { allocator.alloc(layout) };
        assert!(rejected.is_null());

        // SAFETY: The layout has a non-zero size.
        let accepted = unsafe { allocator.alloc(layout) };
        assert!(!accepted.is_null());

        // SAFETY: The pointer was allocated above with the same allocator and layout.
        unsafe {
            allocator.dealloc(accepted, layout);
        }
    }
}
