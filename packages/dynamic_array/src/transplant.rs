//! Strategies for carrying elements from one slot to another.
//!
//! A [`DynamicArray`][crate::DynamicArray] moves its elements around in two situations:
//!
//! * When it grows, every element is transplanted from the old storage block into a new one.
//! * When an element is inserted or erased in the middle, the elements behind it are shifted
//!   one slot to the right or left within the same block.
//!
//! The strategy is a type parameter of the array, so the choice is made at compile time:
//!
//! * [`MoveElements`] (the default) relocates elements bitwise. A Rust move cannot fail, so a
//!   transplant can never stop halfway. This works for every element type, including types
//!   that cannot be cloned at all.
//! * [`CopyElements`] clones elements into their new slots and only destroys the originals once
//!   every clone has succeeded. If a clone panics midway, the partially built destination is
//!   torn down and the original block is left untouched. This strategy is only available for
//!   `T: Clone`, so a type that cannot be copied can only ever be moved.

use std::mem;
use std::ptr::{self, NonNull};

use scopeguard::ScopeGuard;

mod sealed {
    #[allow(
        unnameable_types,
        unreachable_pub,
        reason = "supertrait that keeps other crates from implementing Transplant"
    )]
    pub trait Sealed {}
}

/// Compile-time choice of how a [`DynamicArray`][crate::DynamicArray] carries its elements
/// between slots. See the [module documentation][self] for the available strategies.
///
/// This trait is sealed. The methods are implementation details of the array.
pub trait Transplant<T>: sealed::Sealed {
    /// Name of the strategy, as reported in trace events.
    const NAME: &'static str;

    /// `true` if the strategy consumes the source elements (bitwise move), `false` if the
    /// source elements remain live after being transplanted (clone).
    const MOVES: bool;

    /// Constructs `count` elements starting at `target` from the `count` elements starting
    /// at `source`.
    ///
    /// If this panics, no element remains constructed in the target range and the source
    /// range is untouched.
    ///
    /// # Safety
    ///
    /// The source range must hold live elements, the target range must be uninitialized and
    /// valid for writes, and the two ranges must not overlap. If [`Self::MOVES`] is `true`,
    /// the source range is logically uninitialized when this returns.
    #[doc(hidden)]
    unsafe fn transplant(source: NonNull<T>, target: NonNull<T>, count: usize);

    /// Ends the lifetime of source elements after a transplant has been committed.
    ///
    /// # Safety
    ///
    /// The range must be the source range of a completed [`transplant()`](Self::transplant)
    /// call and must not be used afterwards.
    #[doc(hidden)]
    unsafe fn retire(source: NonNull<T>, count: usize);

    /// Inserts `value` at `position` in the block starting at `base` that currently holds
    /// `*len` live elements, shifting `[position, *len)` one slot to the right and updating
    /// `*len` once the element is in place.
    ///
    /// # Safety
    ///
    /// `position < *len` and the block must have room for at least `*len + 1` elements.
    #[doc(hidden)]
    unsafe fn insert_within(base: NonNull<T>, len: &mut usize, position: usize, value: T);

    /// Erases the element at `position` in the block starting at `base` that currently holds
    /// `*len` live elements, shifting `(position, *len)` one slot to the left and updating
    /// `*len` before the vacated last slot is destroyed.
    ///
    /// # Safety
    ///
    /// `position < *len`.
    #[doc(hidden)]
    unsafe fn erase_within(base: NonNull<T>, len: &mut usize, position: usize);
}

/// Transplants elements by moving them bitwise. Cannot fail and works for every element type.
///
/// This is the default strategy of [`DynamicArray`][crate::DynamicArray].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MoveElements;

impl sealed::Sealed for MoveElements {}

impl<T> Transplant<T> for MoveElements {
    const NAME: &'static str = "move";
    const MOVES: bool = true;

    unsafe fn transplant(source: NonNull<T>, target: NonNull<T>, count: usize) {
        // SAFETY: Forwarding the caller's guarantees: valid, non-overlapping ranges of `count`
        // elements. The source range becomes logically uninitialized, as documented.
        unsafe {
            ptr::copy_nonoverlapping(source.as_ptr(), target.as_ptr(), count);
        }
    }

    unsafe fn retire(_source: NonNull<T>, _count: usize) {
        // The elements were moved out, there is nothing left to destroy.
    }

    unsafe fn insert_within(base: NonNull<T>, len: &mut usize, position: usize, value: T) {
        // Cannot underflow because the caller guarantees position < *len.
        let tail_len = len.wrapping_sub(position);

        // SAFETY: The caller guarantees position < *len and room for *len + 1 elements, so
        // both the gap and the shifted tail are inside the block.
        let gap = unsafe { base.add(position) };

        // SAFETY: See above. One past the gap is at most *len, within capacity.
        let behind_gap = unsafe { gap.add(1) };

        // Extend the tail by one and shift everything behind the gap to the right in one go.
        // SAFETY: Both ranges are inside the block; ptr::copy handles the overlap.
        unsafe {
            ptr::copy(gap.as_ptr(), behind_gap.as_ptr(), tail_len);
        }

        // The gap now holds a moved-from bit pattern, so we write instead of assigning.
        // SAFETY: The gap is inside the block and logically uninitialized.
        unsafe {
            gap.write(value);
        }

        // Cannot overflow because that would imply the block extends beyond virtual memory.
        *len = len.wrapping_add(1);
    }

    unsafe fn erase_within(base: NonNull<T>, len: &mut usize, position: usize) {
        // SAFETY: The caller guarantees position < *len.
        let erased_slot = unsafe { base.add(position) };

        // SAFETY: The slot holds a live element, which we take ownership of.
        let erased = unsafe { erased_slot.read() };

        // Cannot underflow because the caller guarantees position < *len.
        let tail_len = len.wrapping_sub(position).wrapping_sub(1);

        // SAFETY: position + 1 <= *len, so this is at most one past the last live element.
        let behind = unsafe { erased_slot.add(1) };

        // SAFETY: Both ranges are inside the live range of the block; ptr::copy handles the
        // overlap.
        unsafe {
            ptr::copy(behind.as_ptr(), erased_slot.as_ptr(), tail_len);
        }

        // Cannot underflow because the caller guarantees position < *len.
        *len = len.wrapping_sub(1);

        // The length is already consistent, so a panicking destructor cannot cause a double drop.
        drop(erased);
    }
}

/// Transplants elements by cloning them, keeping the originals intact until every clone has
/// succeeded.
///
/// Use this strategy for element types whose values must be re-created through [`Clone`]
/// when they change slots. A panic while cloning during growth leaves the array exactly as it
/// was before the operation.
///
/// In-place shifts (inserting or erasing in the middle without growing) assign clones over
/// existing elements. If a clone panics during such a shift, every slot still holds a live
/// element and the length is unchanged, but some elements in the shifted range may have been
/// overwritten with clones of their neighbors.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CopyElements;

impl sealed::Sealed for CopyElements {}

impl<T: Clone> Transplant<T> for CopyElements {
    const NAME: &'static str = "copy";
    const MOVES: bool = false;

    unsafe fn transplant(source: NonNull<T>, target: NonNull<T>, count: usize) {
        // If a clone panics, destroy the clones we already made. The source is untouched.
        let mut cloned = scopeguard::guard(0_usize, |cloned| {
            // SAFETY: Exactly the first `cloned` target slots were initialized below.
            unsafe {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(target.as_ptr(), cloned));
            }
        });

        for index in 0..count {
            // SAFETY: The caller guarantees `count` live source elements.
            let source_slot = unsafe { source.add(index) };

            // SAFETY: The slot holds a live element that nobody mutates while we clone it.
            let value = unsafe { source_slot.as_ref() }.clone();

            // SAFETY: The caller guarantees `count` uninitialized target slots.
            let target_slot = unsafe { target.add(index) };

            // SAFETY: See above. The slot is uninitialized.
            unsafe {
                target_slot.write(value);
            }

            // Cannot overflow because index < count.
            *cloned = cloned.wrapping_add(1);
        }

        ScopeGuard::into_inner(cloned);
    }

    unsafe fn retire(source: NonNull<T>, count: usize) {
        // SAFETY: The caller guarantees these are the still-live originals of a completed
        // transplant that nobody will use again.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(source.as_ptr(), count));
        }
    }

    unsafe fn insert_within(base: NonNull<T>, len: &mut usize, position: usize, value: T) {
        let old_len = *len;

        // Cannot underflow because the caller guarantees position < *len, so *len > 0.
        let last = old_len.wrapping_sub(1);

        // SAFETY: last < *len, so the slot is inside the block.
        let last_slot = unsafe { base.add(last) };

        // SAFETY: The slot holds a live element.
        let last_value = unsafe { last_slot.as_ref() }.clone();

        // SAFETY: The caller guarantees room for *len + 1 elements, so slot *len is inside
        // the block and uninitialized.
        let tail = unsafe { base.add(old_len) };

        // SAFETY: See above.
        unsafe {
            tail.write(last_value);
        }

        // The extended tail is not covered by the length yet, so destroy it if a later clone
        // panics. The shifted range stays live either way.
        let tail_guard = scopeguard::guard(tail, |tail| {
            // SAFETY: We initialized the tail slot above and nobody else owns it.
            unsafe {
                tail.drop_in_place();
            }
        });

        // Shift [position, last) one slot to the right, back to front.
        let mut index = last;
        while index > position {
            // Cannot underflow because index > position >= 0.
            let previous = index.wrapping_sub(1);

            // SAFETY: Both slots are below *len and hold live elements, and they are distinct.
            unsafe {
                clone_between_slots(base, previous, index);
            }

            index = previous;
        }

        // The target slot still holds a live (shifted-from) element, so it is assigned rather
        // than constructed. We keep the replaced value until the length is consistent.
        // SAFETY: position < *len, so the slot is inside the block.
        let mut target = unsafe { base.add(position) };

        // SAFETY: The slot holds a live element and nobody else references it.
        let assignee = unsafe { target.as_mut() };

        let replaced = mem::replace(assignee, value);

        ScopeGuard::into_inner(tail_guard);

        // Cannot overflow because that would imply the block extends beyond virtual memory.
        *len = old_len.wrapping_add(1);

        drop(replaced);
    }

    unsafe fn erase_within(base: NonNull<T>, len: &mut usize, position: usize) {
        // Cannot underflow because the caller guarantees position < *len.
        let last = len.wrapping_sub(1);

        // Shift (position, *len) one slot to the left, front to back.
        for index in position..last {
            // Cannot overflow because index < last.
            let next = index.wrapping_add(1);

            // SAFETY: Both slots are below *len and hold live elements, and they are distinct.
            unsafe {
                clone_between_slots(base, next, index);
            }
        }

        *len = last;

        // SAFETY: last < the original length, so the slot is inside the block.
        let vacated = unsafe { base.add(last) };

        // SAFETY: The slot was live and is no longer covered by the length.
        unsafe {
            vacated.drop_in_place();
        }
    }
}

/// Assigns a clone of the element at `source` to the element at `target`, both indexes
/// relative to `base`.
///
/// # Safety
///
/// Both slots must hold live elements and `source != target`.
unsafe fn clone_between_slots<T: Clone>(base: NonNull<T>, source: usize, target: usize) {
    debug_assert_ne!(source, target);

    // SAFETY: The caller guarantees a live element at `source`.
    let source_slot = unsafe { base.add(source) };

    // SAFETY: The caller guarantees a live element at `target`.
    let mut target_slot = unsafe { base.add(target) };

    // SAFETY: The slot holds a live element. It is distinct from the target, so the shared
    // reference does not alias the exclusive one below.
    let original = unsafe { source_slot.as_ref() };

    // SAFETY: The slot holds a live element that nobody else references.
    let assignee = unsafe { target_slot.as_mut() };

    assignee.clone_from(original);
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    use super::*;
    use crate::RawStorage;

    /// Clones successfully until the shared budget runs out, then panics.
    #[derive(Debug)]
    struct Budgeted {
        value: u32,
        budget: Rc<Cell<u32>>,
        live: Rc<Cell<i32>>,
    }

    impl Budgeted {
        fn new(value: u32, budget: &Rc<Cell<u32>>, live: &Rc<Cell<i32>>) -> Self {
            live.set(live.get() + 1);

            Self {
                value,
                budget: Rc::clone(budget),
                live: Rc::clone(live),
            }
        }
    }

    impl Clone for Budgeted {
        fn clone(&self) -> Self {
            let remaining = self.budget.get();
            assert!(remaining > 0, "clone budget exhausted");
            self.budget.set(remaining - 1);

            Self::new(self.value, &self.budget, &self.live)
        }
    }

    impl Drop for Budgeted {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    fn fill(
        storage: &RawStorage<Budgeted>,
        values: &[u32],
        budget: &Rc<Cell<u32>>,
        live: &Rc<Cell<i32>>,
    ) {
        for (index, value) in values.iter().enumerate() {
            unsafe {
                storage.slot(index).write(Budgeted::new(*value, budget, live));
            }
        }
    }

    fn values(storage: &RawStorage<Budgeted>, len: usize) -> Vec<u32> {
        (0..len)
            .map(|index| unsafe { storage.slot(index).as_ref() }.value)
            .collect()
    }

    fn destroy(storage: &RawStorage<Budgeted>, len: usize) {
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(storage.as_ptr().as_ptr(), len));
        }
    }

    #[test]
    fn move_transplant_relocates_everything() {
        let source = RawStorage::<String>::allocate(3);
        let target = RawStorage::<String>::allocate(3);

        unsafe {
            source.slot(0).write("a".to_string());
            source.slot(1).write("b".to_string());
            source.slot(2).write("c".to_string());

            MoveElements::transplant(source.as_ptr(), target.as_ptr(), 3);
            <MoveElements as Transplant<String>>::retire(source.as_ptr(), 3);

            assert_eq!(target.slot(0).as_ref(), "a");
            assert_eq!(target.slot(1).as_ref(), "b");
            assert_eq!(target.slot(2).as_ref(), "c");

            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(target.as_ptr().as_ptr(), 3));
        }
    }

    #[test]
    fn copy_transplant_keeps_originals_until_retired() {
        let budget = Rc::new(Cell::new(u32::MAX));
        let live = Rc::new(Cell::new(0));

        let source = RawStorage::<Budgeted>::allocate(3);
        let target = RawStorage::<Budgeted>::allocate(3);
        fill(&source, &[1, 2, 3], &budget, &live);

        unsafe {
            CopyElements::transplant(source.as_ptr(), target.as_ptr(), 3);
        }

        assert_eq!(live.get(), 6);
        assert_eq!(values(&source, 3), [1, 2, 3]);
        assert_eq!(values(&target, 3), [1, 2, 3]);

        unsafe {
            <CopyElements as Transplant<Budgeted>>::retire(source.as_ptr(), 3);
        }

        assert_eq!(live.get(), 3);

        destroy(&target, 3);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn copy_transplant_panic_tears_down_partial_target() {
        let budget = Rc::new(Cell::new(2));
        let live = Rc::new(Cell::new(0));

        let source = RawStorage::<Budgeted>::allocate(4);
        let target = RawStorage::<Budgeted>::allocate(4);
        fill(&source, &[1, 2, 3, 4], &budget, &live);

        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            CopyElements::transplant(source.as_ptr(), target.as_ptr(), 4);
        }));

        assert!(result.is_err());

        // The two successful clones were destroyed again, the originals are intact.
        assert_eq!(live.get(), 4);
        assert_eq!(values(&source, 4), [1, 2, 3, 4]);

        destroy(&source, 4);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn move_insert_within_shifts_right() {
        let storage = RawStorage::<u32>::allocate(5);
        let mut len = 0;

        for value in [10, 20, 30, 40] {
            unsafe { storage.slot(len).write(value) };
            len += 1;
        }

        unsafe {
            MoveElements::insert_within(storage.as_ptr(), &mut len, 1, 15);
        }

        assert_eq!(len, 5);
        let contents: Vec<u32> = (0..len).map(|i| unsafe { storage.slot(i).read() }).collect();
        assert_eq!(contents, [10, 15, 20, 30, 40]);
    }

    #[test]
    fn move_erase_within_shifts_left() {
        let storage = RawStorage::<String>::allocate(3);
        let mut len = 3;

        unsafe {
            storage.slot(0).write("a".to_string());
            storage.slot(1).write("b".to_string());
            storage.slot(2).write("c".to_string());

            MoveElements::erase_within(storage.as_ptr(), &mut len, 0);

            assert_eq!(len, 2);
            assert_eq!(storage.slot(0).as_ref(), "b");
            assert_eq!(storage.slot(1).as_ref(), "c");

            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(storage.as_ptr().as_ptr(), len));
        }
    }

    #[test]
    fn copy_insert_within_shifts_right() {
        let budget = Rc::new(Cell::new(u32::MAX));
        let live = Rc::new(Cell::new(0));

        let storage = RawStorage::<Budgeted>::allocate(4);
        fill(&storage, &[1, 2, 3], &budget, &live);
        let mut len = 3;

        let value = Budgeted::new(9, &budget, &live);
        unsafe {
            CopyElements::insert_within(storage.as_ptr(), &mut len, 0, value);
        }

        assert_eq!(len, 4);
        assert_eq!(values(&storage, len), [9, 1, 2, 3]);
        assert_eq!(live.get(), 4);

        destroy(&storage, len);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn copy_insert_within_panic_keeps_length_and_destroys_tail() {
        // The tail clone succeeds, then the first shifting clone panics.
        let budget = Rc::new(Cell::new(u32::MAX));
        let live = Rc::new(Cell::new(0));

        let storage = RawStorage::<Budgeted>::allocate(4);
        fill(&storage, &[1, 2, 3], &budget, &live);
        let mut len = 3;

        let value = Budgeted::new(9, &budget, &live);
        budget.set(1);

        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            CopyElements::insert_within(storage.as_ptr(), &mut len, 0, value);
        }));

        assert!(result.is_err());
        assert_eq!(len, 3);

        // Only the three tracked elements remain alive.
        assert_eq!(live.get(), 3);

        destroy(&storage, len);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn copy_erase_within_shifts_left() {
        let budget = Rc::new(Cell::new(u32::MAX));
        let live = Rc::new(Cell::new(0));

        let storage = RawStorage::<Budgeted>::allocate(4);
        fill(&storage, &[1, 2, 3, 4], &budget, &live);
        let mut len = 4;

        unsafe {
            CopyElements::erase_within(storage.as_ptr(), &mut len, 1);
        }

        assert_eq!(len, 3);
        assert_eq!(values(&storage, len), [1, 3, 4]);
        assert_eq!(live.get(), 3);

        destroy(&storage, len);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn clone_between_slots_assigns_in_both_directions() {
        let budget = Rc::new(Cell::new(u32::MAX));
        let live = Rc::new(Cell::new(0));

        let storage = RawStorage::<Budgeted>::allocate(3);
        fill(&storage, &[1, 2, 3], &budget, &live);

        unsafe {
            clone_between_slots(storage.as_ptr(), 2, 0);
        }
        assert_eq!(values(&storage, 3), [3, 2, 3]);

        unsafe {
            clone_between_slots(storage.as_ptr(), 1, 2);
        }
        assert_eq!(values(&storage, 3), [3, 2, 2]);

        // Assigning replaces the old element, so the population stays the same.
        assert_eq!(live.get(), 3);

        destroy(&storage, 3);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn strategy_constants() {
        assert!(<MoveElements as Transplant<u8>>::MOVES);
        assert!(!<CopyElements as Transplant<u8>>::MOVES);
        assert_eq!(<MoveElements as Transplant<u8>>::NAME, "move");
        assert_eq!(<CopyElements as Transplant<u8>>::NAME, "copy");
    }
}
