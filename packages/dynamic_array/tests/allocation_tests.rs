//! Tests that observe how `dynamic_array` talks to the global allocator.
//!
//! The counting allocator keeps per-thread counters, so each test only sees its own activity.

#![allow(
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]

use std::alloc::System;
use std::panic::{self, AssertUnwindSafe};

use dynamic_array::{CopyElements, DynamicArray, Error, RawStorage};
use testing::{
    AllocationCounts, CountingAllocator, Tracked, TrackedStats, clear_allocation_failure,
    fail_clone_after, fail_next_allocation, reset_tracked,
};

#[global_allocator]
static ALLOCATOR: CountingAllocator<System> = CountingAllocator::system();

fn values(array: &[Tracked]) -> Vec<u32> {
    array.iter().map(Tracked::value).collect()
}

/// Gets the one-time allocations of the panic machinery out of the way, so that they do not
/// show up in the counters of the code under test.
fn warm_up_panic_machinery() {
    let result = panic::catch_unwind(|| panic!("warming up the panic machinery"));
    assert!(result.is_err());
}

/// Performs one storage relocation, so that any one-time setup along that path has happened
/// before the counters of the code under test are sampled.
fn warm_up_relocation() {
    let mut array = DynamicArray::<u8>::new();
    array.push(1);
    array.push(2);
}

#[test]
fn new_and_empty_builder_do_not_allocate() {
    let before = AllocationCounts::current();

    let first = DynamicArray::<u64>::new();
    let second = DynamicArray::<u64>::builder().build();
    let third = DynamicArray::<u64>::with_len(0);
    drop((first, second, third));

    assert_eq!(AllocationCounts::current().since(before).allocations, 0);
}

#[test]
fn reserve_within_capacity_does_not_allocate() {
    let mut array: DynamicArray<u64> = DynamicArray::builder().capacity(8).build();
    array.extend([1, 2, 3]);

    let before = AllocationCounts::current();

    array.reserve(0);
    array.reserve(4);
    array.reserve(8);

    assert_eq!(AllocationCounts::current().since(before).allocations, 0);
}

#[test]
fn reserve_beyond_capacity_reallocates_once() {
    let mut array: DynamicArray<u64> = DynamicArray::builder().capacity(8).build();
    array.extend([1, 2, 3]);
    warm_up_relocation();

    let before = AllocationCounts::current();

    array.reserve(100);

    let delta = AllocationCounts::current().since(before);
    assert_eq!(delta.allocations, 1);
    assert_eq!(delta.deallocations, 1);
    assert_eq!(array.capacity(), 100);
    assert_eq!(array.as_slice(), &[1, 2, 3]);
}

#[test]
fn appends_allocate_logarithmically() {
    let mut array = DynamicArray::<u32>::new();
    warm_up_relocation();

    let before = AllocationCounts::current();

    for value in 0..1024 {
        array.push(value);
    }

    // Capacities 1, 2, 4, ..., 1024.
    assert_eq!(AllocationCounts::current().since(before).allocations, 11);
}

#[test]
fn failed_push_leaves_array_unchanged() {
    reset_tracked();

    let mut array: DynamicArray<Tracked> = (0..4).map(Tracked::new).collect();
    let before_ptr = array.as_ptr();

    fail_next_allocation();
    let result = array.try_push(Tracked::new(4));

    assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    assert_eq!(values(&array), [0, 1, 2, 3]);
    assert_eq!(array.capacity(), 4);
    assert_eq!(array.as_ptr(), before_ptr);

    // The rejected value was dropped.
    assert_eq!(TrackedStats::current().live, 4);
}

#[test]
fn failed_insert_leaves_array_unchanged() {
    let mut array: DynamicArray<u64> = (0..4).collect();

    fail_next_allocation();
    let result = array.try_insert(1, 99);

    assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    assert_eq!(array.as_slice(), &[0, 1, 2, 3]);
}

#[test]
fn failed_reserve_reports_layout() {
    let mut array: DynamicArray<u64> = (0..3).collect();

    fail_next_allocation();
    let result = array.try_reserve(10);

    assert_eq!(
        result,
        Err(Error::OutOfMemory {
            bytes: 80,
            align: 8
        })
    );
    assert_eq!(array.as_slice(), &[0, 1, 2]);
    assert_eq!(array.capacity(), 4);
}

#[test]
fn failed_resize_leaves_array_unchanged() {
    let mut array: DynamicArray<u64> = (0..3).collect();

    fail_next_allocation();
    let result = array.try_resize(10);

    assert!(result.is_err());
    assert_eq!(array.as_slice(), &[0, 1, 2]);
}

#[test]
fn failed_with_len_and_build_report_errors() {
    fail_next_allocation();
    assert!(DynamicArray::<u64>::try_with_len(4).is_err());

    fail_next_allocation();
    assert!(DynamicArray::<u64>::builder().capacity(4).try_build().is_err());

    fail_next_allocation();
    assert!(RawStorage::<u64>::try_allocate(4).is_err());
}

#[test]
fn push_without_growth_does_not_consume_failure() {
    let mut array: DynamicArray<u64> = DynamicArray::builder().capacity(2).build();

    fail_next_allocation();
    let result = array.try_push(1);
    assert!(result.is_ok());

    clear_allocation_failure();
}

#[test]
fn infallible_push_panics_on_allocation_failure() {
    warm_up_panic_machinery();

    let mut array: DynamicArray<u64> = (0..2).collect();

    fail_next_allocation();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        array.push(2);
    }));

    assert!(result.is_err());
    assert_eq!(array.as_slice(), &[0, 1]);
}

#[test]
fn clone_failure_during_growth_balances_counters() {
    reset_tracked();
    warm_up_panic_machinery();
    warm_up_relocation();

    let mut array = DynamicArray::<Tracked, CopyElements>::builder()
        .capacity(4)
        .build();
    array.extend((0..4).map(Tracked::new));

    let allocations_before = AllocationCounts::current();
    fail_clone_after(2);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        array.push(Tracked::new(4));
    }));
    assert!(result.is_err());
    drop(result);

    let delta = AllocationCounts::current().since(allocations_before);
    assert_eq!(delta.allocations, delta.deallocations);

    assert_eq!(values(&array), [0, 1, 2, 3]);
    assert_eq!(TrackedStats::current().live, 4);

    drop(array);

    let stats = TrackedStats::current();
    assert_eq!(stats.live, 0);

    // 4 originals, 2 partial clones and the new element.
    assert_eq!(stats.drops, 7);
}

#[test]
fn raw_storage_allocates_exactly_once() {
    let before = AllocationCounts::current();

    let storage = RawStorage::<u64>::allocate(16);
    assert_eq!(storage.capacity(), 16);
    assert!(storage.as_ptr().is_aligned());
    drop(storage);

    let delta = AllocationCounts::current().since(before);
    assert_eq!(delta.allocations, 1);
    assert_eq!(delta.deallocations, 1);
}

#[test]
fn zero_sized_elements_never_allocate() {
    let before = AllocationCounts::current();

    let mut array = DynamicArray::<()>::new();
    for _ in 0..100 {
        array.push(());
    }
    drop(array);

    assert_eq!(AllocationCounts::current().since(before).allocations, 0);
}
