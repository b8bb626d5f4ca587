//! Integration tests for the `dynamic_array` package.
//!
//! These tests observe the array from the outside through the instrumented [`Tracked`] element,
//! verifying element placement, the transplant strategies and that every constructed element
//! is destroyed exactly once.

#![allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same rigor as production code"
)]

use std::panic::{self, AssertUnwindSafe};

use dynamic_array::{CopyElements, DynamicArray, MoveElements, Transplant};
use testing::{Tracked, TrackedStats, fail_clone_after, fail_default_after, reset_tracked};

fn values<S: Transplant<Tracked>>(array: &DynamicArray<Tracked, S>) -> Vec<u32> {
    array.iter().map(Tracked::value).collect()
}

fn filled<S: Transplant<Tracked>>(count: u32) -> DynamicArray<Tracked, S> {
    (0..count).map(Tracked::new).collect()
}

#[test]
fn end_to_end_scenario() {
    reset_tracked();

    let mut array = DynamicArray::<Tracked>::new();
    assert!(array.is_empty());

    array.push(Tracked::new(1));
    array.push(Tracked::new(2));
    array.push(Tracked::new(3));

    array.erase(1);
    assert_eq!(values(&array), [1, 3]);

    array.insert(1, Tracked::new(9));
    assert_eq!(values(&array), [1, 9, 3]);

    array.resize(1);
    assert_eq!(values(&array), [1]);

    drop(array);

    let stats = TrackedStats::current();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.drops, 4);
}

#[test]
fn appended_values_stay_in_place() {
    reset_tracked();

    let mut array = DynamicArray::<Tracked>::new();

    for value in 0..50 {
        if value % 2 == 0 {
            array.push(Tracked::new(value));
        } else {
            array.push_with(|| Tracked::new(value));
        }
    }

    assert_eq!(array.len(), 50);

    for (index, item) in array.iter().enumerate() {
        assert_eq!(usize::try_from(item.value()).unwrap(), index);
    }

    drop(array);
    assert_eq!(TrackedStats::current().live, 0);
}

#[test]
fn clone_is_independent() {
    reset_tracked();

    let original = filled::<MoveElements>(5);
    let mut copy = original.clone();

    assert_eq!(copy, original);
    assert_eq!(copy.len(), 5);

    copy.erase(0);
    copy.push(Tracked::new(42));

    assert_eq!(values(&original), [0, 1, 2, 3, 4]);
    assert_eq!(values(&copy), [1, 2, 3, 4, 42]);

    drop(original);
    drop(copy);
    assert_eq!(TrackedStats::current().live, 0);
}

#[test]
fn clone_failure_releases_partial_copy() {
    reset_tracked();

    let original = filled::<MoveElements>(5);
    fail_clone_after(3);

    let result = panic::catch_unwind(AssertUnwindSafe(|| original.clone()));

    assert!(result.is_err());
    assert_eq!(TrackedStats::current().live, 5);
    assert_eq!(values(&original), [0, 1, 2, 3, 4]);
}

#[test]
fn take_moves_contents_out() {
    reset_tracked();

    let mut source = filled::<MoveElements>(3);
    let taken = source.take();

    assert_eq!(values(&taken), [0, 1, 2]);
    assert!(source.is_empty());
    assert_eq!(source.capacity(), 0);
    assert_eq!(TrackedStats::current().live, 3);
}

#[test]
fn insert_shifts_tail_right() {
    reset_tracked();

    for strategy_moves in [true, false] {
        for index in 0..=4 {
            let before: [u32; 4] = [0, 1, 2, 3];
            let mut expected = before.to_vec();
            expected.insert(index, 99);

            if strategy_moves {
                let mut array = filled::<MoveElements>(4);
                array.insert(index, Tracked::new(99));
                assert_eq!(values(&array), expected);
            } else {
                let mut array = filled::<CopyElements>(4);
                array.insert(index, Tracked::new(99));
                assert_eq!(values(&array), expected);
            }
        }
    }

    assert_eq!(TrackedStats::current().live, 0);
}

#[test]
fn erase_shifts_tail_left() {
    reset_tracked();

    for index in 0..4 {
        let mut expected: Vec<u32> = vec![0, 1, 2, 3];
        expected.remove(index);

        let mut moved = filled::<MoveElements>(4);
        assert_eq!(moved.erase(index), index);
        assert_eq!(values(&moved), expected);

        let mut copied = filled::<CopyElements>(4);
        assert_eq!(copied.erase(index), index);
        assert_eq!(values(&copied), expected);
    }

    assert_eq!(TrackedStats::current().live, 0);
}

#[test]
fn move_strategy_never_clones_on_growth() {
    reset_tracked();

    let mut array = filled::<MoveElements>(16);
    array.insert(7, Tracked::new(100));
    array.reserve(1000);
    array.insert(0, Tracked::new(200));

    assert_eq!(TrackedStats::current().clones, 0);
    assert_eq!(array.len(), 18);
}

#[test]
fn copy_strategy_clones_every_element_on_growth() {
    reset_tracked();

    let mut array = DynamicArray::<Tracked, CopyElements>::builder()
        .capacity(4)
        .build();
    array.extend((0..4).map(Tracked::new));
    assert_eq!(TrackedStats::current().clones, 0);

    // Append-triggered growth.
    array.push(Tracked::new(4));
    assert_eq!(TrackedStats::current().clones, 4);

    array.extend((5..8).map(Tracked::new));
    assert_eq!(array.len(), array.capacity());

    // Insert-triggered growth.
    array.insert(3, Tracked::new(8));
    assert_eq!(TrackedStats::current().clones, 4 + 8);

    assert_eq!(values(&array), [0, 1, 2, 8, 3, 4, 5, 6, 7]);
    assert_eq!(TrackedStats::current().live, 9);
}

#[test]
fn clone_failure_during_growth_keeps_contents() {
    reset_tracked();

    let mut array = DynamicArray::<Tracked, CopyElements>::builder()
        .capacity(6)
        .build();
    array.extend((0..6).map(Tracked::new));

    fail_clone_after(4);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        array.push(Tracked::new(6));
    }));

    assert!(result.is_err());
    assert_eq!(values(&array), [0, 1, 2, 3, 4, 5]);
    assert_eq!(array.capacity(), 6);

    // The 4 clones and the new element were all torn down again.
    let stats = TrackedStats::current();
    assert_eq!(stats.live, 6);
    assert_eq!(stats.drops, 5);

    drop(array);
    assert_eq!(TrackedStats::current().live, 0);
}

#[test]
fn resize_semantics() {
    reset_tracked();

    let mut array = filled::<MoveElements>(4);

    array.resize(2);
    assert_eq!(values(&array), [0, 1]);

    array.resize(2);
    assert_eq!(values(&array), [0, 1]);

    array.resize(5);
    assert_eq!(values(&array), [0, 1, 0, 0, 0]);

    drop(array);
    assert_eq!(TrackedStats::current().live, 0);
}

#[test]
fn resize_failure_rolls_back_new_elements() {
    reset_tracked();

    let mut array = filled::<MoveElements>(2);
    fail_default_after(2);

    let result = panic::catch_unwind(AssertUnwindSafe(|| array.resize(6)));

    assert!(result.is_err());
    assert_eq!(values(&array), [0, 1]);
    assert_eq!(TrackedStats::current().live, 2);
}

#[test]
fn with_len_failure_releases_everything() {
    reset_tracked();
    fail_default_after(3);

    let result = panic::catch_unwind(|| DynamicArray::<Tracked>::with_len(10));

    assert!(result.is_err());
    assert_eq!(TrackedStats::current().live, 0);
}

#[test]
fn clone_from_reuses_or_replaces_storage() {
    reset_tracked();

    let small = filled::<CopyElements>(2);
    let large = filled::<CopyElements>(6);

    let mut target = filled::<CopyElements>(4);
    target.clone_from(&small);
    assert_eq!(values(&target), [0, 1]);
    assert_eq!(target.capacity(), 4);

    target.clone_from(&large);
    assert_eq!(values(&target), [0, 1, 2, 3, 4, 5]);
    assert_eq!(target.capacity(), 6);

    drop((small, large, target));
    assert_eq!(TrackedStats::current().live, 0);
}

#[test]
fn remove_and_pop_hand_out_values() {
    reset_tracked();

    let mut array = filled::<CopyElements>(4);
    let clones_before = TrackedStats::current().clones;

    let removed = array.remove(1);
    assert_eq!(removed.value(), 1);

    let popped = array.pop();
    assert_eq!(popped.as_ref().map(Tracked::value), Some(3));

    assert_eq!(values(&array), [0, 2]);
    assert_eq!(TrackedStats::current().clones, clones_before);
    assert_eq!(TrackedStats::current().live, 4);
}

#[test]
fn non_clone_elements_are_supported() {
    struct Unique(u32);

    let mut array = DynamicArray::<Unique>::new();

    for value in 0..10 {
        array.push(Unique(value));
    }
    array.insert(5, Unique(100));
    array.erase(0);

    let collected: Vec<u32> = array.iter().map(|item| item.0).collect();
    assert_eq!(collected, [1, 2, 3, 4, 100, 5, 6, 7, 8, 9]);
}
