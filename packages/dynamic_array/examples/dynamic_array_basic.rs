//! Demonstrates basic usage of `DynamicArray`.
//!
//! This example walks through appending, inserting and erasing elements, shows how the capacity
//! grows and what happens to the array when an element fails to clone during growth.

use std::panic::{self, AssertUnwindSafe};

use dynamic_array::{CopyElements, DynamicArray};

/// Demonstrates how the capacity doubles as elements are appended.
fn demonstrate_growth() {
    println!("Example 1: Capacity growth");
    println!("--------------------------");

    let mut array = DynamicArray::<u32>::new();
    println!("Empty array: len = {}, capacity = {}", array.len(), array.capacity());

    for value in 1..=9 {
        array.push(value);
        println!(
            "Pushed {value}: len = {}, capacity = {}",
            array.len(),
            array.capacity()
        );
    }

    array.reserve(32);
    println!("After reserve(32): capacity = {}", array.capacity());

    println!();
}

/// Demonstrates positional insertion and removal.
fn demonstrate_editing() {
    println!("Example 2: Inserting and erasing");
    println!("--------------------------------");

    let mut array: DynamicArray<String> = ["alpha", "gamma", "delta"]
        .into_iter()
        .map(String::from)
        .collect();
    println!("Start: {array:?}");

    array.insert(1, "beta".to_string());
    println!("After insert(1, \"beta\"): {array:?}");

    let next = array.erase(2);
    println!("After erase(2): {array:?}, element now at index {next}: {:?}", array.get(next));

    array.push_with(|| "epsilon".to_uppercase());
    println!("After push_with(..): {array:?}");

    array.resize(2);
    println!("After resize(2): {array:?}");

    println!();
}

/// An element whose clone fails once the budget is used up.
#[derive(Debug)]
struct Fragile {
    id: u32,
    clones_allowed: bool,
}

impl Clone for Fragile {
    fn clone(&self) -> Self {
        assert!(self.clones_allowed, "cannot clone element {}", self.id);

        Self {
            id: self.id,
            clones_allowed: self.clones_allowed,
        }
    }
}

/// Demonstrates that a failing clone during growth leaves the array untouched.
fn demonstrate_strong_guarantee() {
    println!("Example 3: Strong guarantee during growth");
    println!("-----------------------------------------");

    let mut array = DynamicArray::<Fragile, CopyElements>::builder()
        .capacity(3)
        .build();

    array.push(Fragile {
        id: 1,
        clones_allowed: true,
    });
    array.push(Fragile {
        id: 2,
        clones_allowed: false,
    });
    array.push(Fragile {
        id: 3,
        clones_allowed: true,
    });

    println!("Before: len = {}, capacity = {}", array.len(), array.capacity());

    // The array is full, so this push has to clone every element into a larger block.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        array.push(Fragile {
            id: 4,
            clones_allowed: true,
        });
    }));

    println!("Push succeeded: {}", result.is_ok());
    println!("After: len = {}, capacity = {}", array.len(), array.capacity());
    println!(
        "Elements: {:?}",
        array.iter().map(|item| item.id).collect::<Vec<_>>()
    );

    println!();
}

fn main() {
    println!("=== DynamicArray Examples ===");
    println!();

    demonstrate_growth();
    demonstrate_editing();
    demonstrate_strong_guarantee();

    println!("All examples completed.");
}
