#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A growable, contiguous array with strong exception safety, built on an explicit raw storage
//! block.
//!
//! This crate provides [`DynamicArray`], a sequence container in the spirit of [`Vec`] whose
//! every mutating operation either completes or leaves the array exactly as it was, and
//! [`RawStorage`], the untyped-slot memory block it is built on.
//!
//! # Key Features
//!
//! - **Strong guarantee on growth**: A new block is fully populated before it replaces the old
//!   one, so allocation failures and panicking constructors or clones never corrupt the array
//! - **Compile-time transplant strategy**: Elements are either moved bitwise
//!   ([`MoveElements`], the default) or cloned with the originals kept until every clone
//!   succeeded ([`CopyElements`])
//! - **Fallible allocation**: Every allocating operation has a `try_*` variant that returns an
//!   [`Error`] instead of panicking
//! - **Construct in place**: [`push_with()`][DynamicArray::push_with] and
//!   [`insert_with()`][DynamicArray::insert_with] build the new element directly in its final
//!   slot, even when the array grows
//! - **Predictable capacity**: Implicit growth doubles the capacity, explicit
//!   [`reserve()`][DynamicArray::reserve] allocates exactly what was asked for
//!
//! # Examples
//!
//! ## Basic usage
//!
//! ```rust
//! use dynamic_array::DynamicArray;
//!
//! let mut names = DynamicArray::<String>::new();
//!
//! names.push("Alice".to_string());
//! names.push("Carol".to_string());
//! names.insert(1, "Bob".to_string());
//!
//! assert_eq!(names.as_slice(), &["Alice", "Bob", "Carol"]);
//!
//! names.erase(0);
//! assert_eq!(names.len(), 2);
//! assert_eq!(names.capacity(), 4);
//! ```
//!
//! ## Handling allocation failure
//!
//! ```rust
//! use dynamic_array::{DynamicArray, Error};
//!
//! let mut array = DynamicArray::<u64>::new();
//! array.push(1);
//!
//! let result = array.try_reserve(usize::MAX);
//!
//! assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
//! assert_eq!(array.as_slice(), &[1]);
//! ```
//!
//! ## Choosing the copying strategy
//!
//! ```rust
//! use dynamic_array::{CopyElements, DynamicArray};
//!
//! let mut array = DynamicArray::<String, CopyElements>::builder()
//!     .capacity(2)
//!     .build();
//!
//! array.push("first".to_string());
//! array.push("second".to_string());
//!
//! // The array is full, so this grows by cloning both existing elements into a new block.
//! array.push("third".to_string());
//!
//! assert_eq!(array.len(), 3);
//! ```

mod array;
mod builder;
mod error;
mod raw_storage;
pub mod transplant;

pub use array::DynamicArray;
pub use builder::DynamicArrayBuilder;
pub use error::Error;
pub(crate) use error::Result;
pub use raw_storage::RawStorage;
pub use transplant::{CopyElements, MoveElements, Transplant};
