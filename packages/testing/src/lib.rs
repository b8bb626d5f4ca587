#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in `dynamic_array`.
//!
//! * [`CountingAllocator`] counts allocations made by the current thread and can be told to
//!   reject the next one, so tests can observe and inject allocation failures.
//! * [`Tracked`] is an element type that keeps a per-thread ledger of how many instances are
//!   alive and how often they were cloned, and can be told to panic while being cloned or
//!   default-constructed.

mod allocator;
mod tracked;

pub use allocator::*;
pub use tracked::*;
