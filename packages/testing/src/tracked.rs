//! Instrumented element type for observing how a container treats its elements.

use std::cell::Cell;
use std::fmt;
use std::thread::LocalKey;

thread_local! {
    static LIVE: Cell<i64> = const { Cell::new(0) };
    static CLONES: Cell<u64> = const { Cell::new(0) };
    static DROPS: Cell<u64> = const { Cell::new(0) };

    static CLONES_BEFORE_FAILURE: Cell<Option<u64>> = const { Cell::new(None) };
    static DEFAULTS_BEFORE_FAILURE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// An element that records its lifecycle in a ledger local to the current thread.
///
/// Every instance counts as live from construction (by [`new()`][Self::new], [`Default`] or
/// [`Clone`]) until it is dropped. A container that leaks or double-drops elements shows up
/// as a non-zero [`TrackedStats::live`] once everything has been dropped.
pub struct Tracked {
    value: u32,
}

impl Tracked {
    /// Creates a new instance holding `value`.
    #[must_use]
    pub fn new(value: u32) -> Self {
        LIVE.set(LIVE.get().wrapping_add(1));
        Self { value }
    }

    /// Returns the value this instance was created with.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.value
    }
}

impl Default for Tracked {
    fn default() -> Self {
        consume_budget(&DEFAULTS_BEFORE_FAILURE, "Tracked::default() failure injected");
        Self::new(0)
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        consume_budget(&CLONES_BEFORE_FAILURE, "Tracked::clone() failure injected");
        CLONES.set(CLONES.get().wrapping_add(1));
        Self::new(self.value)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        LIVE.set(LIVE.get().wrapping_sub(1));
        DROPS.set(DROPS.get().wrapping_add(1));
    }
}

impl PartialEq for Tracked {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Tracked {}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&self.value).finish()
    }
}

fn consume_budget(budget: &'static LocalKey<Cell<Option<u64>>>, message: &str) {
    let Some(remaining) = budget.get() else {
        return;
    };

    if remaining == 0 {
        budget.set(None);
        panic!("{message}");
    }

    budget.set(Some(remaining.wrapping_sub(1)));
}

/// A snapshot of the [`Tracked`] ledger of the current thread.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct TrackedStats {
    /// Instances constructed but not yet dropped.
    pub live: i64,

    /// Successful clones.
    pub clones: u64,

    /// Dropped instances.
    pub drops: u64,
}

impl TrackedStats {
    /// Returns the ledger of the current thread.
    #[must_use]
    pub fn current() -> Self {
        Self {
            live: LIVE.get(),
            clones: CLONES.get(),
            drops: DROPS.get(),
        }
    }
}

/// Resets the [`Tracked`] ledger and any injected failures of the current thread.
pub fn reset_tracked() {
    LIVE.set(0);
    CLONES.set(0);
    DROPS.set(0);
    CLONES_BEFORE_FAILURE.set(None);
    DEFAULTS_BEFORE_FAILURE.set(None);
}

/// Makes a [`Tracked::clone()`] on the current thread panic after `successes` more clones
/// have succeeded. The injection is consumed by the panic.
pub fn fail_clone_after(successes: u64) {
    CLONES_BEFORE_FAILURE.set(Some(successes));
}

/// Makes a `Tracked::default()` on the current thread panic after `successes` more default
/// constructions have succeeded. The injection is consumed by the panic.
pub fn fail_default_after(successes: u64) {
    DEFAULTS_BEFORE_FAILURE.set(Some(successes));
}
