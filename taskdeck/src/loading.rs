//! Counted loading indicator shared by both stores.
//!
//! Every operation that reaches the remote service holds a [`LoadingGuard`]
//! for its duration. The guard is released on drop, so early returns, errors,
//! panics and cancelled futures all clear it. Overlapping operations keep the
//! flag set until the last of them finishes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Loading state: an in-flight counter plus an optional "not yet settled"
/// phase that is active from construction.
#[derive(Debug)]
pub struct LoadingFlag {
    in_flight: AtomicUsize,
    initial: AtomicBool,
}

impl LoadingFlag {
    /// A flag that starts out idle.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            initial: AtomicBool::new(false),
        }
    }

    /// A flag that reports loading until [`settle_initial`](Self::settle_initial)
    /// is called or the first guarded operation completes.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            initial: AtomicBool::new(true),
        }
    }

    /// Marks one operation as in flight until the guard is dropped.
    pub fn begin(&self) -> LoadingGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        LoadingGuard { flag: self }
    }

    /// Ends the initial phase.
    pub fn settle_initial(&self) {
        self.initial.store(false, Ordering::SeqCst);
    }

    /// Returns `true` while in the initial phase or while any operation is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.initial.load(Ordering::SeqCst) || self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Number of operations currently holding a guard.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for LoadingFlag {
    fn default() -> Self {
        Self::idle()
    }
}

/// RAII marker for one in-flight operation.
#[must_use = "the operation is only counted while the guard is alive"]
#[derive(Debug)]
pub struct LoadingGuard<'a> {
    flag: &'a LoadingFlag,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.flag.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.flag.settle_initial();
    }
}
