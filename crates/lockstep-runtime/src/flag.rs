//! Busy-wait signaling cells.
//!
//! A `SharedFlag` is the only synchronization primitive between the
//! scheduler and a worker: a two-state cell polled in a tight loop,
//! never a blocking wait. Exactly one side writes at a time by
//! protocol — the scheduler raises the flag to dispatch a cycle, the
//! worker clears it when the cycle completes — so no lock is needed.
//!
//! The same cell type serves as the global stop flag (harness raises,
//! everyone reads) and the global fault flag (workers raise, scheduler
//! reads).

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU8, Ordering};

const CLEAR: u8 = 0;
const RAISED: u8 = 1;

/// Two-state busy-wait signaling cell.
///
/// Release on write, acquire on read: everything the raiser wrote
/// before `raise()` is visible to whoever observes `is_raised()`, and
/// everything the worker wrote before `clear()` is visible to whoever
/// observes `is_clear()`.
#[derive(Debug, Default)]
pub struct SharedFlag {
    cell: CachePadded<AtomicU8>,
}

impl SharedFlag {
    /// Create a flag in the clear state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the flag.
    #[inline]
    pub fn raise(&self) {
        self.cell.store(RAISED, Ordering::Release);
    }

    /// Return the flag to idle.
    #[inline]
    pub fn clear(&self) {
        self.cell.store(CLEAR, Ordering::Release);
    }

    /// Check whether the flag is armed.
    #[inline]
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.cell.load(Ordering::Acquire) == RAISED
    }

    /// Check whether the flag is idle.
    #[inline]
    #[must_use]
    pub fn is_clear(&self) -> bool {
        !self.is_raised()
    }
}
