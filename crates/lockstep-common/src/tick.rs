//! Global tick accounting.
//!
//! The tick is the discrete simulated-time unit: one tick per cycle of
//! the fastest (rate-master) task. Simulated time is `tick * base
//! period`, where the base period is one period of the fastest rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide monotonic tick counter.
///
/// Shared between the scheduler, every worker, and the channels. The
/// rate-master worker is the sole writer: it advances the counter by
/// exactly one after completing each of its cycles. Everyone else only
/// reads.
#[derive(Debug, Default)]
pub struct TickCounter {
    value: AtomicU64,
}

impl TickCounter {
    /// Create a counter at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Current tick.
    #[inline]
    #[must_use]
    pub fn now(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Advance by exactly one, returning the new tick.
    ///
    /// Called only by the rate-master worker, after its cycle body has
    /// completed and before it clears its dispatch flag.
    #[inline]
    pub fn advance(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Simulated time corresponding to the current tick.
    #[must_use]
    pub fn sim_time(&self, base_period: Duration) -> Duration {
        sim_time(self.now(), base_period)
    }
}

/// Simulated time for a given tick: `tick * base_period`.
#[must_use]
pub fn sim_time(tick: u64, base_period: Duration) -> Duration {
    let ns = u128::from(tick) * base_period.as_nanos();
    Duration::from_nanos(u64::try_from(ns).unwrap_or(u64::MAX))
}
