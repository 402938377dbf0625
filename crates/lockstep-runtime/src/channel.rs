//! Tick-stamped channels between tasks running at different rates.
//!
//! A producer publishes a payload together with the tick from which it
//! may be acted on (`valid_at = produced_at + delay_ticks`); the delay
//! models the latency between "computed" and "safe to use", typically
//! one period of the producer. A consumer resolves the latest entry
//! whose `valid_at` does not exceed its own tick, so data never
//! travels backwards in simulated time regardless of how the two rates
//! interleave.
//!
//! Storage is a single-buffer seqlock (odd sequence = write in
//! progress, readers retry), which gives the single producer wait-free
//! writes and the readers consistent lock-free snapshots.
//!
//! # Writer discipline
//!
//! Each channel has exactly one producer by convention. The seqlock
//! write path is not safe for two concurrent writers; the runtime
//! preserves the discipline by construction (one channel handle
//! captured per producer body), not at runtime.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A payload stamped with the first tick at which it may be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamped<T> {
    /// First tick at which the payload is valid for consumption.
    pub valid_at: u64,
    /// The payload itself.
    pub payload: T,
}

/// Single-buffer seqlock over a small `Copy` state.
///
/// Readers spin while a write is in progress and retry if the sequence
/// moved underneath them; the single writer never waits.
struct Seqlock<T: Copy> {
    /// Sequence number (odd = write in progress).
    sequence: CachePadded<AtomicU64>,
    data: UnsafeCell<T>,
}

// SAFETY: the seqlock protocol makes concurrent reads of `data` sound
// for Copy types: a snapshot is only returned when the sequence was
// stable and even across the read. Writes are single-threaded by the
// channel's one-producer convention.
unsafe impl<T: Copy + Send> Send for Seqlock<T> {}
unsafe impl<T: Copy + Send> Sync for Seqlock<T> {}

impl<T: Copy> Seqlock<T> {
    fn new(init: T) -> Self {
        Self {
            sequence: CachePadded::new(AtomicU64::new(0)),
            data: UnsafeCell::new(init),
        }
    }

    /// Take a consistent snapshot, spinning through in-flight writes.
    fn read(&self) -> T {
        loop {
            let seq1 = self.sequence.load(Ordering::Acquire);
            if seq1 & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }

            // SAFETY: the value is Copy; torn reads are discarded by
            // the sequence check below.
            let snapshot = unsafe { *self.data.get() };

            let seq2 = self.sequence.load(Ordering::Acquire);
            if seq1 == seq2 {
                return snapshot;
            }
            std::hint::spin_loop();
        }
    }

    /// Publish a new state. Single writer by convention.
    fn write(&self, value: T) {
        self.sequence.fetch_add(1, Ordering::Release);
        // SAFETY: sole writer; readers observe the odd sequence and
        // retry until the closing increment below.
        unsafe {
            *self.data.get() = value;
        }
        self.sequence.fetch_add(1, Ordering::Release);
    }
}

/// Internal state of a single-slot channel.
///
/// The previous entry is retained alongside the newest so a reader
/// whose tick has not yet reached the newest `valid_at` can still
/// resolve the value it is entitled to.
#[derive(Clone, Copy)]
struct SlotState<T> {
    newest: Option<Stamped<T>>,
    previous: Option<Stamped<T>>,
}

/// Single-slot cross-rate channel.
///
/// One producer, any number of readers at other rates. Readers wanting
/// zero-order-hold semantics wrap the channel in a [`ChannelReader`].
pub struct CrossRateChannel<T: Copy> {
    slot: Seqlock<SlotState<T>>,
}

impl<T: Copy> Default for CrossRateChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> CrossRateChannel<T> {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Seqlock::new(SlotState {
                newest: None,
                previous: None,
            }),
        }
    }

    /// Publish a value computed at `produced_at`, valid for
    /// consumption from tick `produced_at + delay_ticks` onward.
    ///
    /// `delay_ticks` is typically one period of the producer: a value
    /// computed during cycle N may only be acted on once cycle N has
    /// completed.
    pub fn publish(&self, value: T, produced_at: u64, delay_ticks: u64) {
        let mut state = self.slot.read();
        state.previous = state.newest;
        state.newest = Some(Stamped {
            valid_at: produced_at + delay_ticks,
            payload: value,
        });
        self.slot.write(state);
    }

    /// Resolve the most recent entry with `valid_at <= tick`.
    ///
    /// Returns `None` if nothing published so far is valid at `tick`.
    #[must_use]
    pub fn read_at(&self, tick: u64) -> Option<Stamped<T>> {
        let state = self.slot.read();
        match state.newest {
            Some(entry) if entry.valid_at <= tick => Some(entry),
            _ => state.previous.filter(|entry| entry.valid_at <= tick),
        }
    }

    /// Resolve at `tick`, falling back to `default` when nothing is
    /// valid yet.
    #[must_use]
    pub fn read_or(&self, tick: u64, default: T) -> T {
        self.read_at(tick).map_or(default, |entry| entry.payload)
    }
}

/// Consumer-side cursor implementing zero-order hold over a
/// [`CrossRateChannel`].
///
/// The cursor remembers the last adopted entry: if the channel's
/// newest write is not yet valid at the consumer's tick, sampling
/// keeps returning the previously adopted value rather than
/// interpolating or peeking into the future.
pub struct ChannelReader<T: Copy> {
    channel: Arc<CrossRateChannel<T>>,
    adopted: Option<Stamped<T>>,
}

impl<T: Copy> ChannelReader<T> {
    /// Create a cursor over `channel` with nothing adopted yet.
    #[must_use]
    pub fn new(channel: Arc<CrossRateChannel<T>>) -> Self {
        Self {
            channel,
            adopted: None,
        }
    }

    /// Sample the channel at `tick` with zero-order hold.
    ///
    /// Returns `default` until the first publish becomes valid; after
    /// that, always the latest valid value, held across gaps.
    pub fn sample(&mut self, tick: u64, default: T) -> T {
        if let Some(entry) = self.channel.read_at(tick) {
            // Never adopt backwards: a stale resolve (possible after
            // the producer overwrote the slot twice) must not replace
            // a newer adopted value.
            if self.adopted.map_or(true, |held| entry.valid_at >= held.valid_at) {
                self.adopted = Some(entry);
            }
        }
        self.adopted.map_or(default, |entry| entry.payload)
    }

    /// The last adopted entry, if any.
    #[must_use]
    pub fn last_adopted(&self) -> Option<Stamped<T>> {
        self.adopted
    }
}

/// Internal state of a history channel: a fixed ring of the last `K`
/// published entries, oldest evicted first.
#[derive(Clone, Copy)]
struct RingState<T: Copy, const K: usize> {
    entries: [Option<Stamped<T>>; K],
    head: usize,
}

/// Fixed-capacity history channel.
///
/// Keeps the `K` most recent publishes so a slower consumer can
/// retrieve the producer's state as of its own decision point rather
/// than the newest available sample.
pub struct HistoryChannel<T: Copy, const K: usize> {
    ring: Seqlock<RingState<T, K>>,
}

impl<T: Copy, const K: usize> Default for HistoryChannel<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const K: usize> HistoryChannel<T, K> {
    /// Create an empty history channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: Seqlock::new(RingState {
                entries: [None; K],
                head: 0,
            }),
        }
    }

    /// Publish a value, evicting the oldest entry once the ring is
    /// full. Stamping follows [`CrossRateChannel::publish`].
    pub fn publish(&self, value: T, produced_at: u64, delay_ticks: u64) {
        let mut state = self.ring.read();
        state.entries[state.head] = Some(Stamped {
            valid_at: produced_at + delay_ticks,
            payload: value,
        });
        state.head = (state.head + 1) % K;
        self.ring.write(state);
    }

    /// Resolve the retained entry with the greatest `valid_at <= tick`.
    ///
    /// Returns `None` when every qualifying entry has been evicted or
    /// nothing valid has been published.
    #[must_use]
    pub fn read_at(&self, tick: u64) -> Option<Stamped<T>> {
        let state = self.ring.read();
        state
            .entries
            .iter()
            .flatten()
            .filter(|entry| entry.valid_at <= tick)
            .max_by_key(|entry| entry.valid_at)
            .copied()
    }

    /// Resolve at `tick`, falling back to `default`.
    #[must_use]
    pub fn read_or(&self, tick: u64, default: T) -> T {
        self.read_at(tick).map_or(default, |entry| entry.payload)
    }

    /// The most recently published entry regardless of validity.
    #[must_use]
    pub fn latest(&self) -> Option<Stamped<T>> {
        let state = self.ring.read();
        let last = (state.head + K - 1) % K;
        state.entries[last]
    }
}
