//! Sequence counters.
//!
//! Sequences are the only synchronization primitive in the pipeline: every
//! producer and consumer advertises its progress through one, and capacity
//! decisions are made by comparing them. Each counter lives alone on a
//! 64-byte cache line; packing two sequences onto one line makes unrelated
//! threads invalidate each other's caches and costs an order of magnitude
//! in throughput.

use crate::pipeline::INITIAL_CURSOR_VALUE;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const CACHE_LINE_SIZE: usize = 64;

/// A cache-line padded atomic sequence counter.
///
/// Starts at [`INITIAL_CURSOR_VALUE`] (−1, "nothing yet") and only moves
/// forward once in use. Reads are acquire, writes are release: a slot
/// written before `set(s)` is visible to any thread that observes a value
/// ≥ `s` through `get()`.
#[repr(align(64))]
pub struct Sequence {
    value: AtomicI64,
    _padding: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>()],
}

impl Sequence {
    /// Create a sequence with the given initial value.
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: AtomicI64::new(initial_value),
            _padding: [0; CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>()],
        }
    }

    /// Current value (acquire).
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Store a new value (release).
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Add `delta` and return the new value (release).
    #[inline]
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::Release) + delta
    }

    /// Add `delta` with relaxed ordering. Used for advisory progress
    /// counters that no other thread gates on.
    #[inline]
    pub fn add_and_get_relaxed(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::Relaxed) + delta
    }

    /// Atomically replace `expected` with `desired`. Returns `true` on
    /// success; the store is release so a successful publish ordering-wise
    /// behaves like `set`.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, desired: i64) -> bool {
        self.value
            .compare_exchange(expected, desired, Ordering::Release, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence").field("value", &self.get()).finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// A cache-line padded counter owned by a single thread.
///
/// The single-producer claim strategy keeps its claim counter and its cached
/// minimum gating value in these: no atomics, no contention, still isolated
/// from neighboring sequences in memory.
pub struct LocalSequence {
    value: CachePadded<UnsafeCell<i64>>,
}

impl LocalSequence {
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: CachePadded::new(UnsafeCell::new(initial_value)),
        }
    }

    #[inline]
    pub fn get(&self) -> i64 {
        // SAFETY: mutated only by the owning thread, see the Sync contract.
        unsafe { *self.value.get() }
    }

    #[inline]
    pub fn set(&self, value: i64) {
        // SAFETY: mutated only by the owning thread, see the Sync contract.
        unsafe { *self.value.get() = value }
    }

    #[inline]
    pub fn add_and_get(&self, delta: i64) -> i64 {
        let next = self.get() + delta;
        self.set(next);
        next
    }
}

impl Default for LocalSequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl std::fmt::Debug for LocalSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSequence").field("value", &self.get()).finish()
    }
}

// SAFETY: LocalSequence may sit inside a structure that is shared between
// threads, but its value is only ever read and written by the one thread
// that claims through it. The single-producer claim strategy documents this
// contract; violating it is a logic error on the caller's side, not UB
// reachable through the safe API of a correctly configured pipeline.
unsafe impl Sync for LocalSequence {}
unsafe impl Send for LocalSequence {}

/// Minimum of a set of sequences, `i64::MAX` when the set is empty.
///
/// The empty-set sentinel is load-bearing: a producer with no registered
/// consumers sees an unbounded gate and claims freely.
pub fn get_minimum_sequence(sequences: &[Arc<Sequence>]) -> i64 {
    sequences
        .iter()
        .map(|sequence| sequence.get())
        .min()
        .unwrap_or(i64::MAX)
}
