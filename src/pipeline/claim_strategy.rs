//! Claim strategies.
//!
//! A claim strategy reserves sequence ranges for producers without locks and
//! serializes publication so that the cursor visible to the consumer only
//! ever advances through fully written slots. Three protocols are provided:
//! a single-producer fast path with plain counters, a multi-producer
//! protocol that publishes strictly in claim order, and a multi-producer
//! protocol with a pending-publication ring that lets fast producers commit
//! without waiting for slow ones.

use crate::pipeline::sequence::{get_minimum_sequence, LocalSequence, Sequence};
use crate::pipeline::INITIAL_CURSOR_VALUE;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Number of publications that may be in flight ahead of the cursor in the
/// pending-publication strategy.
pub const DEFAULT_PENDING_BUFFER_SIZE: usize = 1024;

/// Spins before a waiting producer starts sleeping.
pub const DEFAULT_CLAIM_RETRIES: u32 = 1000;

const CLAIM_BACKOFF_SLEEP: Duration = Duration::from_millis(1);

/// Which claim protocol a sequencer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStrategyKind {
    /// One publishing thread, non-atomic counters.
    SingleProducer,
    /// Many publishing threads; cursor advances cooperatively through a
    /// pending-publication ring.
    MultiProducer,
    /// Many publishing threads; each publisher waits for its predecessor to
    /// commit, keeping publication in exact claim order.
    MultiProducerLowContention,
}

/// Reservation and publication protocol for one ring buffer.
///
/// `gating` is the list of consumer sequences whose minimum bounds how far
/// claiming may advance: a slot is only reusable once every consumer has
/// moved past its previous occupant.
pub trait ClaimStrategy: Send + Sync + std::fmt::Debug {
    /// Claim the next sequence, waiting for a free slot on wrap.
    fn increment_and_get(&self, gating: &[Arc<Sequence>]) -> i64;

    /// Claim the next `delta` sequences, returning the last of the batch.
    fn increment_and_get_batch(&self, delta: i64, gating: &[Arc<Sequence>]) -> i64;

    /// Force the claim counter to `sequence`. Only meaningful with a single
    /// publisher.
    fn set_sequence(&self, sequence: i64, gating: &[Arc<Sequence>]);

    /// Advisory check whether one more sequence could be claimed without
    /// waiting. A racing producer may still take the slot afterwards.
    fn has_available_capacity(&self, gating: &[Arc<Sequence>]) -> bool;

    /// Make `sequence` (the last of a batch of `batch_size`) visible through
    /// `cursor`, honoring the protocol's publication ordering.
    fn serialize_publishing(&self, sequence: i64, cursor: &Sequence, batch_size: i64);
}

/// Build the claim strategy for `kind` over a ring of `buffer_size` slots.
pub fn new_claim_strategy(kind: ClaimStrategyKind, buffer_size: usize) -> Box<dyn ClaimStrategy> {
    match kind {
        ClaimStrategyKind::SingleProducer => {
            Box::new(SingleProducerClaimStrategy::new(buffer_size))
        }
        ClaimStrategyKind::MultiProducer => Box::new(MultiProducerClaimStrategy::new(
            buffer_size,
            DEFAULT_PENDING_BUFFER_SIZE,
        )),
        ClaimStrategyKind::MultiProducerLowContention => {
            Box::new(LowContentionClaimStrategy::new(buffer_size))
        }
    }
}

/// Decrement-or-sleep back-off shared by the waiting paths of the
/// multi-producer strategies.
fn apply_backpressure(counter: u32) -> u32 {
    if counter > 0 {
        counter - 1
    } else {
        thread::sleep(CLAIM_BACKOFF_SLEEP);
        0
    }
}

/// Claim strategy for exactly one publishing thread.
///
/// Both the claim counter and the cached minimum gating value are plain
/// padded integers: with a single claimant there is nothing to contend with,
/// and the cursor store in [`serialize_publishing`] cannot race another
/// publisher.
///
/// [`serialize_publishing`]: ClaimStrategy::serialize_publishing
#[derive(Debug)]
pub struct SingleProducerClaimStrategy {
    buffer_size: i64,
    claim_sequence: LocalSequence,
    min_gating_cache: LocalSequence,
}

impl SingleProducerClaimStrategy {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size as i64,
            claim_sequence: LocalSequence::new(INITIAL_CURSOR_VALUE),
            min_gating_cache: LocalSequence::new(INITIAL_CURSOR_VALUE),
        }
    }

    fn wait_for_free_slot(&self, sequence: i64, gating: &[Arc<Sequence>]) {
        let wrap_point = sequence - self.buffer_size;
        if wrap_point > self.min_gating_cache.get() {
            let mut min_sequence = get_minimum_sequence(gating);
            while wrap_point > min_sequence {
                thread::yield_now();
                min_sequence = get_minimum_sequence(gating);
            }
            self.min_gating_cache.set(min_sequence);
        }
    }
}

impl ClaimStrategy for SingleProducerClaimStrategy {
    fn increment_and_get(&self, gating: &[Arc<Sequence>]) -> i64 {
        self.increment_and_get_batch(1, gating)
    }

    fn increment_and_get_batch(&self, delta: i64, gating: &[Arc<Sequence>]) -> i64 {
        let next_sequence = self.claim_sequence.add_and_get(delta);
        self.wait_for_free_slot(next_sequence, gating);
        next_sequence
    }

    fn set_sequence(&self, sequence: i64, gating: &[Arc<Sequence>]) {
        self.claim_sequence.set(sequence);
        self.wait_for_free_slot(sequence, gating);
    }

    fn has_available_capacity(&self, gating: &[Arc<Sequence>]) -> bool {
        let wrap_point = self.claim_sequence.get() + 1 - self.buffer_size;
        if wrap_point > self.min_gating_cache.get() {
            let min_sequence = get_minimum_sequence(gating);
            self.min_gating_cache.set(min_sequence);
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }

    fn serialize_publishing(&self, sequence: i64, cursor: &Sequence, _batch_size: i64) {
        cursor.set(sequence);
    }
}

/// Multi-producer claim strategy that publishes in exact claim order.
///
/// Claims are a shared fetch-add; publication waits until the cursor has
/// reached the claimant's immediate predecessor before committing. Correct
/// under any number of producers, but publication is effectively serialized
/// when many are in flight.
#[derive(Debug)]
pub struct LowContentionClaimStrategy {
    buffer_size: i64,
    claim_sequence: Sequence,
    /// Relaxed cache of the minimum gating value. Stale reads only cause an
    /// extra recheck against the live sequences, never an unsafe claim.
    min_gating_cache: AtomicI64,
    retries: u32,
}

impl LowContentionClaimStrategy {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size as i64,
            claim_sequence: Sequence::new(INITIAL_CURSOR_VALUE),
            min_gating_cache: AtomicI64::new(INITIAL_CURSOR_VALUE),
            retries: DEFAULT_CLAIM_RETRIES,
        }
    }

    fn wait_for_free_slot(&self, sequence: i64, gating: &[Arc<Sequence>]) {
        let wrap_point = sequence - self.buffer_size;
        if wrap_point > self.min_gating_cache.load(Ordering::Relaxed) {
            let mut counter = self.retries;
            let mut min_sequence = get_minimum_sequence(gating);
            while wrap_point > min_sequence {
                counter = apply_backpressure(counter);
                min_sequence = get_minimum_sequence(gating);
            }
            self.min_gating_cache.store(min_sequence, Ordering::Relaxed);
        }
    }

    fn claim(&self, delta: i64, gating: &[Arc<Sequence>]) -> i64 {
        let next_sequence = self.claim_sequence.add_and_get(delta);
        self.wait_for_free_slot(next_sequence, gating);
        next_sequence
    }
}

impl ClaimStrategy for LowContentionClaimStrategy {
    fn increment_and_get(&self, gating: &[Arc<Sequence>]) -> i64 {
        self.claim(1, gating)
    }

    fn increment_and_get_batch(&self, delta: i64, gating: &[Arc<Sequence>]) -> i64 {
        self.claim(delta, gating)
    }

    fn set_sequence(&self, sequence: i64, gating: &[Arc<Sequence>]) {
        self.claim_sequence.set(sequence);
        self.wait_for_free_slot(sequence, gating);
    }

    fn has_available_capacity(&self, gating: &[Arc<Sequence>]) -> bool {
        let wrap_point = self.claim_sequence.get() + 1 - self.buffer_size;
        if wrap_point > self.min_gating_cache.load(Ordering::Relaxed) {
            let min_sequence = get_minimum_sequence(gating);
            self.min_gating_cache.store(min_sequence, Ordering::Relaxed);
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }

    fn serialize_publishing(&self, sequence: i64, cursor: &Sequence, batch_size: i64) {
        let expected_sequence = sequence - batch_size;
        let mut counter = self.retries;
        while cursor.get() != expected_sequence {
            counter = apply_backpressure(counter);
        }
        cursor.set(sequence);
    }
}

/// Multi-producer claim strategy with a pending-publication ring.
///
/// After claiming, a producer records each claimed sequence in
/// `pending[seq & (P−1)]` and then tries to drag the cursor forward through
/// every consecutive ready entry with compare-and-set. A producer that
/// finishes early commits its own work and whatever contiguous work it can
/// see, instead of stalling behind a slow predecessor; losing the CAS race
/// just means someone else already advanced past it. The ring bounds the
/// in-flight window: a claim more than `P` ahead of the cursor backs off
/// until the cursor catches up.
#[derive(Debug)]
pub struct MultiProducerClaimStrategy {
    inner: LowContentionClaimStrategy,
    pending_publication: Box<[Sequence]>,
    pending_size: i64,
    pending_mask: i64,
}

impl MultiProducerClaimStrategy {
    /// `pending_buffer_size` must be a power of two; it defaults to
    /// [`DEFAULT_PENDING_BUFFER_SIZE`] via [`new_claim_strategy`].
    pub fn new(buffer_size: usize, pending_buffer_size: usize) -> Self {
        assert!(
            pending_buffer_size.is_power_of_two(),
            "pending buffer size must be a power of two, got {pending_buffer_size}"
        );
        let pending_publication: Box<[Sequence]> = (0..pending_buffer_size)
            .map(|_| Sequence::new(INITIAL_CURSOR_VALUE))
            .collect();
        Self {
            inner: LowContentionClaimStrategy::new(buffer_size),
            pending_publication,
            pending_size: pending_buffer_size as i64,
            pending_mask: pending_buffer_size as i64 - 1,
        }
    }

    #[inline]
    fn pending(&self, sequence: i64) -> &Sequence {
        &self.pending_publication[(sequence & self.pending_mask) as usize]
    }
}

impl ClaimStrategy for MultiProducerClaimStrategy {
    fn increment_and_get(&self, gating: &[Arc<Sequence>]) -> i64 {
        self.inner.increment_and_get(gating)
    }

    fn increment_and_get_batch(&self, delta: i64, gating: &[Arc<Sequence>]) -> i64 {
        self.inner.increment_and_get_batch(delta, gating)
    }

    fn set_sequence(&self, sequence: i64, gating: &[Arc<Sequence>]) {
        self.inner.set_sequence(sequence, gating);
    }

    fn has_available_capacity(&self, gating: &[Arc<Sequence>]) -> bool {
        self.inner.has_available_capacity(gating)
    }

    fn serialize_publishing(&self, sequence: i64, cursor: &Sequence, batch_size: i64) {
        // Cap the in-flight window at the pending ring size.
        let mut counter = self.inner.retries;
        while sequence - cursor.get() > self.pending_size {
            counter = apply_backpressure(counter);
        }

        // Unpublished -> pending.
        let mut expected_sequence = sequence - batch_size;
        for pending_sequence in (expected_sequence + 1)..=sequence {
            self.pending(pending_sequence).set(pending_sequence);
        }

        // If the cursor is already past us another producer has committed
        // this range; no point joining the race.
        let cursor_sequence = cursor.get();
        if cursor_sequence >= sequence {
            return;
        }
        expected_sequence = expected_sequence.max(cursor_sequence);

        // Pending -> published: extend the cursor through every consecutive
        // ready entry until the chain breaks or another producer wins.
        let mut next_sequence = expected_sequence + 1;
        while cursor.compare_and_set(expected_sequence, next_sequence) {
            expected_sequence = next_sequence;
            next_sequence += 1;
            if self.pending(next_sequence).get() != next_sequence {
                break;
            }
        }
    }
}
