//! Sequencer.
//!
//! Glues a claim strategy, a wait strategy, the publication cursor, and the
//! gating sequences into the coordination hub producers and barriers hang
//! off. The cursor holds the highest fully published sequence; the minimum
//! of the gating sequences is the wrap boundary producers must not overrun.

use crate::pipeline::claim_strategy::{new_claim_strategy, ClaimStrategy, ClaimStrategyKind};
use crate::pipeline::sequence::{get_minimum_sequence, Sequence};
use crate::pipeline::sequence_barrier::SequenceBarrier;
use crate::pipeline::wait_strategy::{new_wait_strategy, WaitStrategy, WaitStrategyKind};
use crate::pipeline::{ceil_to_pow2, PipelineError, Result, TimeConfig};
use parking_lot::RwLock;
use std::sync::Arc;

/// Coordinates sequence claiming and publication for one ring buffer.
#[derive(Debug)]
pub struct Sequencer {
    buffer_size: usize,
    cursor: Arc<Sequence>,
    claim_strategy: Box<dyn ClaimStrategy>,
    wait_strategy: Arc<dyn WaitStrategy>,
    gating_sequences: RwLock<Vec<Arc<Sequence>>>,
}

impl Sequencer {
    /// Build a sequencer over `buffer_size` slots (rounded up to the next
    /// power of two; must be positive).
    pub fn new(
        buffer_size: usize,
        claim_kind: ClaimStrategyKind,
        wait_kind: WaitStrategyKind,
        time_config: &TimeConfig,
    ) -> Result<Self> {
        if buffer_size == 0 {
            return Err(PipelineError::InvalidBufferSize(buffer_size));
        }
        let buffer_size = ceil_to_pow2(buffer_size);

        Ok(Self {
            buffer_size,
            cursor: Arc::new(Sequence::default()),
            claim_strategy: new_claim_strategy(claim_kind, buffer_size),
            wait_strategy: new_wait_strategy(wait_kind, time_config),
            gating_sequences: RwLock::new(Vec::new()),
        })
    }

    /// Capacity of the ring in slots.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Value of the cursor: the highest sequence visible to consumers.
    pub fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    /// Shared handle to the cursor sequence.
    pub fn cursor_sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    /// Replace the set of sequences that gate producers against wrap.
    /// Register every consumer before publishing begins.
    pub fn set_gating_sequences(&self, sequences: Vec<Arc<Sequence>>) {
        *self.gating_sequences.write() = sequences;
    }

    /// Append to the gating set.
    pub fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating_sequences.write().extend_from_slice(sequences);
    }

    /// Claim the next sequence for publishing. Blocks (with the claim
    /// strategy's back-off) while the ring is full.
    pub fn next(&self) -> i64 {
        let gating = self.gating_sequences.read();
        self.claim_strategy.increment_and_get(&gating)
    }

    /// Claim the next `batch_size` sequences, returning the last one.
    pub fn next_batch(&self, batch_size: i64) -> i64 {
        let gating = self.gating_sequences.read();
        self.claim_strategy.increment_and_get_batch(batch_size, &gating)
    }

    /// Claim a specific sequence. Only valid with a single publisher.
    pub fn claim(&self, sequence: i64) -> i64 {
        let gating = self.gating_sequences.read();
        self.claim_strategy.set_sequence(sequence, &gating);
        sequence
    }

    /// Publish one claimed sequence, making its slot visible to consumers.
    pub fn publish(&self, sequence: i64) {
        self.publish_internal(sequence, 1);
    }

    /// Publish a claimed batch ending at `sequence`.
    pub fn publish_batch(&self, sequence: i64, batch_size: i64) {
        self.publish_internal(sequence, batch_size);
    }

    /// Force the cursor straight to `sequence`, bypassing publication
    /// serialization. Only valid with a single publisher.
    pub fn force_publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_internal(&self, sequence: i64, batch_size: i64) {
        self.claim_strategy
            .serialize_publishing(sequence, &self.cursor, batch_size);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Advisory: can one more sequence be claimed without waiting?
    pub fn has_available_capacity(&self) -> bool {
        let gating = self.gating_sequences.read();
        self.claim_strategy.has_available_capacity(&gating)
    }

    /// Slots currently holding published-but-unconsumed events, computed as
    /// `(N + cursor − min(gating)) mod N`.
    pub fn occupied_capacity(&self) -> usize {
        let consumed = get_minimum_sequence(&self.gating_sequences.read());
        let produced = self.cursor.get();
        let buffer_size = self.buffer_size as i64;
        (buffer_size + produced - consumed).rem_euclid(buffer_size) as usize
    }

    /// Slots free for claiming.
    pub fn remaining_capacity(&self) -> usize {
        self.buffer_size - self.occupied_capacity()
    }

    /// Build a barrier over this sequencer's cursor and wait strategy,
    /// additionally gated on `dependent_sequences`.
    pub fn new_barrier(&self, dependent_sequences: Vec<Arc<Sequence>>) -> SequenceBarrier {
        SequenceBarrier::new(
            Arc::clone(&self.wait_strategy),
            Arc::clone(&self.cursor),
            dependent_sequences,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::INITIAL_CURSOR_VALUE;

    fn sequencer(buffer_size: usize, claim_kind: ClaimStrategyKind) -> Sequencer {
        Sequencer::new(
            buffer_size,
            claim_kind,
            WaitStrategyKind::Yielding,
            &TimeConfig::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_zero_buffer_size() {
        let result = Sequencer::new(
            0,
            ClaimStrategyKind::SingleProducer,
            WaitStrategyKind::Yielding,
            &TimeConfig::new(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidBufferSize(0))));
    }

    #[test]
    fn test_rounds_buffer_size_up_to_power_of_two() {
        let sequencer = sequencer(1000, ClaimStrategyKind::SingleProducer);
        assert_eq!(sequencer.buffer_size(), 1024);
    }

    #[test]
    fn test_claim_and_publish_round_trip() {
        let sequencer = sequencer(8, ClaimStrategyKind::SingleProducer);
        let consumer = Arc::new(Sequence::default());
        sequencer.set_gating_sequences(vec![Arc::clone(&consumer)]);

        assert_eq!(sequencer.cursor(), INITIAL_CURSOR_VALUE);

        let sequence = sequencer.next();
        assert_eq!(sequence, 0);
        sequencer.publish(sequence);
        assert_eq!(sequencer.cursor(), 0);

        consumer.set(0);
        assert_eq!(sequencer.occupied_capacity(), 0);
        assert_eq!(sequencer.remaining_capacity(), 8);
    }

    #[test]
    fn test_batch_claim_and_publish() {
        let sequencer = sequencer(8, ClaimStrategyKind::SingleProducer);
        let consumer = Arc::new(Sequence::default());
        sequencer.set_gating_sequences(vec![Arc::clone(&consumer)]);

        let last = sequencer.next_batch(4);
        assert_eq!(last, 3);
        sequencer.publish_batch(last, 4);
        assert_eq!(sequencer.cursor(), 3);
        assert_eq!(sequencer.occupied_capacity(), 4);
        assert_eq!(sequencer.remaining_capacity(), 4);
    }

    #[test]
    fn test_forced_claim_and_publish() {
        let sequencer = sequencer(8, ClaimStrategyKind::SingleProducer);
        sequencer.set_gating_sequences(vec![Arc::new(Sequence::default())]);

        let sequence = sequencer.claim(5);
        assert_eq!(sequence, 5);
        sequencer.force_publish(5);
        assert_eq!(sequencer.cursor(), 5);
    }

    #[test]
    fn test_capacity_checks_reflect_consumption() {
        let sequencer = sequencer(4, ClaimStrategyKind::SingleProducer);
        let consumer = Arc::new(Sequence::default());
        sequencer.set_gating_sequences(vec![Arc::clone(&consumer)]);

        for _ in 0..4 {
            let sequence = sequencer.next();
            sequencer.publish(sequence);
        }
        assert!(!sequencer.has_available_capacity());

        consumer.set(1);
        assert!(sequencer.has_available_capacity());
        assert_eq!(sequencer.occupied_capacity(), 2);
    }

    #[test]
    fn test_multi_producer_cursor_is_monotone() {
        let sequencer = sequencer(16, ClaimStrategyKind::MultiProducer);
        sequencer.set_gating_sequences(vec![Arc::new(Sequence::new(i64::MAX - 1))]);

        let first = sequencer.next();
        let second = sequencer.next();
        assert!(second > first);

        // Later claim published first: not yet visible.
        sequencer.publish(second);
        assert_eq!(sequencer.cursor(), INITIAL_CURSOR_VALUE);

        // Earlier claim commits and drags the pending one through.
        sequencer.publish(first);
        assert_eq!(sequencer.cursor(), second);
    }

    #[test]
    fn test_barrier_tracks_cursor() {
        let sequencer = sequencer(8, ClaimStrategyKind::SingleProducer);
        sequencer.set_gating_sequences(vec![Arc::new(Sequence::new(i64::MAX - 1))]);
        let barrier = sequencer.new_barrier(vec![]);

        let sequence = sequencer.next();
        sequencer.publish(sequence);
        assert_eq!(barrier.wait_for(0).unwrap(), 0);
        assert_eq!(barrier.cursor(), 0);
    }
}
