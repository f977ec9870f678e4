//! Event publisher.
//!
//! The producer-facing front of the fixed pipeline: claim a sequence, let a
//! translator fill the slot in place, publish. Publication always follows a
//! claim, because translators cannot fail, so consumers never wait on an
//! abandoned sequence.

use crate::pipeline::event_translator::EventTranslator;
use crate::pipeline::ring_buffer::RingBuffer;
use crate::pipeline::sequencer::Sequencer;
use std::sync::Arc;

/// Publishes translated events into a ring buffer.
#[derive(Debug)]
pub struct EventPublisher<T> {
    ring_buffer: Arc<RingBuffer<T>>,
    sequencer: Arc<Sequencer>,
}

impl<T> EventPublisher<T> {
    pub fn new(ring_buffer: Arc<RingBuffer<T>>, sequencer: Arc<Sequencer>) -> Self {
        Self {
            ring_buffer,
            sequencer,
        }
    }

    /// Claim the next sequence, fill its slot through `translator`, and
    /// publish it. Blocks while the ring is full.
    pub fn publish_event(&self, translator: &dyn EventTranslator<T>) {
        let sequence = self.sequencer.next();
        self.translate_and_publish(translator, sequence);
    }

    /// Like [`publish_event`](Self::publish_event), but returns `false`
    /// without claiming when the ring looks full.
    ///
    /// The capacity check is advisory: with multiple producers, a racing
    /// claim may still fill the ring between the check and this publisher's
    /// claim, in which case the claim blocks like `publish_event`.
    pub fn try_publish_event(&self, translator: &dyn EventTranslator<T>) -> bool {
        if !self.sequencer.has_available_capacity() {
            return false;
        }
        let sequence = self.sequencer.next();
        self.translate_and_publish(translator, sequence);
        true
    }

    /// Advisory capacity check, see
    /// [`try_publish_event`](Self::try_publish_event).
    pub fn has_available_capacity(&self) -> bool {
        self.sequencer.has_available_capacity()
    }

    fn translate_and_publish(&self, translator: &dyn EventTranslator<T>, sequence: i64) {
        // SAFETY: `sequence` was claimed above and not yet published, so
        // this thread holds the exclusive write claim on the slot.
        let event = unsafe { &mut *self.ring_buffer.slot_ptr(sequence) };
        translator.translate_to(event, sequence);
        self.sequencer.publish(sequence);
    }
}
