//! Batch event processor.
//!
//! The single consumer thread's loop: wait on the barrier for the next
//! sequence, dispatch every available event to the handler as one batch,
//! optionally run an idle alarm tick, then advertise progress through the
//! processor's own sequence (which gates producers against wrap).

use crate::pipeline::event_handler::EventHandler;
use crate::pipeline::exception_handler::ExceptionHandler;
use crate::pipeline::ring_buffer::RingBuffer;
use crate::pipeline::sequence::Sequence;
use crate::pipeline::sequence_barrier::SequenceBarrier;
use crate::pipeline::{PipelineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Control handle for a processor whose loop runs on another thread.
///
/// Cloneable; `halt()` and `is_running()` stay valid after the processor
/// has been moved into its thread.
#[derive(Debug, Clone)]
pub struct ProcessorHandle {
    running: Arc<AtomicBool>,
    barrier: Arc<SequenceBarrier>,
    sequence: Arc<Sequence>,
}

impl ProcessorHandle {
    /// Ask the processor to stop: clear the running flag and alert the
    /// barrier so a blocked wait returns promptly. Idempotent.
    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.barrier.alert();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The processor's progress sequence; register it as a gating sequence
    /// on the sequencer feeding this processor.
    pub fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }
}

/// Consumer loop that drains published events in batches.
pub struct BatchEventProcessor<T, H>
where
    H: EventHandler<T>,
{
    running: Arc<AtomicBool>,
    sequence: Arc<Sequence>,
    barrier: Arc<SequenceBarrier>,
    ring_buffer: Arc<RingBuffer<T>>,
    handler: H,
    exception_handler: Option<Box<dyn ExceptionHandler<T>>>,
    max_idle: Duration,
}

impl<T, H> BatchEventProcessor<T, H>
where
    H: EventHandler<T>,
{
    /// `max_idle` bounds each wait so the handler sees a periodic alarm
    /// tick even on an idle buffer; `Duration::ZERO` disables the tick and
    /// waits without a deadline.
    pub fn new(
        ring_buffer: Arc<RingBuffer<T>>,
        barrier: SequenceBarrier,
        handler: H,
        exception_handler: Option<Box<dyn ExceptionHandler<T>>>,
        max_idle: Duration,
    ) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(Sequence::default()),
            barrier: Arc::new(barrier),
            ring_buffer,
            handler,
            exception_handler,
            max_idle,
        }
    }

    /// Control handle usable after the processor moves into its thread.
    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle {
            running: Arc::clone(&self.running),
            barrier: Arc::clone(&self.barrier),
            sequence: Arc::clone(&self.sequence),
        }
    }

    /// The processor's progress sequence.
    pub fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to stop; equivalent to [`ProcessorHandle::halt`].
    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.barrier.alert();
    }

    /// Run the consumer loop on the calling thread until halted.
    ///
    /// Fails with [`PipelineError::AlreadyRunning`] if the loop is active on
    /// another thread. The barrier's alert flag is deliberately not cleared
    /// here: a `halt()` issued before the thread got scheduled must still
    /// stop the loop on its first wait.
    pub fn run(&mut self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning);
        }

        tracing::debug!(max_idle = ?self.max_idle, "event processor starting");
        self.handler.on_start();
        let result = self.process_loop();
        self.handler.on_shutdown();
        tracing::debug!(sequence = self.sequence.get(), "event processor stopped");
        self.running.store(false, Ordering::Release);
        result
    }

    fn process_loop(&mut self) -> Result<()> {
        let tick_enabled = !self.max_idle.is_zero();
        let mut next_sequence = self.sequence.get() + 1;

        loop {
            let wait_result = if tick_enabled {
                self.barrier.wait_for_timeout(next_sequence, self.max_idle)
            } else {
                self.barrier.wait_for(next_sequence)
            };

            let available_sequence = match wait_result {
                Ok(sequence) => sequence,
                Err(PipelineError::Alert) => break,
                Err(error) => return Err(error),
            };

            if available_sequence >= next_sequence {
                match self.dispatch_batch(next_sequence, available_sequence) {
                    Ok(()) => next_sequence = available_sequence + 1,
                    Err(BatchError::Alert) => break,
                    Err(BatchError::Failed { sequence, error }) => {
                        let ring_buffer = Arc::clone(&self.ring_buffer);
                        self.route_to_exception_handler(error, sequence, Some(ring_buffer.get(sequence)))?;
                        // Skip the failing event; the rest of the batch is
                        // picked up again by the next wait.
                        next_sequence = sequence + 1;
                    }
                }
            }

            if tick_enabled {
                match self.handler.on_event(next_sequence, 0, false, None) {
                    Ok(()) => {}
                    Err(PipelineError::Alert) => break,
                    Err(error) => self.route_to_exception_handler(error, next_sequence, None)?,
                }
            }

            self.sequence.set(next_sequence - 1);
        }

        self.sequence.set(next_sequence - 1);
        Ok(())
    }

    /// Dispatch `next..=available` to the handler; `available < next` is an
    /// empty batch (timed-out wait).
    fn dispatch_batch(
        &mut self,
        next_sequence: i64,
        available_sequence: i64,
    ) -> std::result::Result<(), BatchError> {
        let batch_size = available_sequence - next_sequence + 1;
        for sequence in next_sequence..=available_sequence {
            // SAFETY: the barrier reported `sequence` as published and this
            // processor is the only consumer; producers cannot reclaim the
            // slot until our own sequence passes it.
            let event = unsafe { &mut *self.ring_buffer.slot_ptr(sequence) };
            let end_of_batch = sequence == available_sequence;
            match self.handler.on_event(sequence, batch_size, end_of_batch, Some(event)) {
                Ok(()) => {}
                Err(PipelineError::Alert) => return Err(BatchError::Alert),
                Err(error) => return Err(BatchError::Failed { sequence, error }),
            }
        }
        Ok(())
    }

    fn route_to_exception_handler(
        &mut self,
        error: PipelineError,
        sequence: i64,
        event: Option<&T>,
    ) -> Result<()> {
        match self.exception_handler.as_mut() {
            Some(handler) => handler.handle(&error, sequence, event),
            None => {
                tracing::error!(sequence, %error, "event handler failed, no exception handler");
                Ok(())
            }
        }
    }
}

enum BatchError {
    Alert,
    Failed { sequence: i64, error: PipelineError },
}
