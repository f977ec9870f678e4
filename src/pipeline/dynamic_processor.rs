//! Consumer loop for the dynamic ring.
//!
//! Unlike the fixed pipeline there is no cursor to wait on: the loop polls
//! the buffer's approximate occupancy, drains what it sees as one batch,
//! and backs off (sleep or yield) when the buffer is empty. The halt flag
//! is checked from the idle branch, so a halted processor first drains
//! everything already enqueued and then stops.

use crate::pipeline::dynamic_ring_buffer::DynamicRingBuffer;
use crate::pipeline::event_handler::EventHandler;
use crate::pipeline::exception_handler::ExceptionHandler;
use crate::pipeline::sequence::Sequence;
use crate::pipeline::wait_strategy::WaitStrategyKind;
use crate::pipeline::{PipelineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Idle iterations spun before the back-off kicks in.
const MAX_IDLE_RETRIES: u32 = 1;

/// Back-off applied when the buffer is empty. Blocking and busy-spin have
/// no meaningful rendering over a polled queue and degrade to yielding.
#[derive(Debug, Clone, Copy)]
enum IdlePolicy {
    Sleep(Duration),
    Yield,
}

impl IdlePolicy {
    fn from_kind(kind: WaitStrategyKind, max_idle: Duration) -> Self {
        match kind {
            WaitStrategyKind::Sleeping if !max_idle.is_zero() => Self::Sleep(max_idle),
            _ => Self::Yield,
        }
    }

    /// Burn one idle iteration. Returns `true` once the back-off actually
    /// slept or yielded, which is the loop's cue to re-check the running
    /// flag.
    fn idle(self, retries: &mut u32) -> bool {
        if *retries > 0 {
            *retries -= 1;
            return false;
        }
        match self {
            Self::Sleep(interval) => thread::sleep(interval),
            Self::Yield => thread::yield_now(),
        }
        true
    }
}

/// Control handle for a dynamic processor running on another thread.
#[derive(Debug, Clone)]
pub struct DynamicProcessorHandle {
    running: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    sequence: Arc<Sequence>,
}

impl DynamicProcessorHandle {
    /// Ask the loop to stop. The latch holds even if the loop has not
    /// started yet, and the processor drains already-enqueued events before
    /// it exits. Idempotent.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Advisory progress counter (total events consumed − 1).
    pub fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }
}

/// Single-consumer loop over a [`DynamicRingBuffer`].
pub struct DynamicProcessor<T, H>
where
    H: EventHandler<T>,
{
    running: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    sequence: Arc<Sequence>,
    ring_buffer: Arc<DynamicRingBuffer<T>>,
    handler: H,
    exception_handler: Option<Box<dyn ExceptionHandler<T>>>,
    idle_policy: IdlePolicy,
    max_idle: Duration,
}

impl<T, H> DynamicProcessor<T, H>
where
    H: EventHandler<T>,
{
    /// `wait_kind` selects the idle back-off ([`WaitStrategyKind::Sleeping`]
    /// and [`WaitStrategyKind::Yielding`] are honored, anything else
    /// degrades to yielding); `max_idle` is both the sleep interval and the
    /// alarm-tick switch (zero disables ticks).
    pub fn new(
        ring_buffer: Arc<DynamicRingBuffer<T>>,
        wait_kind: WaitStrategyKind,
        handler: H,
        exception_handler: Option<Box<dyn ExceptionHandler<T>>>,
        max_idle: Duration,
    ) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            halted: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(Sequence::default()),
            ring_buffer,
            handler,
            exception_handler,
            idle_policy: IdlePolicy::from_kind(wait_kind, max_idle),
            max_idle,
        }
    }

    pub fn handle(&self) -> DynamicProcessorHandle {
        DynamicProcessorHandle {
            running: Arc::clone(&self.running),
            halted: Arc::clone(&self.halted),
            sequence: Arc::clone(&self.sequence),
        }
    }

    pub fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to stop; equivalent to
    /// [`DynamicProcessorHandle::halt`].
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Run the consumer loop on the calling thread until halted and
    /// drained. Fails with [`PipelineError::AlreadyRunning`] if already
    /// active. The halt latch is deliberately not cleared here: a `halt()`
    /// issued before the thread got scheduled must still stop the loop.
    pub fn run(&mut self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning);
        }

        tracing::debug!(max_idle = ?self.max_idle, "dynamic processor starting");
        self.handler.on_start();
        let result = self.process_loop();
        self.handler.on_shutdown();
        tracing::debug!(sequence = self.sequence.get(), "dynamic processor stopped");
        self.running.store(false, Ordering::Release);
        result
    }

    fn process_loop(&mut self) -> Result<()> {
        let tick_enabled = !self.max_idle.is_zero();
        let mut retries = MAX_IDLE_RETRIES;

        loop {
            let available = self.ring_buffer.occupied_approx() as i64;

            if available == 0 {
                if self.idle_policy.idle(&mut retries) {
                    retries = MAX_IDLE_RETRIES;
                    if self.halted.load(Ordering::Acquire) {
                        break;
                    }
                }
            } else {
                match self.drain_batch(available) {
                    Ok(()) => {}
                    Err(PipelineError::Alert) => break,
                    Err(error) => return Err(error),
                }
                retries = MAX_IDLE_RETRIES;
            }

            if tick_enabled && retries == MAX_IDLE_RETRIES {
                match self.handler.on_event(self.sequence.get() + 1, 0, false, None) {
                    Ok(()) => {}
                    Err(PipelineError::Alert) => break,
                    Err(error) => {
                        self.route_to_exception_handler(error, self.sequence.get() + 1, None)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Dequeue up to `available` events and dispatch them as one batch.
    fn drain_batch(&mut self, available: i64) -> Result<()> {
        let mut drained = 0;
        while drained < available {
            let Some(mut event) = self.ring_buffer.dequeue() else {
                break;
            };
            let sequence = self.sequence.get() + 1 + drained;
            let end_of_batch = drained + 1 == available;
            let dispatch = self
                .handler
                .on_event(sequence, available, end_of_batch, Some(&mut event));
            match dispatch {
                Ok(()) => drained += 1,
                Err(PipelineError::Alert) => {
                    self.sequence.add_and_get_relaxed(drained + 1);
                    return Err(PipelineError::Alert);
                }
                Err(error) => {
                    drained += 1;
                    self.route_to_exception_handler(error, sequence, Some(&event))?;
                }
            }
        }
        self.sequence.add_and_get_relaxed(drained);
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
