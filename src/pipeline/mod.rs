//! Core of the ringline event pipeline.
//!
//! The pipeline moves preallocated events from one or more producer threads
//! to a single consumer thread through a fixed power-of-two ring. Producers
//! claim monotonically increasing sequence numbers, fill the corresponding
//! slot and publish; the consumer observes published sequences in order and
//! dispatches them in batches to a user handler. All inter-thread
//! coordination happens through cache-line padded atomic sequence counters.
//!
//! An unbounded single-producer/single-consumer variant built from a chain
//! of fixed-size blocks lives in [`dynamic_ring_buffer`] and
//! [`dynamic_processor`].

pub mod claim_strategy;
pub mod dynamic_processor;
pub mod dynamic_ring_buffer;
pub mod event_factory;
pub mod event_handler;
pub mod event_processor;
pub mod event_publisher;
pub mod event_translator;
pub mod exception_handler;
pub mod pipeline;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod sequencer;
pub mod wait_strategy;


pub use claim_strategy::{
    new_claim_strategy, ClaimStrategy, ClaimStrategyKind, LowContentionClaimStrategy,
    MultiProducerClaimStrategy, SingleProducerClaimStrategy,
};
pub use dynamic_processor::{DynamicProcessor, DynamicProcessorHandle};
pub use dynamic_ring_buffer::DynamicRingBuffer;
pub use event_factory::{ClosureEventFactory, DefaultEventFactory, EventFactory};
pub use event_handler::EventHandler;
pub use event_processor::{BatchEventProcessor, ProcessorHandle};
pub use event_publisher::EventPublisher;
pub use event_translator::{event_translator, ClosureEventTranslator, EventTranslator};
pub use exception_handler::{ExceptionHandler, LoggingExceptionHandler};
pub use pipeline::{DynamicPipeline, Pipeline};
pub use ring_buffer::RingBuffer;
pub use sequence::{get_minimum_sequence, LocalSequence, Sequence};
pub use sequence_barrier::{AlertFlag, SequenceBarrier};
pub use sequencer::Sequencer;
pub use wait_strategy::{
    new_wait_strategy, BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy,
    WaitStrategy, WaitStrategyKind, YieldingWaitStrategy,
};

use std::time::Duration;

/// Value of every sequence counter before anything has been published or
/// consumed.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Errors surfaced by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Cooperative shutdown signal. Raised by a barrier (or a handler) while
    /// the consumer is waiting; only ever caught inside the processor loop.
    #[error("alerted while waiting for a sequence")]
    Alert,

    /// A processor's `run()` was entered while it was already running.
    #[error("event processor is already running")]
    AlreadyRunning,

    /// A buffer was requested with zero capacity.
    #[error("buffer size must be positive, got {0}")]
    InvalidBufferSize(usize),

    /// An event handler failed; carries the handler's own error.
    #[error("event handler failed")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The consumer thread could not be spawned.
    #[error("failed to spawn consumer thread")]
    Spawn(#[source] std::io::Error),
}

impl PipelineError {
    /// Wrap an arbitrary handler error.
    pub fn handler<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler(Box::new(error))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Timing knobs shared by wait strategies and processors.
///
/// `sleep` is the back-off interval of the sleeping wait strategy; `max_idle`
/// bounds how long the consumer waits before it runs an idle alarm tick.
#[derive(Debug, Clone, Default)]
pub struct TimeConfig {
    sleep: Option<Duration>,
    max_idle: Option<Duration>,
}

impl TimeConfig {
    pub const DEFAULT_SLEEP: Duration = Duration::from_millis(1);
    pub const DEFAULT_MAX_IDLE: Duration = Duration::from_micros(10);

    pub fn new() -> Self {
        Self::default()
    }

    /// Override the sleeping strategy's back-off interval.
    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = Some(sleep);
        self
    }

    /// Override the consumer's idle-tick interval. `Duration::ZERO` disables
    /// the alarm tick entirely.
    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    pub fn sleep_interval(&self) -> Duration {
        self.sleep.unwrap_or(Self::DEFAULT_SLEEP)
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle.unwrap_or(Self::DEFAULT_MAX_IDLE)
    }
}

/// Round `n` up to the next power of two (`0` and `1` both round to `1`).
pub fn ceil_to_pow2(n: usize) -> usize {
    n.checked_next_power_of_two()
        .unwrap_or(1usize << (usize::BITS - 1))
}
