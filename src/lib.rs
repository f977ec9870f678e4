//! `ringline`: bounded lock-free event pipeline
//!
//! An in-process, lock-free pipeline that moves preallocated events from
//! one or more producer threads to a single consumer thread through a fixed
//! power-of-two ring, plus an unbounded single-producer/single-consumer
//! variant built from a growing chain of fixed-size blocks.
//!
//! ## Features
//!
//! - **Lock-free hot path**: coordination happens through cache-line padded
//!   atomic sequence counters; the only lock anywhere is the blocking wait
//!   strategy's condition variable
//! - **Zero allocation in steady state**: every slot is preallocated at
//!   construction and overwritten in place
//! - **Pluggable claim strategies**: single producer, multi producer in
//!   strict claim order, or multi producer with cooperative out-of-order
//!   commits through a pending-publication ring
//! - **Pluggable wait strategies**: blocking, sleeping, yielding, busy-spin
//! - **Batch consumption**: one wait can hand the handler a whole run of
//!   published events, with an optional idle alarm tick for timer-driven
//!   work
//! - **Cooperative shutdown**: `stop()` alerts the consumer, which exits
//!   within the wait strategy's bounded latency
//!
//! ## Quick start
//!
//! ```rust
//! use ringline::{
//!     event_translator, ClaimStrategyKind, DefaultEventFactory, EventHandler,
//!     Pipeline, Result, TimeConfig, WaitStrategyKind,
//! };
//!
//! #[derive(Debug, Default)]
//! struct MyEvent {
//!     value: i64,
//! }
//!
//! struct MyHandler;
//!
//! impl EventHandler<MyEvent> for MyHandler {
//!     fn on_event(
//!         &mut self,
//!         sequence: i64,
//!         _batch_size: i64,
//!         _end_of_batch: bool,
//!         event: Option<&mut MyEvent>,
//!     ) -> Result<()> {
//!         if let Some(event) = event {
//!             println!("sequence {sequence}: value {}", event.value);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! // The consumer thread starts with the pipeline.
//! let mut pipeline = Pipeline::new(
//!     DefaultEventFactory::<MyEvent>::new(),
//!     1024,
//!     ClaimStrategyKind::SingleProducer,
//!     WaitStrategyKind::Sleeping,
//!     MyHandler,
//!     None,
//!     TimeConfig::new(),
//! )?;
//!
//! let translator = event_translator(|event: &mut MyEvent, sequence| {
//!     event.value = sequence * 2;
//! });
//! pipeline.publish_event(&translator);
//!
//! pipeline.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Sequence`]: padded atomic counter, the sole synchronization primitive
//! - [`ClaimStrategy`]: reserves sequence ranges and serializes publication
//! - [`WaitStrategy`]: how the consumer waits for the next sequence
//! - [`SequenceBarrier`]: couples a wait strategy with the alert latch
//! - [`RingBuffer`]: preallocated mask-indexed slot storage
//! - [`Sequencer`]: glues claim + wait + cursor + gating sequences
//! - [`EventPublisher`]: claim → translate → publish
//! - [`BatchEventProcessor`]: the consumer loop
//! - [`DynamicRingBuffer`] / [`DynamicProcessor`]: the unbounded SPSC pair
//! - [`Pipeline`] / [`DynamicPipeline`]: owning assemblies with the
//!   consumer thread
//!
//! Multi-consumer graphs are out of scope, but the hooks to build them are
//! exposed: register extra gating sequences on the [`Sequencer`] and hand
//! dependent sequences to [`Sequencer::new_barrier`].

pub mod pipeline;

pub use pipeline::{
    ceil_to_pow2, event_translator, get_minimum_sequence, new_claim_strategy, new_wait_strategy,
    AlertFlag, BatchEventProcessor, BlockingWaitStrategy, BusySpinWaitStrategy, ClaimStrategy,
    ClaimStrategyKind, ClosureEventFactory, ClosureEventTranslator, DefaultEventFactory,
    DynamicPipeline, DynamicProcessor, DynamicProcessorHandle, DynamicRingBuffer, EventFactory,
    EventHandler, EventPublisher, EventTranslator, ExceptionHandler, LocalSequence,
    LoggingExceptionHandler, LowContentionClaimStrategy, MultiProducerClaimStrategy, Pipeline,
    PipelineError, ProcessorHandle, Result, RingBuffer, Sequence, SequenceBarrier, Sequencer,
    SingleProducerClaimStrategy, SleepingWaitStrategy, TimeConfig, WaitStrategy, WaitStrategyKind,
    YieldingWaitStrategy, INITIAL_CURSOR_VALUE,
};
