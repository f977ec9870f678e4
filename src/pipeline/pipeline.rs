//! Owning assemblies.
//!
//! [`Pipeline`] wires the fixed ring together (buffer, sequencer, barrier,
//! batch processor), registers the processor's sequence as the gating
//! sequence, and spawns the consumer thread at construction. [`stop`]
//! halts the processor and joins the thread; dropping an unstopped pipeline
//! does the same.
//!
//! [`DynamicPipeline`] is the same shape over the unbounded SPSC ring.
//!
//! [`stop`]: Pipeline::stop

use crate::pipeline::claim_strategy::ClaimStrategyKind;
use crate::pipeline::dynamic_processor::{DynamicProcessor, DynamicProcessorHandle};
use crate::pipeline::dynamic_ring_buffer::DynamicRingBuffer;
use crate::pipeline::event_factory::EventFactory;
use crate::pipeline::event_handler::EventHandler;
use crate::pipeline::event_processor::{BatchEventProcessor, ProcessorHandle};
use crate::pipeline::event_publisher::EventPublisher;
use crate::pipeline::event_translator::EventTranslator;
use crate::pipeline::exception_handler::ExceptionHandler;
use crate::pipeline::ring_buffer::RingBuffer;
use crate::pipeline::sequence::Sequence;
use crate::pipeline::sequencer::Sequencer;
use crate::pipeline::wait_strategy::WaitStrategyKind;
use crate::pipeline::{PipelineError, Result, TimeConfig};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Fixed-capacity event pipeline with its consumer thread.
pub struct Pipeline<T>
where
    T: Send + Sync + 'static,
{
    ring_buffer: Arc<RingBuffer<T>>,
    sequencer: Arc<Sequencer>,
    publisher: EventPublisher<T>,
    processor: ProcessorHandle,
    consumer_thread: Option<JoinHandle<Result<()>>>,
}

impl<T> Pipeline<T>
where
    T: Send + Sync + 'static,
{
    /// Build the pipeline and start its consumer thread.
    ///
    /// `buffer_size` must be positive and is rounded up to the next power
    /// of two. The consumer is running when this returns; events published
    /// from here on are dispatched to `handler` in sequence order.
    pub fn new<F, H>(
        event_factory: F,
        buffer_size: usize,
        claim_kind: ClaimStrategyKind,
        wait_kind: WaitStrategyKind,
        handler: H,
        exception_handler: Option<Box<dyn ExceptionHandler<T>>>,
        time_config: TimeConfig,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
        H: EventHandler<T> + 'static,
    {
        let sequencer = Arc::new(Sequencer::new(
            buffer_size,
            claim_kind,
            wait_kind,
            &time_config,
        )?);
        let ring_buffer = Arc::new(RingBuffer::new(sequencer.buffer_size(), &event_factory)?);

        let mut processor = BatchEventProcessor::new(
            Arc::clone(&ring_buffer),
            sequencer.new_barrier(vec![]),
            handler,
            exception_handler,
            time_config.max_idle(),
        );
        let handle = processor.handle();
        sequencer.set_gating_sequences(vec![handle.sequence()]);

        let consumer_thread = std::thread::Builder::new()
            .name("ringline-consumer".into())
            .spawn(move || processor.run())
            .map_err(PipelineError::Spawn)?;

        Ok(Self {
            publisher: EventPublisher::new(Arc::clone(&ring_buffer), Arc::clone(&sequencer)),
            ring_buffer,
            sequencer,
            processor: handle,
            consumer_thread: Some(consumer_thread),
        })
    }

    /// Claim, translate, publish. Blocks while the ring is full.
    pub fn publish_event(&self, translator: &dyn EventTranslator<T>) {
        self.publisher.publish_event(translator);
    }

    /// Non-blocking publish; `false` when the ring looks full. See
    /// [`EventPublisher::try_publish_event`] for the multi-producer caveat.
    pub fn try_publish_event(&self, translator: &dyn EventTranslator<T>) -> bool {
        self.publisher.try_publish_event(translator)
    }

    /// Advisory: is the ring out of free slots?
    pub fn is_full(&self) -> bool {
        !self.publisher.has_available_capacity()
    }

    /// Published-but-unconsumed slots, in `[0, buffer_size]`.
    pub fn occupied_capacity(&self) -> usize {
        self.sequencer.occupied_capacity()
    }

    /// Free slots.
    pub fn remaining_capacity(&self) -> usize {
        self.sequencer.remaining_capacity()
    }

    /// Actual ring capacity (after power-of-two rounding).
    pub fn buffer_size(&self) -> usize {
        self.sequencer.buffer_size()
    }

    /// Highest published sequence.
    pub fn cursor(&self) -> i64 {
        self.sequencer.cursor()
    }

    /// The consumer's progress sequence.
    pub fn processor_sequence(&self) -> Arc<Sequence> {
        self.processor.sequence()
    }

    /// Shared ring storage, for inspecting published slots.
    pub fn ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring_buffer
    }

    /// Halt the consumer and join its thread. Idempotent; returns the
    /// processor's exit result on first call.
    pub fn stop(&mut self) -> Result<()> {
        let Some(consumer_thread) = self.consumer_thread.take() else {
            return Ok(());
        };
        tracing::debug!("stopping pipeline consumer");
        self.processor.halt();
        match consumer_thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<T> Drop for Pipeline<T>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.consumer_thread.is_some() {
            let _ = self.stop();
        }
    }
}

/// Unbounded SPSC pipeline with its consumer thread.
///
/// Strictly one publishing thread. Publishing never blocks and never
/// fails; the ring grows by whole blocks when the producer outruns the
/// consumer.
pub struct DynamicPipeline<T>
where
    T: Send + 'static,
{
    ring_buffer: Arc<DynamicRingBuffer<T>>,
    processor: DynamicProcessorHandle,
    consumer_thread: Option<JoinHandle<Result<()>>>,
}

impl<T> DynamicPipeline<T>
where
    T: Send + 'static,
{
    /// Build the pipeline and start its consumer thread. `block_size` is
    /// the per-block capacity (rounded up to a power of two). Only
    /// [`WaitStrategyKind::Sleeping`] and [`WaitStrategyKind::Yielding`]
    /// are honored; other kinds degrade to yielding.
    pub fn new<H>(
        block_size: usize,
        wait_kind: WaitStrategyKind,
        handler: H,
        exception_handler: Option<Box<dyn ExceptionHandler<T>>>,
        time_config: TimeConfig,
    ) -> Result<Self>
    where
        H: EventHandler<T> + 'static,
    {
        let ring_buffer = Arc::new(DynamicRingBuffer::new(block_size));
        let mut processor = DynamicProcessor::new(
            Arc::clone(&ring_buffer),
            wait_kind,
            handler,
            exception_handler,
            time_config.max_idle(),
        );
        let handle = processor.handle();

        let consumer_thread = std::thread::Builder::new()
            .name("ringline-dynamic-consumer".into())
            .spawn(move || processor.run())
            .map_err(PipelineError::Spawn)?;

        Ok(Self {
            ring_buffer,
            processor: handle,
            consumer_thread: Some(consumer_thread),
        })
    }

    /// Enqueue one event. Producer thread only; never blocks, allocates a
    /// new block under pressure.
    pub fn publish_event(&self, event: T) {
        self.ring_buffer.enqueue(event);
    }

    /// Advisory; the dynamic ring grows on demand and never reports full.
    pub fn is_full(&self) -> bool {
        !self.ring_buffer.has_available_capacity()
    }

    /// Best-effort count of enqueued-but-unconsumed events.
    pub fn occupied_capacity(&self) -> usize {
        self.ring_buffer.occupied_approx()
    }

    /// Blocks currently in the chain.
    pub fn num_blocks(&self) -> usize {
        self.ring_buffer.num_blocks()
    }

    /// The consumer's advisory progress sequence.
    pub fn processor_sequence(&self) -> Arc<Sequence> {
        self.processor.sequence()
    }

    /// Halt the consumer (it drains what is already queued) and join its
    /// thread. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        let Some(consumer_thread) = self.consumer_thread.take() else {
            return Ok(());
        };
        tracing::debug!("stopping dynamic pipeline consumer");
        self.processor.halt();
        match consumer_thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<T> Drop for DynamicPipeline<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        if self.consumer_thread.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::event_factory::DefaultEventFactory;
    use crate::pipeline::event_translator::event_translator;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct TestEvent {
        value: i64,
    }

    struct SummingHandler {
        sum: Arc<AtomicI64>,
        count: Arc<AtomicI64>,
    }

    impl EventHandler<TestEvent> for SummingHandler {
        fn on_event(
            &mut self,
            _sequence: i64,
            _batch_size: i64,
            _end_of_batch: bool,
            event: Option<&mut TestEvent>,
        ) -> Result<()> {
            if let Some(event) = event {
                self.sum.fetch_add(event.value, Ordering::Relaxed);
                self.count.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let sum = Arc::new(AtomicI64::new(0));
        let count = Arc::new(AtomicI64::new(0));
        let mut pipeline = Pipeline::new(
            DefaultEventFactory::<TestEvent>::new(),
            8,
            ClaimStrategyKind::SingleProducer,
            WaitStrategyKind::Sleeping,
            SummingHandler {
                sum: Arc::clone(&sum),
                count: Arc::clone(&count),
            },
            None,
            TimeConfig::new(),
        )
        .unwrap();

        let translator =
            event_translator(|event: &mut TestEvent, sequence| event.value = sequence);
        for _ in 0..8 {
            pipeline.publish_event(&translator);
        }

        while pipeline.processor_sequence().get() < 7 {
            thread::yield_now();
        }
        pipeline.stop().unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 8);
        assert_eq!(sum.load(Ordering::Relaxed), (0..8).sum::<i64>());
        assert_eq!(pipeline.occupied_capacity(), 0);
    }

    #[test]
    fn test_pipeline_rounds_size_and_rejects_zero() {
        let handler = SummingHandler {
            sum: Arc::new(AtomicI64::new(0)),
            count: Arc::new(AtomicI64::new(0)),
        };
        let pipeline = Pipeline::new(
            DefaultEventFactory::<TestEvent>::new(),
            100,
            ClaimStrategyKind::SingleProducer,
            WaitStrategyKind::Sleeping,
            handler,
            None,
            TimeConfig::new(),
        )
        .unwrap();
        assert_eq!(pipeline.buffer_size(), 128);

        let handler = SummingHandler {
            sum: Arc::new(AtomicI64::new(0)),
            count: Arc::new(AtomicI64::new(0)),
        };
        let result = Pipeline::new(
            DefaultEventFactory::<TestEvent>::new(),
            0,
            ClaimStrategyKind::SingleProducer,
            WaitStrategyKind::Sleeping,
            handler,
            None,
            TimeConfig::new(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidBufferSize(0))));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut pipeline = Pipeline::new(
            DefaultEventFactory::<TestEvent>::new(),
            8,
            ClaimStrategyKind::SingleProducer,
            WaitStrategyKind::Blocking,
            SummingHandler {
                sum: Arc::new(AtomicI64::new(0)),
                count: Arc::new(AtomicI64::new(0)),
            },
            None,
            TimeConfig::new(),
        )
        .unwrap();

        pipeline.stop().unwrap();
        pipeline.stop().unwrap();
    }

    #[test]
    fn test_dynamic_pipeline_end_to_end() {
        let sum = Arc::new(AtomicI64::new(0));
        let count = Arc::new(AtomicI64::new(0));

        struct DynHandler {
            sum: Arc<AtomicI64>,
            count: Arc<AtomicI64>,
        }
        impl EventHandler<i64> for DynHandler {
            fn on_event(
                &mut self,
                _sequence: i64,
                _batch_size: i64,
                _end_of_batch: bool,
                event: Option<&mut i64>,
            ) -> Result<()> {
                if let Some(value) = event {
                    self.sum.fetch_add(*value, Ordering::Relaxed);
                    self.count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
        }

        let mut pipeline = DynamicPipeline::new(
            8,
            WaitStrategyKind::Sleeping,
            DynHandler {
                sum: Arc::clone(&sum),
                count: Arc::clone(&count),
            },
            None,
            TimeConfig::new().with_max_idle(Duration::from_micros(10)),
        )
        .unwrap();

        for value in 0..19 {
            pipeline.publish_event(value);
        }

        // stop() drains whatever is still queued before joining.
        pipeline.stop().unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 19);
        assert_eq!(sum.load(Ordering::Relaxed), (0..19).sum::<i64>());
        assert!(pipeline.num_blocks() >= 3);
        assert_eq!(pipeline.occupied_capacity(), 0);
    }
}
