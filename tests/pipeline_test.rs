//! Integration tests for the fixed pipeline: claim/publish/wait round
//! trips, wrap-point gating, shutdown latency, and end-to-end consumption
//! in single- and multi-producer configurations.

use ringline::{
    event_translator, ClaimStrategyKind, DefaultEventFactory, EventHandler, Pipeline,
    PipelineError, Result, RingBuffer, Sequence, Sequencer, TimeConfig, WaitStrategyKind,
    INITIAL_CURSOR_VALUE,
};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
struct StubEvent {
    value: i64,
}

fn sequencer_with_gate(
    buffer_size: usize,
    claim_kind: ClaimStrategyKind,
) -> (Arc<Sequencer>, Arc<Sequence>) {
    let sequencer = Arc::new(
        Sequencer::new(
            buffer_size,
            claim_kind,
            WaitStrategyKind::Sleeping,
            &TimeConfig::new(),
        )
        .unwrap(),
    );
    let consumer = Arc::new(Sequence::default());
    sequencer.set_gating_sequences(vec![Arc::clone(&consumer)]);
    (sequencer, consumer)
}

#[test]
fn claim_publish_wait_round_trip() {
    let (sequencer, _consumer) = sequencer_with_gate(64, ClaimStrategyKind::SingleProducer);
    let ring_buffer =
        RingBuffer::new(sequencer.buffer_size(), &DefaultEventFactory::<StubEvent>::new()).unwrap();
    let barrier = sequencer.new_barrier(vec![]);

    assert_eq!(sequencer.cursor(), INITIAL_CURSOR_VALUE);

    let sequence = sequencer.next();
    // SAFETY: claimed and unpublished, this thread owns the slot.
    unsafe {
        (*ring_buffer.slot_ptr(sequence)).value = 1234;
    }
    sequencer.publish(sequence);

    let available = barrier.wait_for(0).unwrap();
    assert_eq!(available, 0);
    assert_eq!(ring_buffer.get(available).value, 1234);
    assert_eq!(sequencer.cursor(), 0);
}

#[test]
fn wait_with_timeout_returns_early_on_empty_ring() {
    let (sequencer, _consumer) = sequencer_with_gate(64, ClaimStrategyKind::SingleProducer);
    let barrier = sequencer.new_barrier(vec![]);

    let available = barrier.wait_for_timeout(0, Duration::from_millis(10)).unwrap();
    assert_eq!(available, INITIAL_CURSOR_VALUE);
}

#[test]
fn forced_claim_publishes_at_specific_sequence() {
    let (sequencer, _consumer) = sequencer_with_gate(64, ClaimStrategyKind::SingleProducer);
    let ring_buffer =
        RingBuffer::new(sequencer.buffer_size(), &DefaultEventFactory::<StubEvent>::new()).unwrap();
    let barrier = sequencer.new_barrier(vec![]);

    let expected_sequence = 5;
    sequencer.claim(expected_sequence);
    unsafe {
        (*ring_buffer.slot_ptr(expected_sequence)).value = expected_sequence;
    }
    sequencer.force_publish(expected_sequence);

    let available = barrier.wait_for(expected_sequence).unwrap();
    assert_eq!(available, expected_sequence);
    assert_eq!(ring_buffer.get(available).value, expected_sequence);
    assert_eq!(sequencer.cursor(), expected_sequence);
}

/// A producer writing `buffer_size + 1` events with a stalled consumer must
/// block on the last claim until the consumer takes one step.
#[test]
fn producer_blocks_at_wrap_point_until_consumer_advances() {
    const BUFFER_SIZE: usize = 64;
    let (sequencer, consumer) = sequencer_with_gate(BUFFER_SIZE, ClaimStrategyKind::SingleProducer);

    let published = Arc::new(AtomicI64::new(0));
    let completed = Arc::new(AtomicBool::new(false));

    let producer = {
        let sequencer = Arc::clone(&sequencer);
        let published = Arc::clone(&published);
        let completed = Arc::clone(&completed);
        thread::spawn(move || {
            for _ in 0..=BUFFER_SIZE {
                let sequence = sequencer.next();
                sequencer.publish(sequence);
                published.fetch_add(1, Ordering::AcqRel);
            }
            completed.store(true, Ordering::Release);
        })
    };

    // Wait until the ring is full and the producer is stuck on the extra
    // claim.
    while published.load(Ordering::Acquire) < BUFFER_SIZE as i64 {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(20));
    assert_eq!(sequencer.cursor(), BUFFER_SIZE as i64 - 1);
    assert!(!completed.load(Ordering::Acquire));

    // One consumer step frees one slot and unblocks the producer.
    consumer.set(0);
    producer.join().unwrap();
    assert!(completed.load(Ordering::Acquire));
    assert_eq!(sequencer.cursor(), BUFFER_SIZE as i64);
}

#[test]
fn halt_interrupts_blocked_consumer_within_milliseconds() {
    let sequencer = Sequencer::new(
        8,
        ClaimStrategyKind::SingleProducer,
        WaitStrategyKind::Blocking,
        &TimeConfig::new(),
    )
    .unwrap();
    let barrier = Arc::new(sequencer.new_barrier(vec![]));

    let waiter = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || barrier.wait_for(0))
    };

    thread::sleep(Duration::from_millis(20));
    let alerted_at = Instant::now();
    barrier.alert();
    let result = waiter.join().unwrap();

    assert!(matches!(result, Err(PipelineError::Alert)));
    assert!(alerted_at.elapsed() < Duration::from_millis(50));
}

struct CollectingHandler {
    values: Arc<Mutex<Vec<i64>>>,
    sequences: Arc<Mutex<Vec<i64>>>,
}

impl EventHandler<StubEvent> for CollectingHandler {
    fn on_event(
        &mut self,
        sequence: i64,
        _batch_size: i64,
        _end_of_batch: bool,
        event: Option<&mut StubEvent>,
    ) -> Result<()> {
        if let Some(event) = event {
            self.values.lock().unwrap().push(event.value);
            self.sequences.lock().unwrap().push(sequence);
        }
        Ok(())
    }
}

#[test]
fn single_producer_events_arrive_in_sequence_order() {
    let values = Arc::new(Mutex::new(Vec::new()));
    let sequences = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new(
        DefaultEventFactory::<StubEvent>::new(),
        8,
        ClaimStrategyKind::SingleProducer,
        WaitStrategyKind::Sleeping,
        CollectingHandler {
            values: Arc::clone(&values),
            sequences: Arc::clone(&sequences),
        },
        None,
        TimeConfig::new(),
    )
    .unwrap();

    let translator = event_translator(|event: &mut StubEvent, sequence| {
        event.value = sequence;
    });
    for _ in 0..8 {
        pipeline.publish_event(&translator);
    }

    while pipeline.processor_sequence().get() < 7 {
        thread::yield_now();
    }
    pipeline.stop().unwrap();

    assert_eq!(*values.lock().unwrap(), (0..8).collect::<Vec<_>>());
    assert_eq!(*sequences.lock().unwrap(), (0..8).collect::<Vec<_>>());
    assert_eq!(pipeline.occupied_capacity(), 0);
}

#[test]
fn try_publish_on_full_ring_fails_without_claiming() {
    struct StallingHandler {
        release: Arc<AtomicBool>,
    }
    impl EventHandler<StubEvent> for StallingHandler {
        fn on_event(
            &mut self,
            _sequence: i64,
            _batch_size: i64,
            _end_of_batch: bool,
            _event: Option<&mut StubEvent>,
        ) -> Result<()> {
            while !self.release.load(Ordering::Acquire) {
                thread::sleep(Duration::from_micros(100));
            }
            Ok(())
        }
    }

    let release = Arc::new(AtomicBool::new(false));
    let mut pipeline = Pipeline::new(
        DefaultEventFactory::<StubEvent>::new(),
        4,
        ClaimStrategyKind::SingleProducer,
        WaitStrategyKind::Sleeping,
        StallingHandler {
            release: Arc::clone(&release),
        },
        None,
        TimeConfig::new(),
    )
    .unwrap();

    let translator = event_translator(|event: &mut StubEvent, sequence| {
        event.value = sequence;
    });

    // The consumer is stalled on the first event, so the ring fills up.
    for _ in 0..4 {
        assert!(pipeline.try_publish_event(&translator));
    }
    let cursor_when_full = pipeline.cursor();
    assert!(pipeline.is_full());
    assert!(!pipeline.try_publish_event(&translator));
    assert_eq!(pipeline.cursor(), cursor_when_full);

    release.store(true, Ordering::Release);
    pipeline.stop().unwrap();
}

/// Three producers over the coalescing multi-producer strategy: the
/// consumer must observe every event exactly once, in strictly increasing
/// sequence order.
#[test]
fn multi_producer_events_arrive_exactly_once_in_order() {
    const PRODUCERS: usize = 3;
    const PER_PRODUCER: usize = 10_000;

    struct OrderCheckingHandler {
        last_sequence: i64,
        count: Arc<AtomicI64>,
        ordered: Arc<AtomicBool>,
    }
    impl EventHandler<StubEvent> for OrderCheckingHandler {
        fn on_event(
            &mut self,
            sequence: i64,
            _batch_size: i64,
            _end_of_batch: bool,
            event: Option<&mut StubEvent>,
        ) -> Result<()> {
            if event.is_some() {
                if sequence != self.last_sequence + 1 {
                    self.ordered.store(false, Ordering::Release);
                }
                self.last_sequence = sequence;
                self.count.fetch_add(1, Ordering::AcqRel);
            }
            Ok(())
        }
    }

    let count = Arc::new(AtomicI64::new(0));
    let ordered = Arc::new(AtomicBool::new(true));
    let pipeline = Pipeline::new(
        DefaultEventFactory::<StubEvent>::new(),
        1024,
        ClaimStrategyKind::MultiProducer,
        WaitStrategyKind::Sleeping,
        OrderCheckingHandler {
            last_sequence: INITIAL_CURSOR_VALUE,
            count: Arc::clone(&count),
            ordered: Arc::clone(&ordered),
        },
        None,
        TimeConfig::new(),
    )
    .unwrap();

    let pipeline = Arc::new(pipeline);
    let translator = Arc::new(event_translator(|event: &mut StubEvent, sequence| {
        event.value = sequence;
    }));

    let mut producers = Vec::new();
    for _ in 0..PRODUCERS {
        let pipeline = Arc::clone(&pipeline);
        let translator = Arc::clone(&translator);
        producers.push(thread::spawn(move || {
            for _ in 0..PER_PRODUCER {
                pipeline.publish_event(translator.as_ref());
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    let expected = (PRODUCERS * PER_PRODUCER) as i64;
    while pipeline.processor_sequence().get() < expected - 1 {
        thread::sleep(Duration::from_millis(1));
    }

    let mut pipeline = Arc::into_inner(pipeline).expect("all producers joined");
    pipeline.stop().unwrap();

    assert_eq!(count.load(Ordering::Acquire), expected);
    assert!(ordered.load(Ordering::Acquire), "sequences regressed or skipped");
}

#[test]
fn low_contention_producers_publish_in_claim_order() {
    const PRODUCERS: usize = 2;
    const PER_PRODUCER: usize = 5_000;

    let count = Arc::new(AtomicI64::new(0));
    struct CountingHandler {
        count: Arc<AtomicI64>,
    }
    impl EventHandler<StubEvent> for CountingHandler {
        fn on_event(
            &mut self,
            _sequence: i64,
            _batch_size: i64,
            _end_of_batch: bool,
            event: Option<&mut StubEvent>,
        ) -> Result<()> {
            if event.is_some() {
                self.count.fetch_add(1, Ordering::AcqRel);
            }
            Ok(())
        }
    }

    let pipeline = Arc::new(
        Pipeline::new(
            DefaultEventFactory::<StubEvent>::new(),
            256,
            ClaimStrategyKind::MultiProducerLowContention,
            WaitStrategyKind::Sleeping,
            CountingHandler {
                count: Arc::clone(&count),
            },
            None,
            TimeConfig::new(),
        )
        .unwrap(),
    );

    let translator = Arc::new(event_translator(|event: &mut StubEvent, sequence| {
        event.value = sequence;
    }));

    let mut producers = Vec::new();
    for _ in 0..PRODUCERS {
        let pipeline = Arc::clone(&pipeline);
        let translator = Arc::clone(&translator);
        producers.push(thread::spawn(move || {
            for _ in 0..PER_PRODUCER {
                pipeline.publish_event(translator.as_ref());
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    let expected = (PRODUCERS * PER_PRODUCER) as i64;
    while pipeline.processor_sequence().get() < expected - 1 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(pipeline.cursor(), expected - 1);

    let mut pipeline = Arc::into_inner(pipeline).expect("all producers joined");
    pipeline.stop().unwrap();
    assert_eq!(count.load(Ordering::Acquire), expected);
}

#[test]
fn idle_ticks_reach_the_handler() {
    struct TickCounter {
        ticks: Arc<AtomicI64>,
    }
    impl EventHandler<StubEvent> for TickCounter {
        fn on_event(
            &mut self,
            _sequence: i64,
            batch_size: i64,
            _end_of_batch: bool,
            event: Option<&mut StubEvent>,
        ) -> Result<()> {
            if event.is_none() {
                assert_eq!(batch_size, 0);
                self.ticks.fetch_add(1, Ordering::AcqRel);
            }
            Ok(())
        }
    }

    let ticks = Arc::new(AtomicI64::new(0));
    let mut pipeline = Pipeline::new(
        DefaultEventFactory::<StubEvent>::new(),
        8,
        ClaimStrategyKind::SingleProducer,
        WaitStrategyKind::Sleeping,
        TickCounter {
            ticks: Arc::clone(&ticks),
        },
        None,
        TimeConfig::new().with_max_idle(Duration::from_millis(1)),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(50));
    pipeline.stop().unwrap();
    assert!(ticks.load(Ordering::Acquire) > 0);
}
