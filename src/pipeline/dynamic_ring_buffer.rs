//! Unbounded single-producer/single-consumer ring.
//!
//! A circular chain of fixed-size blocks, each a power-of-two slot array
//! with its own head (consumer) and tail (producer) index. The producer
//! fills a block, then either recycles the next block in the cycle (when
//! the consumer has fully drained it and is not parked in it) or allocates
//! a fresh block and splices it into the chain. Blocks are never freed
//! while the buffer lives: the common enqueue/dequeue path stays wait-free
//! and there is no reclamation to race against. Memory therefore only
//! grows, to the high-water mark of how far the producer ever outran the
//! consumer.
//!
//! Exactly one thread may enqueue and exactly one may dequeue. The handles
//! are `&self` (the buffer is shared through an `Arc` by the owning
//! pipeline); upholding the one-producer/one-consumer contract is the
//! caller's responsibility and is enforced by the owning pipeline type.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// One fixed-size segment of the chain.
struct Block<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Consumer index: slots below it have been moved out.
    head: CachePadded<AtomicUsize>,
    /// Producer index: slots below it hold live values.
    tail: CachePadded<AtomicUsize>,
    /// Next block in the cycle. Written by the producer when splicing in a
    /// new block, read by the consumer when advancing.
    next: AtomicPtr<Block<T>>,
}

impl<T> Block<T> {
    fn new(block_size: usize) -> Box<Self> {
        let slots: Box<[UnsafeCell<MaybeUninit<T>>]> = (0..block_size)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Box::new(Self {
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            next: AtomicPtr::new(std::ptr::null_mut()),
        })
    }
}

/// Growable SPSC queue over a block chain.
pub struct DynamicRingBuffer<T> {
    /// Block the producer is currently filling. Only the producer reads or
    /// writes this pointer.
    producer_block: AtomicPtr<Block<T>>,
    /// Block the consumer is currently draining. Written by the consumer,
    /// read by the producer to avoid recycling under a parked consumer.
    consumer_block: AtomicPtr<Block<T>>,
    block_size: usize,
    num_blocks: AtomicUsize,
}

impl<T> DynamicRingBuffer<T> {
    /// Create a buffer whose blocks hold `block_size` events each (rounded
    /// up to a power of two; a zero size rounds to 1).
    pub fn new(block_size: usize) -> Self {
        let block_size = crate::pipeline::ceil_to_pow2(block_size.max(1));
        let first = Box::into_raw(Block::<T>::new(block_size));
        // A single block linked to itself closes the cycle.
        // SAFETY: `first` was just allocated and is valid.
        unsafe {
            (*first).next.store(first, Ordering::Release);
        }
        Self {
            producer_block: AtomicPtr::new(first),
            consumer_block: AtomicPtr::new(first),
            block_size,
            num_blocks: AtomicUsize::new(1),
        }
    }

    /// Slots per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Blocks currently in the cycle. Grows, never shrinks.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks.load(Ordering::Acquire)
    }

    /// Append `value`. Producer thread only. Never blocks; allocates a new
    /// block when the chain is out of drained blocks to recycle.
    pub fn enqueue(&self, value: T) {
        let mut block_ptr = self.producer_block.load(Ordering::Relaxed);
        // SAFETY: blocks are never freed while the buffer lives, so the
        // producer's block pointer is always valid.
        let mut block = unsafe { &*block_ptr };
        let mut tail = block.tail.load(Ordering::Relaxed);

        if tail == self.block_size {
            block_ptr = self.advance_producer(block_ptr);
            block = unsafe { &*block_ptr };
            tail = 0;
        }

        // SAFETY: `tail < block_size`; the producer owns [tail, block_size)
        // of its current block, the consumer only reads below tail.
        unsafe {
            (*block.slots[tail].get()).write(value);
        }
        block.tail.store(tail + 1, Ordering::Release);
    }

    /// Move the producer to the next writable block, recycling or
    /// allocating as needed. Returns the new producer block.
    fn advance_producer(&self, current_ptr: *mut Block<T>) -> *mut Block<T> {
        // SAFETY: see enqueue; block pointers stay valid for the buffer's
        // lifetime.
        let current = unsafe { &*current_ptr };
        let next_ptr = current.next.load(Ordering::Acquire);
        let next = unsafe { &*next_ptr };

        let consumer_ptr = self.consumer_block.load(Ordering::Acquire);
        let next_drained = next.head.load(Ordering::Acquire) >= self.block_size;

        let target_ptr = if next_ptr != consumer_ptr && next_drained {
            // Recycle: the consumer finished this block and has moved on,
            // so nobody else touches its indices until we publish into it.
            // Tail must be reset before head: a consumer that acquires the
            // new-epoch head may not observe the old-epoch tail, or it
            // would read slots this producer has not written yet.
            next.tail.store(0, Ordering::Relaxed);
            next.head.store(0, Ordering::Release);
            next_ptr
        } else {
            // The next block is still draining (or the consumer is parked
            // in it): splice a fresh block between current and next.
            let fresh = Box::into_raw(Block::<T>::new(self.block_size));
            // SAFETY: `fresh` was just allocated.
            unsafe {
                (*fresh).next.store(next_ptr, Ordering::Relaxed);
            }
            current.next.store(fresh, Ordering::Release);
            let total = self.num_blocks.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::trace!(blocks = total, "growing dynamic ring by one block");
            fresh
        };

        self.producer_block.store(target_ptr, Ordering::Relaxed);
        target_ptr
    }

    /// Remove and return the oldest value, or `None` when the buffer is
    /// empty. Consumer thread only.
    pub fn dequeue(&self) -> Option<T> {
        // SAFETY: blocks are never freed while the buffer lives.
        let mut block = unsafe { &*self.consumer_block.load(Ordering::Relaxed) };
        let mut head = block.head.load(Ordering::Relaxed);

        if head == self.block_size {
            // Current block fully drained: advance only into a block that
            // already has data, so we never step around an all-empty cycle.
            let next_ptr = block.next.load(Ordering::Acquire);
            let next = unsafe { &*next_ptr };
            let next_head = next.head.load(Ordering::Acquire);
            if next.tail.load(Ordering::Acquire) <= next_head {
                return None;
            }
            self.consumer_block.store(next_ptr, Ordering::Release);
            block = next;
            head = next_head;
        }

        if head >= block.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `head < tail`, so the slot holds an initialized value the
        // producer released; moving it out is exclusive to the consumer.
        let value = unsafe { (*block.slots[head].get()).assume_init_read() };
        block.head.store(head + 1, Ordering::Release);
        Some(value)
    }

    /// Best-effort count of values waiting to be consumed. Exact when both
    /// threads are quiescent.
    pub fn occupied_approx(&self) -> usize {
        self.fold_blocks(0, |acc, block| {
            let tail = block.tail.load(Ordering::Acquire);
            let head = block.head.load(Ordering::Acquire);
            acc + tail.saturating_sub(head)
        })
    }

    /// Best-effort count of free slots across all blocks.
    pub fn available_approx(&self) -> usize {
        let total = self.num_blocks() * self.block_size;
        total.saturating_sub(self.occupied_approx())
    }

    /// Advisory: the buffer grows on demand, so capacity is only exhausted
    /// by allocation failure.
    pub fn has_available_capacity(&self) -> bool {
        true
    }

    /// Walk the cycle exactly once, folding over every block.
    fn fold_blocks<A>(&self, init: A, mut f: impl FnMut(A, &Block<T>) -> A) -> A {
        let start = self.consumer_block.load(Ordering::Acquire);
        let mut acc = init;
        let mut current = start;
        loop {
            // SAFETY: blocks are never freed while the buffer lives.
            let block = unsafe { &*current };
            acc = f(acc, block);
            current = block.next.load(Ordering::Acquire);
            if current == start {
                return acc;
            }
        }
    }
}

impl<T> Drop for DynamicRingBuffer<T> {
    fn drop(&mut self) {
        // Exclusive access here: collect the cycle, drop live values, free
        // the blocks.
        let start = self.consumer_block.load(Ordering::Relaxed);
        let mut current = start;
        loop {
            // SAFETY: pointers in the cycle are all Box::into_raw results
            // and each is visited exactly once.
            let block = unsafe { Box::from_raw(current) };
            let next = block.next.load(Ordering::Relaxed);
            let head = block.head.load(Ordering::Relaxed);
            let tail = block.tail.load(Ordering::Relaxed);
            for index in head..tail {
                // SAFETY: [head, tail) holds initialized, unconsumed values.
                unsafe {
                    (*block.slots[index].get()).assume_init_drop();
                }
            }
            if next == start {
                break;
            }
            current = next;
        }
    }
}

// SAFETY: the producer and consumer touch disjoint index ranges of each
// block, hand-offs go through release stores of tail/head/next matched by
// acquire loads, and blocks are never freed while shared. T: Send suffices
// because values move across threads but are never aliased.
unsafe impl<T: Send> Send for DynamicRingBuffer<T> {}
unsafe impl<T: Send> Sync for DynamicRingBuffer<T> {}
