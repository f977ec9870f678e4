//! Sequence barrier.
//!
//! The barrier is the consumer's one entry point for waiting: it couples a
//! wait strategy with the cursor, the list of upstream sequences the
//! consumer depends on, and the alert latch used for cooperative shutdown.
//! `alert()` is the only way a consumer is ever told to stop.

use crate::pipeline::sequence::Sequence;
use crate::pipeline::wait_strategy::WaitStrategy;
use crate::pipeline::{PipelineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Atomic latch raised to interrupt a waiting consumer.
#[derive(Debug, Default)]
pub struct AlertFlag {
    alerted: AtomicBool,
}

impl AlertFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    /// Raise [`PipelineError::Alert`] if the latch is set. Called inside
    /// every wait loop.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_alerted() {
            Err(PipelineError::Alert)
        } else {
            Ok(())
        }
    }
}

/// Wait point for a consumer, gated on the cursor and any dependent
/// sequences.
#[derive(Debug)]
pub struct SequenceBarrier {
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    dependent_sequences: Vec<Arc<Sequence>>,
    alert: AlertFlag,
}

impl SequenceBarrier {
    pub fn new(
        wait_strategy: Arc<dyn WaitStrategy>,
        cursor: Arc<Sequence>,
        dependent_sequences: Vec<Arc<Sequence>>,
    ) -> Self {
        Self {
            wait_strategy,
            cursor,
            dependent_sequences,
            alert: AlertFlag::new(),
        }
    }

    /// Wait until `sequence` is available; returns the highest available
    /// sequence (≥ `sequence`) or [`PipelineError::Alert`].
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.wait_strategy.wait_for(
            sequence,
            &self.cursor,
            &self.dependent_sequences,
            &self.alert,
        )
    }

    /// Wait until `sequence` is available or `timeout` elapses. After a
    /// timeout the returned sequence may be smaller than the requested one.
    pub fn wait_for_timeout(&self, sequence: i64, timeout: Duration) -> Result<i64> {
        self.wait_strategy.wait_for_timeout(
            sequence,
            &self.cursor,
            &self.dependent_sequences,
            &self.alert,
            timeout,
        )
    }

    /// Current cursor value.
    pub fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    /// Interrupt any wait in progress and make future waits fail until
    /// [`clear_alert`](Self::clear_alert). Also wakes a consumer parked in
    /// the blocking strategy, so halt latency stays bounded.
    pub fn alert(&self) {
        self.alert.alert();
        self.wait_strategy.signal_all_when_blocking();
    }

    pub fn clear_alert(&self) {
        self.alert.clear();
    }

    pub fn is_alerted(&self) -> bool {
        self.alert.is_alerted()
    }

    /// Raise [`PipelineError::Alert`] if alerted.
    pub fn check_alert(&self) -> Result<()> {
        self.alert.check()
    }
}
