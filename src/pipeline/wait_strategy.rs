//! Wait strategies.
//!
//! A wait strategy decides how the consumer burns (or saves) CPU while the
//! sequence it needs is not yet published. Every waiting loop checks the
//! barrier's alert flag so a halted pipeline unblocks promptly, and every
//! strategy returns the highest available sequence it observed, which may
//! exceed the requested one and lets the processor drain a whole batch per
//! wait.
//!
//! When the consumer depends on upstream sequences rather than the cursor
//! alone, availability is the minimum of the dependent sequences. Producers
//! only signal cursor advances, so the dependent leg of each strategy
//! re-checks in a loop instead of parking.

use crate::pipeline::sequence::{get_minimum_sequence, Sequence};
use crate::pipeline::sequence_barrier::AlertFlag;
use crate::pipeline::{Result, TimeConfig};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Spins before the sleeping and yielding strategies start backing off.
pub const DEFAULT_WAIT_RETRIES: u32 = 10;

/// Which wait policy the consumer side of a pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategyKind {
    /// Condition variable; saves CPU at the cost of wake-up latency.
    Blocking,
    /// Spin a few times, then sleep a configured interval.
    Sleeping,
    /// Spin a few times, then yield the scheduler.
    Yielding,
    /// Pure spin; lowest latency, one core pinned at 100%.
    BusySpin,
}

/// Consumer-side waiting policy.
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Wait until `sequence` is available, returning the highest available
    /// sequence observed (≥ `sequence`), or [`PipelineError::Alert`] if the
    /// barrier was alerted.
    ///
    /// [`PipelineError::Alert`]: crate::pipeline::PipelineError::Alert
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
    ) -> Result<i64>;

    /// Like [`wait_for`](WaitStrategy::wait_for), but gives up once
    /// `timeout` has elapsed. On timeout the returned sequence may be
    /// smaller than the requested one.
    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
        timeout: Duration,
    ) -> Result<i64>;

    /// Wake any consumer parked inside this strategy. Only the blocking
    /// strategy has anything to do.
    fn signal_all_when_blocking(&self) {}
}

/// Build the wait strategy for `kind`; the sleeping strategy takes its
/// back-off interval from `time_config`.
pub fn new_wait_strategy(kind: WaitStrategyKind, time_config: &TimeConfig) -> Arc<dyn WaitStrategy> {
    match kind {
        WaitStrategyKind::Blocking => Arc::new(BlockingWaitStrategy::new()),
        WaitStrategyKind::Sleeping => {
            Arc::new(SleepingWaitStrategy::with_interval(time_config.sleep_interval()))
        }
        WaitStrategyKind::Yielding => Arc::new(YieldingWaitStrategy::new()),
        WaitStrategyKind::BusySpin => Arc::new(BusySpinWaitStrategy::new()),
    }
}

/// Busy-check the dependent sequences once the cursor has moved far enough.
fn wait_for_dependents(sequence: i64, dependents: &[Arc<Sequence>], alert: &AlertFlag) -> Result<i64> {
    let mut available_sequence = get_minimum_sequence(dependents);
    while available_sequence < sequence {
        alert.check()?;
        available_sequence = get_minimum_sequence(dependents);
    }
    Ok(available_sequence)
}

/// Condition-variable wait strategy.
///
/// Producers call [`signal_all_when_blocking`] after every publish; the
/// signal path takes the same mutex the waiter holds, so an alert or publish
/// landing between the waiter's check and its park cannot be lost.
///
/// [`signal_all_when_blocking`]: WaitStrategy::signal_all_when_blocking
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut available_sequence = cursor.get();
        if available_sequence < sequence {
            let mut guard = self.mutex.lock();
            loop {
                available_sequence = cursor.get();
                if available_sequence >= sequence {
                    break;
                }
                alert.check()?;
                self.condvar.wait(&mut guard);
            }
        }

        if !dependents.is_empty() {
            available_sequence = wait_for_dependents(sequence, dependents, alert)?;
        }
        Ok(available_sequence)
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
        timeout: Duration,
    ) -> Result<i64> {
        let started = Instant::now();
        let mut available_sequence = cursor.get();
        if available_sequence < sequence {
            let mut guard = self.mutex.lock();
            loop {
                available_sequence = cursor.get();
                if available_sequence >= sequence {
                    break;
                }
                alert.check()?;
                let Some(remaining) = timeout.checked_sub(started.elapsed()) else {
                    break;
                };
                let _ = self.condvar.wait_for(&mut guard, remaining);
            }
        }

        if available_sequence >= sequence && !dependents.is_empty() {
            available_sequence = wait_for_dependents(sequence, dependents, alert)?;
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Spin-then-sleep wait strategy.
///
/// Good for bursty traffic with quiet periods: the first
/// [`DEFAULT_WAIT_RETRIES`] rechecks are free spins, after which the
/// consumer sleeps its configured interval between checks. Worst-case
/// halt latency equals the sleep interval.
#[derive(Debug)]
pub struct SleepingWaitStrategy {
    sleep_interval: Duration,
    retries: u32,
}

impl SleepingWaitStrategy {
    pub fn new() -> Self {
        Self::with_interval(TimeConfig::DEFAULT_SLEEP)
    }

    pub fn with_interval(sleep_interval: Duration) -> Self {
        Self {
            sleep_interval,
            retries: DEFAULT_WAIT_RETRIES,
        }
    }

    fn apply_wait(&self, counter: u32, alert: &AlertFlag) -> Result<u32> {
        alert.check()?;
        if counter > 0 {
            Ok(counter - 1)
        } else {
            thread::sleep(self.sleep_interval);
            Ok(0)
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = self.retries;
        if dependents.is_empty() {
            let mut available_sequence = cursor.get();
            while available_sequence < sequence {
                counter = self.apply_wait(counter, alert)?;
                available_sequence = cursor.get();
            }
            Ok(available_sequence)
        } else {
            let mut available_sequence = get_minimum_sequence(dependents);
            while available_sequence < sequence {
                counter = self.apply_wait(counter, alert)?;
                available_sequence = get_minimum_sequence(dependents);
            }
            Ok(available_sequence)
        }
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
        timeout: Duration,
    ) -> Result<i64> {
        let started = Instant::now();
        let mut counter = self.retries;
        let mut available_sequence = available(cursor, dependents);
        while available_sequence < sequence {
            counter = self.apply_wait(counter, alert)?;
            available_sequence = available(cursor, dependents);
            if started.elapsed() > timeout {
                break;
            }
        }
        Ok(available_sequence)
    }
}

/// Spin-then-yield wait strategy; a reasonable compromise between latency
/// and CPU use when cores are not dedicated.
#[derive(Debug, Default)]
pub struct YieldingWaitStrategy {
    retries: u32,
}

impl YieldingWaitStrategy {
    pub fn new() -> Self {
        Self {
            retries: DEFAULT_WAIT_RETRIES,
        }
    }

    fn apply_wait(&self, counter: u32, alert: &AlertFlag) -> Result<u32> {
        alert.check()?;
        if counter > 0 {
            Ok(counter - 1)
        } else {
            thread::yield_now();
            Ok(0)
        }
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = self.retries;
        let mut available_sequence = available(cursor, dependents);
        while available_sequence < sequence {
            counter = self.apply_wait(counter, alert)?;
            available_sequence = available(cursor, dependents);
        }
        Ok(available_sequence)
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
        timeout: Duration,
    ) -> Result<i64> {
        let started = Instant::now();
        let mut counter = self.retries;
        let mut available_sequence = available(cursor, dependents);
        while available_sequence < sequence {
            counter = self.apply_wait(counter, alert)?;
            available_sequence = available(cursor, dependents);
            if started.elapsed() > timeout {
                break;
            }
        }
        Ok(available_sequence)
    }
}

/// Pure busy-spin wait strategy. Lowest and most consistent latency; pin the
/// consumer to a dedicated core before using it.
#[derive(Debug, Default)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut available_sequence = available(cursor, dependents);
        while available_sequence < sequence {
            alert.check()?;
            std::hint::spin_loop();
            available_sequence = available(cursor, dependents);
        }
        Ok(available_sequence)
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AlertFlag,
        timeout: Duration,
    ) -> Result<i64> {
        let started = Instant::now();
        let mut available_sequence = available(cursor, dependents);
        while available_sequence < sequence {
            alert.check()?;
            std::hint::spin_loop();
            available_sequence = available(cursor, dependents);
            if started.elapsed() > timeout {
                break;
            }
        }
        Ok(available_sequence)
    }
}

/// Availability as seen by a consumer: the cursor when it has no upstream
/// dependents, otherwise the slowest dependent.
#[inline]
fn available(cursor: &Sequence, dependents: &[Arc<Sequence>]) -> i64 {
    if dependents.is_empty() {
        cursor.get()
    } else {
        get_minimum_sequence(dependents)
    }
}
