/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! Wait strategies for consumer stages and producers

use alloc::sync::Arc;
use core::fmt::{Debug, Display};
use core::str::FromStr;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_utils::Backoff;

use super::barriers::SequenceBarrier;
use super::{Sequence, minimum_sequence};
use crate::errors::{Alerted, ConfigError};

/// A policy for how a thread waits for a sequence to advance.
/// The choice of a strategy has no effect on correctness, only on latency and CPU usage.
pub trait WaitStrategy: Debug + Send + Sync {
    /// Waits until `sequence` is available.
    /// The available sequence is the minimum of the `dependents`, or the `cursor` when there is no dependent.
    /// Returns the available sequence, which may be greater than the requested one.
    ///
    /// # Errors
    ///
    /// Returns `Alerted` as soon as the barrier is alerted
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &SequenceBarrier,
    ) -> Result<i64, Alerted>;

    /// Wakes up the threads blocked by this strategy, if any
    fn signal_all_when_blocking(&self) {}

    /// Waits a little bit while a producer waits for free slots in the ring
    fn wait_for_capacity(&self, backoff: &Backoff) {
        backoff.snooze();
    }

    /// Waits a little bit while a consumer waits for a sequence claimed by another producer to be published
    fn wait_for_publication(&self, backoff: &Backoff) {
        backoff.snooze();
    }
}

/// Gets the sequence available given a cursor and the dependents
#[inline]
fn available_sequence(cursor: &Sequence, dependents: &[Arc<Sequence>]) -> i64 {
    if dependents.is_empty() {
        cursor.get()
    } else {
        minimum_sequence(dependents, cursor.get())
    }
}

/// Tight loop re-checking the sequence.
/// Lowest latency, at the cost of a full CPU core per waiting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpinWaitStrategy;

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &SequenceBarrier,
    ) -> Result<i64, Alerted> {
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;
            core::hint::spin_loop();
        }
    }

    fn wait_for_capacity(&self, _backoff: &Backoff) {
        core::hint::spin_loop();
    }

    fn wait_for_publication(&self, _backoff: &Backoff) {
        core::hint::spin_loop();
    }
}

/// Spins for a number of tries, then yields the thread to the OS each time
#[derive(Debug, Clone, Copy)]
pub struct YieldingWaitStrategy {
    /// The number of spins before yielding
    spin_tries: u32,
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self { spin_tries: 100 }
    }
}

impl YieldingWaitStrategy {
    /// Creates the strategy with a specific number of spins before yielding
    #[must_use]
    pub fn new(spin_tries: u32) -> Self {
        Self { spin_tries }
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &SequenceBarrier,
    ) -> Result<i64, Alerted> {
        let mut counter = self.spin_tries;
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;
            if counter == 0 {
                std::thread::yield_now();
            } else {
                counter -= 1;
                core::hint::spin_loop();
            }
        }
    }
}

/// Spins, then yields, then sleeps with an increasing interval up to a maximum
#[derive(Debug, Clone, Copy)]
pub struct SleepingWaitStrategy {
    /// The number of spins before yielding
    spin_tries: u32,
    /// The number of yields before sleeping
    yield_tries: u32,
    /// The first sleep interval
    min_sleep: Duration,
    /// The maximum sleep interval
    max_sleep: Duration,
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self {
            spin_tries: 100,
            yield_tries: 100,
            min_sleep: Duration::from_micros(1),
            max_sleep: Duration::from_millis(1),
        }
    }
}

impl SleepingWaitStrategy {
    /// Creates the strategy with specific thresholds and sleep intervals
    #[must_use]
    pub fn new(spin_tries: u32, yield_tries: u32, min_sleep: Duration, max_sleep: Duration) -> Self {
        Self {
            spin_tries,
            yield_tries,
            min_sleep,
            max_sleep: max_sleep.max(min_sleep),
        }
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &SequenceBarrier,
    ) -> Result<i64, Alerted> {
        let mut spins = self.spin_tries;
        let mut yields = self.yield_tries;
        let mut sleep = self.min_sleep;
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;
            if spins > 0 {
                spins -= 1;
                core::hint::spin_loop();
            } else if yields > 0 {
                yields -= 1;
                std::thread::yield_now();
            } else {
                std::thread::sleep(sleep);
                sleep = (sleep * 2).min(self.max_sleep);
            }
        }
    }

    fn wait_for_capacity(&self, backoff: &Backoff) {
        if backoff.is_completed() {
            std::thread::sleep(self.min_sleep);
        } else {
            backoff.snooze();
        }
    }

    fn wait_for_publication(&self, backoff: &Backoff) {
        if backoff.is_completed() {
            std::thread::sleep(self.max_sleep);
        } else {
            backoff.snooze();
        }
    }
}

/// The maximum time a blocked consumer waits for a claimed sequence to be published before checking again
const PUBLICATION_TIMEOUT: Duration = Duration::from_millis(1);

/// Parks waiting threads on a condition variable signalled by producers on publication.
/// Lowest CPU usage, highest and most variable latency.
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    /// The mutex paired with the condition
    mutex: Mutex<()>,
    /// The condition signalled on publication and on alert
    condition: Condvar,
}

impl BlockingWaitStrategy {
    /// Creates the strategy
    #[must_use]
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
        barrier: &SequenceBarrier,
    ) -> Result<i64, Alerted> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
            while cursor.get() < sequence {
                barrier.check_alert()?;
                guard = self.condition.wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
        }
        // the cursor is there, upstream stages should follow shortly
        let backoff = Backoff::new();
        loop {
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;
            backoff.snooze();
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        self.condition.notify_all();
    }

    fn wait_for_capacity(&self, backoff: &Backoff) {
        if backoff.is_completed() {
            std::thread::park_timeout(Duration::from_micros(1));
        } else {
            backoff.snooze();
        }
    }

    fn wait_for_publication(&self, backoff: &Backoff) {
        if backoff.is_completed() {
            // publications and alerts notify the condition, the timeout bounds a missed notification
            let guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
            let _guard = self
                .condition
                .wait_timeout(guard, PUBLICATION_TIMEOUT)
                .unwrap_or_else(PoisonError::into_inner);
        } else {
            backoff.snooze();
        }
    }
}

/// The kind of wait strategy to use, selected in the configuration of a deployment
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStrategyKind {
    /// `BusySpinWaitStrategy`
    BusySpin,
    /// `YieldingWaitStrategy`
    Yielding,
    /// `SleepingWaitStrategy`
    Sleeping,
    /// `BlockingWaitStrategy`
    #[default]
    Blocking,
}

impl WaitStrategyKind {
    /// Builds a new strategy of this kind with the default parameters
    #[must_use]
    pub fn build(self) -> Arc<dyn WaitStrategy> {
        match self {
            Self::BusySpin => Arc::new(BusySpinWaitStrategy),
            Self::Yielding => Arc::new(YieldingWaitStrategy::default()),
            Self::Sleeping => Arc::new(SleepingWaitStrategy::default()),
            Self::Blocking => Arc::new(BlockingWaitStrategy::new()),
        }
    }
}

impl Display for WaitStrategyKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BusySpin => write!(f, "busy-spin"),
            Self::Yielding => write!(f, "yielding"),
            Self::Sleeping => write!(f, "sleeping"),
            Self::Blocking => write!(f, "blocking"),
        }
    }
}

impl FromStr for WaitStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "busy-spin" | "busy_spin" | "busyspin" | "spin" => Ok(Self::BusySpin),
            "yielding" | "yield" => Ok(Self::Yielding),
            "sleeping" | "sleep" => Ok(Self::Sleeping),
            "blocking" | "block" => Ok(Self::Blocking),
            _ => Err(ConfigError::UnknownWaitStrategy(s.to_string())),
        }
    }
}
