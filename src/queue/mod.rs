/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! Disruptor-inspired ring and the primitives to coordinate producers and consumer stages on it.
//! Producers claim sequences on the ring, write the corresponding slots and publish them.
//! Consumer stages await on barriers for sequences to be published, either directly by producers or by upstream stages.

mod barriers;
mod processors;
mod producers;
mod ring;
mod wait;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicI64, Ordering};

use crossbeam_utils::CachePadded;

pub use barriers::SequenceBarrier;
pub(crate) use processors::{EventProcessor, StateCell};
pub use processors::{ErrorAction, ErrorHandler, EventHandler, HaltOnError, LogAndContinue, ProcessorState};
pub use producers::{MultiProducer, Producer, ProducerCoordinator, ProducerMode, SingleProducer};
pub use ring::RingBuffer;
pub use wait::{
    BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy, WaitStrategy, WaitStrategyKind, YieldingWaitStrategy,
};

/// The value of a sequence before anything is published
pub const INITIAL_SEQUENCE: i64 = -1;

/// The position of an event in the ring, shared between threads.
/// There is one sequence for the cursor of producers and one for each consumer stage.
/// For a stage, the sequence is the last event it finished handling, so that downstream stages and producers can track its progress.
///
/// Updates use release semantics and reads use acquire semantics,
/// so that observing a published value also makes visible the writes to the slot that happened before.
#[derive(Debug)]
#[repr(transparent)]
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Default for Sequence {
    #[inline]
    fn default() -> Self {
        Self::new(INITIAL_SEQUENCE)
    }
}

impl Sequence {
    /// Creates a sequence with an initial value
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(value)),
        }
    }

    /// Gets the current value
    #[must_use]
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Publishes a new value
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Sets the value if the current one is `expected`
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically increments the value and returns the new one
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    /// Atomically adds to the value and returns the new one
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }
}

/// Gets the smallest value among the sequences, or `default` when there is none
#[must_use]
#[inline]
pub fn minimum_sequence(sequences: &[Arc<Sequence>], default: i64) -> i64 {
    sequences.iter().map(|s| s.get()).min().unwrap_or(default)
}
