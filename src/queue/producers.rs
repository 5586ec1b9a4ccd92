/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! The producers for the ring

use alloc::sync::Arc;
use core::fmt::Display;
use core::ops::RangeInclusive;
use core::str::FromStr;
use core::sync::atomic::{AtomicI64, Ordering};

use crossbeam_utils::Backoff;

use super::ring::RingBuffer;
use super::wait::WaitStrategy;
use super::{INITIAL_SEQUENCE, Sequence, minimum_sequence};
use crate::errors::{ConfigError, InsufficientCapacity};

/// The mode for the producers of a pipeline
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerMode {
    /// A single producer claims sequences without any atomic read-modify-write
    #[default]
    Single,
    /// Multiple concurrent producers claim sequences through CAS on the cursor
    Multi,
}

impl Display for ProducerMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

impl FromStr for ProducerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multi" | "multiple" => Ok(Self::Multi),
            _ => Err(ConfigError::UnknownProducerMode(s.to_string())),
        }
    }
}

/// Coordinates producers on the ring, shared by all producers and by the barriers of consumer stages.
///
/// In single producer mode, the cursor is the last published sequence.
/// In multi producer mode, the cursor is the last claimed sequence
/// and each slot has a marker holding the last sequence published in it,
/// so that consumers only see sequences up to the highest contiguous published one.
#[derive(Debug)]
pub struct ProducerCoordinator {
    /// The mode for producers
    mode: ProducerMode,
    /// The capacity of the ring
    capacity: i64,
    /// The mask to use for getting an index within the ring
    mask: usize,
    /// The cursor of the producers
    cursor: Arc<Sequence>,
    /// The sequences of the terminal stages, producers cannot overtake them by more than the capacity
    gating: Box<[Arc<Sequence>]>,
    /// The cache for the minimum gating sequence shared by concurrent producers
    gating_cache: Sequence,
    /// The availability markers in multi producer mode, empty otherwise
    available: Box<[AtomicI64]>,
    /// The strategies of the consumer stages, to be signalled on publication
    strategies: Box<[Arc<dyn WaitStrategy>]>,
    /// The strategy used by producers waiting for free slots
    producer_wait: Arc<dyn WaitStrategy>,
}

impl ProducerCoordinator {
    /// Creates the coordinator
    #[must_use]
    pub(crate) fn new(
        mode: ProducerMode,
        capacity: usize,
        cursor: Arc<Sequence>,
        gating: Vec<Arc<Sequence>>,
        strategies: Vec<Arc<dyn WaitStrategy>>,
        producer_wait: Arc<dyn WaitStrategy>,
    ) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be power of two");
        let available = match mode {
            ProducerMode::Single => Box::default(),
            ProducerMode::Multi => (0..capacity)
                .map(|_| AtomicI64::new(INITIAL_SEQUENCE))
                .collect::<Box<[_]>>(),
        };
        // signal each distinct strategy only once
        let mut distinct: Vec<Arc<dyn WaitStrategy>> = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            if !distinct
                .iter()
                .any(|s| Arc::as_ptr(s).cast::<()>() == Arc::as_ptr(&strategy).cast::<()>())
            {
                distinct.push(strategy);
            }
        }
        #[allow(clippy::cast_possible_wrap)]
        Self {
            mode,
            capacity: capacity as i64,
            mask: capacity - 1,
            cursor,
            gating: gating.into_boxed_slice(),
            gating_cache: Sequence::default(),
            available,
            strategies: distinct.into_boxed_slice(),
            producer_wait,
        }
    }

    /// Gets the mode for producers
    #[must_use]
    #[inline]
    pub fn mode(&self) -> ProducerMode {
        self.mode
    }

    /// Gets the cursor of the producers
    #[must_use]
    #[inline]
    pub fn cursor(&self) -> &Sequence {
        &self.cursor
    }

    /// Gets the minimum of the gating sequences, or `default` when there is none
    #[must_use]
    #[inline]
    pub fn minimum_gating(&self, default: i64) -> i64 {
        minimum_sequence(&self.gating, default)
    }

    /// Gets the number of free slots, given the last claimed sequence
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub(crate) fn remaining_capacity(&self, claimed: i64) -> usize {
        let consumed = self.minimum_gating(claimed);
        (self.capacity - (claimed - consumed)).max(0) as usize
    }

    /// Claims `n` sequences after `claimed` for the single producer.
    /// The minimum gating sequence is cached by the producer in `cached_gating`.
    /// Returns the last claimed sequence.
    pub(crate) fn claim_single(
        &self,
        claimed: i64,
        n: i64,
        cached_gating: &mut i64,
        blocking: bool,
    ) -> Result<i64, InsufficientCapacity> {
        let next = claimed + n;
        let wrap_point = next - self.capacity;
        if wrap_point > *cached_gating || *cached_gating > claimed {
            let backoff = Backoff::new();
            loop {
                let consumed = self.minimum_gating(claimed);
                if wrap_point <= consumed {
                    *cached_gating = consumed;
                    break;
                }
                if !blocking {
                    return Err(InsufficientCapacity);
                }
                self.producer_wait.wait_for_capacity(&backoff);
            }
        }
        Ok(next)
    }

    /// Claims `n` sequences for one of multiple producers, through CAS on the cursor.
    /// Returns the last claimed sequence.
    pub(crate) fn claim_multi(&self, n: i64, blocking: bool) -> Result<i64, InsufficientCapacity> {
        let backoff = Backoff::new();
        loop {
            let current = self.cursor.get();
            let next = current + n;
            let wrap_point = next - self.capacity;
            let cached = self.gating_cache.get();
            if wrap_point > cached || cached > current {
                let consumed = self.minimum_gating(current);
                if wrap_point > consumed {
                    if !blocking {
                        return Err(InsufficientCapacity);
                    }
                    self.producer_wait.wait_for_capacity(&backoff);
                    continue;
                }
                self.gating_cache.set(consumed);
            } else if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            } else {
                // another producer got there first
                backoff.spin();
            }
        }
    }

    /// Publishes the sequences from `low` to `high` included and wakes up blocked consumers
    pub(crate) fn publish(&self, low: i64, high: i64) {
        match self.mode {
            ProducerMode::Single => self.cursor.set(high),
            ProducerMode::Multi => {
                for sequence in low..=high {
                    self.marker(sequence).store(sequence, Ordering::Release);
                }
            }
        }
        for strategy in &self.strategies {
            strategy.signal_all_when_blocking();
        }
    }

    /// Gets the availability marker for a sequence
    #[inline]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn marker(&self, sequence: i64) -> &AtomicI64 {
        debug_assert!(sequence >= 0);
        unsafe { self.available.get_unchecked((sequence as usize) & self.mask) }
    }

    /// Gets whether a sequence is published
    #[must_use]
    #[inline]
    pub fn is_available(&self, sequence: i64) -> bool {
        match self.mode {
            ProducerMode::Single => sequence <= self.cursor.get(),
            ProducerMode::Multi => self.marker(sequence).load(Ordering::Acquire) == sequence,
        }
    }

    /// Gets the highest contiguous published sequence, scanning from `low` up to `available`.
    /// Returns `low - 1` when `low` itself is not yet published.
    #[must_use]
    pub fn highest_published(&self, low: i64, available: i64) -> i64 {
        match self.mode {
            ProducerMode::Single => available,
            ProducerMode::Multi => {
                for sequence in low..=available {
                    if !self.is_available(sequence) {
                        return sequence - 1;
                    }
                }
                available
            }
        }
    }

    /// Gets the highest sequence published so far that consumers may see
    #[must_use]
    pub fn published(&self) -> i64 {
        let cursor = self.cursor.get();
        match self.mode {
            ProducerMode::Single => cursor,
            ProducerMode::Multi => {
                let consumed = self.minimum_gating(cursor);
                self.highest_published(consumed + 1, cursor)
            }
        }
    }
}

/// The range of sequences claimed by a producer and not yet published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Claim {
    /// The next sequence to publish
    next: i64,
    /// The last claimed sequence
    last: i64,
}

/// The common part of producers, tracking their claim
#[derive(Debug)]
struct ProducerCore<E> {
    /// The ring itself
    ring: Arc<RingBuffer<E>>,
    /// The shared coordinator
    coordinator: Arc<ProducerCoordinator>,
    /// The sequences claimed and not yet published
    claim: Option<Claim>,
}

impl<E> Drop for ProducerCore<E> {
    fn drop(&mut self) {
        if let Some(claim) = self.claim {
            log::warn!(
                "producer dropped with claimed sequences {}..={} not published",
                claim.next,
                claim.last
            );
        }
    }
}

impl<E> ProducerCore<E> {
    #[allow(clippy::cast_possible_wrap)]
    fn new(ring: Arc<RingBuffer<E>>, coordinator: Arc<ProducerCoordinator>) -> Self {
        assert_eq!(
            ring.capacity() as i64,
            coordinator.capacity,
            "the ring and the coordinator must have the same capacity"
        );
        Self {
            ring,
            coordinator,
            claim: None,
        }
    }

    /// Checks the producer can claim `n` sequences
    #[allow(clippy::cast_possible_wrap)]
    fn check_claim(&self, n: usize) -> i64 {
        if let Some(claim) = self.claim {
            panic!(
                "sequences {}..={} are claimed but not published",
                claim.next, claim.last
            );
        }
        assert!(
            n > 0 && n <= self.ring.capacity(),
            "the number of sequences to claim must be in 1..={}, got {n}",
            self.ring.capacity()
        );
        n as i64
    }

    /// Records the claim up to `last`
    fn set_claim(&mut self, n: i64, last: i64) -> RangeInclusive<i64> {
        let first = last - n + 1;
        self.claim = Some(Claim { next: first, last });
        first..=last
    }

    /// Gets the slot for a claimed sequence
    fn slot_mut(&mut self, sequence: i64) -> &mut E {
        match self.claim {
            Some(claim) if claim.next <= sequence && sequence <= claim.last => {
                // SAFETY: the sequence is claimed by this producer and not yet published
                unsafe { self.ring.get_slot(sequence) }
            }
            _ => panic!("sequence {sequence} is not claimed by this producer"),
        }
    }

    /// Publishes the claimed sequences from `low` to `high`
    fn publish(&mut self, low: i64, high: i64) {
        let Some(claim) = self.claim else {
            panic!("sequences {low}..={high} are not claimed by this producer");
        };
        assert!(
            low == claim.next && low <= high && high <= claim.last,
            "sequences {low}..={high} cannot be published, expected a range starting at {} and ending at most at {}",
            claim.next,
            claim.last
        );
        self.coordinator.publish(low, high);
        self.claim = if high == claim.last {
            None
        } else {
            Some(Claim {
                next: high + 1,
                last: claim.last,
            })
        };
    }
}

/// The API for producers pushing events onto a ring.
///
/// Producing an event follows the claim/publish protocol:
/// claim one or more sequences with `next` or `next_n`, write the claimed slots with `get_mut`,
/// then publish them in order with `publish` or `publish_range`.
/// A producer holds at most one claim at a time.
/// Breaking the protocol (claiming twice, publishing unclaimed sequences) is a programming error and panics.
pub trait Producer<E> {
    /// Gets the capacity of the ring
    #[must_use]
    fn capacity(&self) -> usize;

    /// Gets the current value of the cursor of the producers
    #[must_use]
    fn cursor(&self) -> i64;

    /// Gets the number of slots that can be claimed without waiting
    #[must_use]
    fn remaining_capacity(&self) -> usize;

    /// Claims the next `n` sequences, waiting for free slots when the ring is full
    fn next_n(&mut self, n: usize) -> RangeInclusive<i64>;

    /// Attempts to claim the next `n` sequences
    ///
    /// # Errors
    ///
    /// Returns `InsufficientCapacity` when the ring does not have `n` free slots
    fn try_next_n(&mut self, n: usize) -> Result<RangeInclusive<i64>, InsufficientCapacity>;

    /// Gets the slot for a sequence claimed by this producer
    fn get_mut(&mut self, sequence: i64) -> &mut E;

    /// Publishes the claimed sequences from `low` to `high` included.
    /// `low` must be the first claimed sequence not yet published.
    fn publish_range(&mut self, low: i64, high: i64);

    /// Claims the next sequence, waiting for a free slot when the ring is full
    fn next(&mut self) -> i64 {
        *self.next_n(1).end()
    }

    /// Attempts to claim the next sequence
    ///
    /// # Errors
    ///
    /// Returns `InsufficientCapacity` when the ring is full
    fn try_next(&mut self) -> Result<i64, InsufficientCapacity> {
        self.try_next_n(1).map(|range| *range.end())
    }

    /// Publishes a claimed sequence
    fn publish(&mut self, sequence: i64) {
        self.publish_range(sequence, sequence);
    }

    /// Claims a sequence, writes its slot with `writer` and publishes it
    fn publish_event<F>(&mut self, writer: F) -> i64
    where
        F: FnOnce(&mut E, i64),
    {
        let sequence = self.next();
        writer(self.get_mut(sequence), sequence);
        self.publish(sequence);
        sequence
    }

    /// Attempts to claim a sequence, writes its slot with `writer` and publishes it
    ///
    /// # Errors
    ///
    /// Returns `InsufficientCapacity` when the ring is full, `writer` is not called
    fn try_publish_event<F>(&mut self, writer: F) -> Result<i64, InsufficientCapacity>
    where
        F: FnOnce(&mut E, i64),
    {
        let sequence = self.try_next()?;
        writer(self.get_mut(sequence), sequence);
        self.publish(sequence);
        Ok(sequence)
    }

    /// Claims `n` sequences, writes each slot with `writer` and publishes them
    fn publish_events<F>(&mut self, n: usize, mut writer: F) -> RangeInclusive<i64>
    where
        F: FnMut(&mut E, i64),
    {
        let range = self.next_n(n);
        for sequence in range.clone() {
            writer(self.get_mut(sequence), sequence);
        }
        self.publish_range(*range.start(), *range.end());
        range
    }

    /// Attempts to claim `n` sequences, writes each slot with `writer` and publishes them
    ///
    /// # Errors
    ///
    /// Returns `InsufficientCapacity` when the ring does not have `n` free slots, `writer` is not called
    fn try_publish_events<F>(&mut self, n: usize, mut writer: F) -> Result<RangeInclusive<i64>, InsufficientCapacity>
    where
        F: FnMut(&mut E, i64),
    {
        let range = self.try_next_n(n)?;
        for sequence in range.clone() {
            writer(self.get_mut(sequence), sequence);
        }
        self.publish_range(*range.start(), *range.end());
        Ok(range)
    }
}

/// A single producer that will be the only producer for a ring
#[derive(Debug)]
pub struct SingleProducer<E> {
    /// The common part
    core: ProducerCore<E>,
    /// The last claimed sequence
    claimed: i64,
    /// The cache for the minimum gating sequence
    cached_gating: i64,
}

impl<E> SingleProducer<E> {
    /// Creates the producer for a ring
    #[must_use]
    pub(crate) fn new(ring: Arc<RingBuffer<E>>, coordinator: Arc<ProducerCoordinator>) -> Self {
        assert_eq!(
            coordinator.mode(),
            ProducerMode::Single,
            "a single producer requires a coordinator in single mode"
        );
        let claimed = coordinator.cursor().get();
        Self {
            core: ProducerCore::new(ring, coordinator),
            claimed,
            cached_gating: INITIAL_SEQUENCE,
        }
    }

    fn claim(&mut self, n: usize, blocking: bool) -> Result<RangeInclusive<i64>, InsufficientCapacity> {
        let n = self.core.check_claim(n);
        let last = self
            .core
            .coordinator
            .claim_single(self.claimed, n, &mut self.cached_gating, blocking)?;
        self.claimed = last;
        Ok(self.core.set_claim(n, last))
    }
}

impl<E> Producer<E> for SingleProducer<E> {
    #[inline]
    fn capacity(&self) -> usize {
        self.core.ring.capacity()
    }

    #[inline]
    fn cursor(&self) -> i64 {
        self.core.coordinator.cursor().get()
    }

    fn remaining_capacity(&self) -> usize {
        self.core.coordinator.remaining_capacity(self.claimed)
    }

    fn next_n(&mut self, n: usize) -> RangeInclusive<i64> {
        match self.claim(n, true) {
            Ok(range) => range,
            Err(_) => unreachable!("blocking claims always succeed"),
        }
    }

    fn try_next_n(&mut self, n: usize) -> Result<RangeInclusive<i64>, InsufficientCapacity> {
        self.claim(n, false)
    }

    #[inline]
    fn get_mut(&mut self, sequence: i64) -> &mut E {
        self.core.slot_mut(sequence)
    }

    #[inline]
    fn publish_range(&mut self, low: i64, high: i64) {
        self.core.publish(low, high);
    }
}

/// A producer for a ring that can be concurrent with other producers.
/// Cloning a producer gives a new producer on the same ring, without any claim.
#[derive(Debug)]
pub struct MultiProducer<E> {
    /// The common part
    core: ProducerCore<E>,
}

impl<E> Clone for MultiProducer<E> {
    fn clone(&self) -> Self {
        Self {
            core: ProducerCore::new(self.core.ring.clone(), self.core.coordinator.clone()),
        }
    }
}

impl<E> MultiProducer<E> {
    /// Creates a producer for a ring
    #[must_use]
    pub(crate) fn new(ring: Arc<RingBuffer<E>>, coordinator: Arc<ProducerCoordinator>) -> Self {
        assert_eq!(
            coordinator.mode(),
            ProducerMode::Multi,
            "a concurrent producer requires a coordinator in multi mode"
        );
        Self {
            core: ProducerCore::new(ring, coordinator),
        }
    }

    fn claim(&mut self, n: usize, blocking: bool) -> Result<RangeInclusive<i64>, InsufficientCapacity> {
        let n = self.core.check_claim(n);
        let last = self.core.coordinator.claim_multi(n, blocking)?;
        Ok(self.core.set_claim(n, last))
    }
}

impl<E> Producer<E> for MultiProducer<E> {
    #[inline]
    fn capacity(&self) -> usize {
        self.core.ring.capacity()
    }

    #[inline]
    fn cursor(&self) -> i64 {
        self.core.coordinator.cursor().get()
    }

    fn remaining_capacity(&self) -> usize {
        let coordinator = &self.core.coordinator;
        coordinator.remaining_capacity(coordinator.cursor().get())
    }

    fn next_n(&mut self, n: usize) -> RangeInclusive<i64> {
        match self.claim(n, true) {
            Ok(range) => range,
            Err(_) => unreachable!("blocking claims always succeed"),
        }
    }

    fn try_next_n(&mut self, n: usize) -> Result<RangeInclusive<i64>, InsufficientCapacity> {
        self.claim(n, false)
    }

    #[inline]
    fn get_mut(&mut self, sequence: i64) -> &mut E {
        self.core.slot_mut(sequence)
    }

    #[inline]
    fn publish_range(&mut self, low: i64, high: i64) {
        self.core.publish(low, high);
    }
}


#[cfg(test)]
mod tests_single {
    use std::time::Duration;

    use super::tests_support::Setup;
    use super::{Producer, ProducerMode};
    use crate::errors::InsufficientCapacity;

    #[test]
    fn publish_event_moves_cursor() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        assert_eq!(producer.cursor(), -1);
        let sequence = producer.publish_event(|slot, sequence| *slot = sequence as usize * 10);
        assert_eq!(sequence, 0);
        assert_eq!(producer.cursor(), 0);
        assert_eq!(setup.read(0), 0);
        producer.publish_event(|slot, sequence| *slot = sequence as usize * 10);
        assert_eq!(setup.coordinator.published(), 1);
        assert_eq!(setup.read(1), 10);
    }

    #[test]
    fn claim_is_invisible_until_published() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        let sequence = producer.next();
        *producer.get_mut(sequence) = 42;
        assert_eq!(producer.cursor(), -1);
        assert!(!setup.coordinator.is_available(sequence));
        producer.publish(sequence);
        assert!(setup.coordinator.is_available(sequence));
        assert_eq!(setup.read(sequence), 42);
    }

    #[test]
    fn try_next_until_full() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        for expected in 0..4 {
            assert_eq!(producer.remaining_capacity(), 4 - expected as usize);
            assert_eq!(producer.try_publish_event(|slot, _| *slot = 1), Ok(expected));
        }
        assert_eq!(producer.remaining_capacity(), 0);
        // the consumer is still at -1, claiming 4 would overwrite slot 0
        assert_eq!(producer.try_next(), Err(InsufficientCapacity));
        assert_eq!(producer.try_publish_event(|_, _| panic!("must not be called")), Err(InsufficientCapacity));
        // the consumer frees slot 0
        setup.consumer.set(0);
        assert_eq!(producer.remaining_capacity(), 1);
        assert_eq!(producer.try_next(), Ok(4));
        producer.publish(4);
        assert_eq!(producer.try_next(), Err(InsufficientCapacity));
    }

    #[test]
    fn try_next_n_needs_all_slots() {
        let setup = Setup::new(ProducerMode::Single, 8);
        let mut producer = setup.single();
        let range = producer.try_next_n(6).unwrap();
        assert_eq!(range, 0..=5);
        producer.publish_range(0, 5);
        assert_eq!(producer.try_next_n(3), Err(InsufficientCapacity));
        assert_eq!(producer.try_next_n(2), Ok(6..=7));
    }

    #[test]
    fn publish_batch_in_parts() {
        let setup = Setup::new(ProducerMode::Single, 8);
        let mut producer = setup.single();
        let range = producer.next_n(4);
        for sequence in range {
            *producer.get_mut(sequence) = sequence as usize;
        }
        producer.publish_range(0, 1);
        assert_eq!(producer.cursor(), 1);
        producer.publish_range(2, 3);
        assert_eq!(producer.cursor(), 3);
        // the claim is complete, a new one can be made
        assert_eq!(producer.next(), 4);
    }

    #[test]
    fn publish_events_writes_all() {
        let setup = Setup::new(ProducerMode::Single, 8);
        let mut producer = setup.single();
        let range = producer.publish_events(3, |slot, sequence| *slot = 100 + sequence as usize);
        assert_eq!(range, 0..=2);
        for sequence in 0..3 {
            assert_eq!(setup.read(sequence), 100 + sequence as usize);
        }
        assert_eq!(producer.cursor(), 2);
    }

    #[test]
    fn next_blocks_until_consumer_progress() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        producer.publish_events(4, |slot, _| *slot = 0);
        let consumer = setup.consumer.clone();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            consumer.set(1);
        });
        // blocks until the consumer handled sequences 0 and 1
        let range = producer.next_n(2);
        assert_eq!(range, 4..=5);
        assert!(setup.consumer.get() >= 1);
        releaser.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "claimed but not published")]
    fn panic_on_double_claim() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        let _ = producer.next();
        let _ = producer.next();
    }

    #[test]
    #[should_panic(expected = "not claimed by this producer")]
    fn panic_on_publish_unclaimed() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        producer.publish(0);
    }

    #[test]
    #[should_panic(expected = "cannot be published")]
    fn panic_on_publish_out_of_order() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        let _ = producer.next_n(3);
        producer.publish_range(1, 2);
    }

    #[test]
    #[should_panic(expected = "not claimed by this producer")]
    fn panic_on_write_unclaimed() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        let sequence = producer.next();
        *producer.get_mut(sequence + 1) = 0;
    }

    #[test]
    #[should_panic(expected = "must be in 1..=4")]
    fn panic_on_claim_larger_than_ring() {
        let setup = Setup::new(ProducerMode::Single, 4);
        let mut producer = setup.single();
        let _ = producer.next_n(5);
    }
}
