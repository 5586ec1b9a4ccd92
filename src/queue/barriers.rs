/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! Barriers to synchronise consumer stages working on a common ring

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use super::Sequence;
use super::producers::ProducerCoordinator;
use super::wait::WaitStrategy;
use crate::errors::Alerted;

/// A barrier to be used by a consumer stage to await for available sequences.
/// The barrier awaits on the cursor of the producers and on the sequences of the upstream stages the consumer depends on.
/// When the stage has no upstream dependency, it awaits directly on the producers.
#[derive(Debug)]
pub struct SequenceBarrier {
    /// The coordinator of the producers, owning the cursor
    coordinator: Arc<ProducerCoordinator>,
    /// The sequences of the upstream stages
    dependencies: Box<[Arc<Sequence>]>,
    /// The strategy to wait for sequences
    wait_strategy: Arc<dyn WaitStrategy>,
    /// Whether the barrier was alerted
    alerted: CachePadded<AtomicBool>,
}

impl SequenceBarrier {
    /// Creates a barrier awaiting on the producers and a set of upstream stages
    #[must_use]
    pub(crate) fn new(
        coordinator: Arc<ProducerCoordinator>,
        dependencies: Vec<Arc<Sequence>>,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Self {
        Self {
            coordinator,
            dependencies: dependencies.into_boxed_slice(),
            wait_strategy,
            alerted: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Creates a barrier over a standalone single producer cursor
    #[cfg(test)]
    pub(crate) fn for_tests(
        cursor: Arc<Sequence>,
        dependencies: Vec<Arc<Sequence>>,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Self {
        let coordinator = ProducerCoordinator::new(
            super::ProducerMode::Single,
            1024,
            cursor,
            Vec::new(),
            vec![wait_strategy.clone()],
            wait_strategy.clone(),
        );
        Self::new(Arc::new(coordinator), dependencies, wait_strategy)
    }

    /// Waits until at least `sequence` is available from the producers and all the upstream stages.
    /// Returns the highest available sequence, which may be greater than the requested one so that callers can handle batches.
    /// With multiple producers, a sequence claimed but not yet published is awaited with the barrier's wait strategy.
    ///
    /// # Errors
    ///
    /// Returns `Alerted` when the barrier is alerted, before or while waiting
    pub fn wait_for(&self, sequence: i64) -> Result<i64, Alerted> {
        self.check_alert()?;
        let available = self
            .wait_strategy
            .wait_for(sequence, self.coordinator.cursor(), &self.dependencies, self)?;
        let published = self.coordinator.highest_published(sequence, available);
        if published >= sequence {
            return Ok(published);
        }
        // claimed by a producer but not published yet
        let backoff = Backoff::new();
        loop {
            self.check_alert()?;
            self.wait_strategy.wait_for_publication(&backoff);
            let published = self.coordinator.highest_published(sequence, available);
            if published >= sequence {
                return Ok(published);
            }
        }
    }

    /// Gets the current value of the producers' cursor
    #[must_use]
    #[inline]
    pub fn cursor(&self) -> i64 {
        self.coordinator.cursor().get()
    }

    /// Gets whether the barrier is alerted
    #[must_use]
    #[inline]
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    /// Alerts the barrier so that waiting consumers stop, then wakes them up
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Clears the alert
    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    /// Checks whether the barrier is alerted
    ///
    /// # Errors
    ///
    /// Returns `Alerted` when the barrier is alerted
    #[inline]
    pub fn check_alert(&self) -> Result<(), Alerted> {
        if self.is_alerted() { Err(Alerted) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests_barrier {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crossbeam_utils::Backoff;

    use super::SequenceBarrier;
    use crate::errors::Alerted;
    use crate::queue::{
        BlockingWaitStrategy, BusySpinWaitStrategy, MultiProducer, Producer, ProducerCoordinator, ProducerMode,
        RingBuffer, Sequence, WaitStrategy, WaitStrategyKind,
    };

    fn spin() -> Arc<dyn WaitStrategy> {
        Arc::new(BusySpinWaitStrategy)
    }

    #[test]
    fn available_from_cursor() {
        let cursor = Arc::new(Sequence::new(7));
        let barrier = SequenceBarrier::for_tests(cursor, Vec::new(), spin());
        assert_eq!(barrier.wait_for(0), Ok(7));
        assert_eq!(barrier.wait_for(7), Ok(7));
    }

    #[test]
    fn available_from_slowest_dependency() {
        let cursor = Arc::new(Sequence::new(9));
        let dependencies = [5, 7, 4, 9].map(|v| Arc::new(Sequence::new(v))).to_vec();
        let barrier = SequenceBarrier::for_tests(cursor, dependencies, spin());
        assert_eq!(barrier.wait_for(2), Ok(4));
        assert_eq!(barrier.wait_for(4), Ok(4));
    }

    #[test]
    fn waits_for_dependency() {
        let cursor = Arc::new(Sequence::new(9));
        let upstream = Arc::new(Sequence::new(2));
        let barrier = Arc::new(SequenceBarrier::for_tests(cursor, vec![upstream.clone()], spin()));
        let waiter = std::thread::spawn({
            let barrier = barrier.clone();
            move || barrier.wait_for(5)
        });
        std::thread::sleep(Duration::from_millis(10));
        upstream.set(6);
        assert_eq!(waiter.join().unwrap(), Ok(6));
    }

    #[test]
    fn alerted_before_waiting() {
        let cursor = Arc::new(Sequence::new(9));
        let barrier = SequenceBarrier::for_tests(cursor, Vec::new(), spin());
        barrier.alert();
        assert!(barrier.is_alerted());
        assert_eq!(barrier.wait_for(0), Err(Alerted));
        barrier.clear_alert();
        assert_eq!(barrier.wait_for(0), Ok(9));
    }

    #[test]
    fn multi_producer_stops_at_first_gap() {
        let coordinator = Arc::new(ProducerCoordinator::new(
            ProducerMode::Multi,
            8,
            Arc::new(Sequence::default()),
            Vec::new(),
            Vec::new(),
            spin(),
        ));
        let barrier = Arc::new(SequenceBarrier::new(coordinator.clone(), Vec::new(), spin()));
        // claim 0..=3, publish 0, 1 and 3
        coordinator.cursor().set(3);
        coordinator.publish(0, 1);
        coordinator.publish(3, 3);
        assert_eq!(barrier.wait_for(0), Ok(1));
        // sequence 2 is claimed but not yet published
        let waiter = std::thread::spawn({
            let barrier = barrier.clone();
            move || barrier.wait_for(2)
        });
        std::thread::sleep(Duration::from_millis(10));
        assert!(!waiter.is_finished());
        coordinator.publish(2, 2);
        assert_eq!(waiter.join().unwrap(), Ok(3));
    }

    /// Counts the calls to a blocking strategy
    #[derive(Debug, Default)]
    struct Counting {
        inner: BlockingWaitStrategy,
        calls: AtomicUsize,
        pauses: AtomicUsize,
    }

    impl WaitStrategy for Counting {
        fn wait_for(
            &self,
            sequence: i64,
            cursor: &Sequence,
            dependents: &[Arc<Sequence>],
            barrier: &SequenceBarrier,
        ) -> Result<i64, Alerted> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.wait_for(sequence, cursor, dependents, barrier)
        }

        fn signal_all_when_blocking(&self) {
            self.inner.signal_all_when_blocking();
        }

        fn wait_for_publication(&self, backoff: &Backoff) {
            self.pauses.fetch_add(1, Ordering::Relaxed);
            self.inner.wait_for_publication(backoff);
        }
    }

    #[test]
    fn blocking_consumer_waits_on_outstanding_claim() {
        let strategy = Arc::new(Counting::default());
        let shared: Arc<dyn WaitStrategy> = strategy.clone();
        let ring = Arc::new(RingBuffer::new(8, || 0_usize).unwrap());
        let coordinator = Arc::new(ProducerCoordinator::new(
            ProducerMode::Multi,
            8,
            Arc::new(Sequence::default()),
            Vec::new(),
            vec![shared.clone()],
            spin(),
        ));
        let barrier = Arc::new(SequenceBarrier::new(coordinator.clone(), Vec::new(), shared));
        let mut first = MultiProducer::new(ring.clone(), coordinator.clone());
        let mut second = first.clone();
        let claimed = first.next();
        assert_eq!(claimed, 0);
        assert_eq!(second.publish_event(|slot, _| *slot = 1), 1);

        let waiter = std::thread::spawn({
            let barrier = barrier.clone();
            move || barrier.wait_for(0)
        });
        std::thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());
        let calls = strategy.calls.load(Ordering::Relaxed);
        let pauses = strategy.pauses.load(Ordering::Relaxed);
        assert_eq!(calls, 1);
        assert!(pauses < 1000, "consumer paused {pauses} times in 100ms");

        first.publish(claimed);
        assert_eq!(waiter.join().unwrap(), Ok(1));
    }

    #[test]
    fn alert_while_waiting_on_outstanding_claim() {
        let ring = Arc::new(RingBuffer::new(8, || 0_usize).unwrap());
        let strategy = WaitStrategyKind::Blocking.build();
        let coordinator = Arc::new(ProducerCoordinator::new(
            ProducerMode::Multi,
            8,
            Arc::new(Sequence::default()),
            Vec::new(),
            vec![strategy.clone()],
            spin(),
        ));
        let barrier = Arc::new(SequenceBarrier::new(coordinator.clone(), Vec::new(), strategy));
        let mut producer = MultiProducer::new(ring, coordinator);
        let claimed = producer.next();

        let waiter = std::thread::spawn({
            let barrier = barrier.clone();
            move || barrier.wait_for(claimed)
        });
        std::thread::sleep(Duration::from_millis(10));
        barrier.alert();
        assert_eq!(waiter.join().unwrap(), Err(Alerted));
        producer.publish(claimed);
    }
}
