/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! The ring buffer holding the events

use core::cell::UnsafeCell;
use core::fmt::Debug;

use crate::errors::ConfigError;

/// A circular buffer of pre-allocated event slots, accessed by producer(s) and consumer stages.
/// All slots are created once at construction by an event factory and then overwritten in place on each lap.
/// The ownership of a slot follows the sequence protocol:
/// it is owned for writing by the producer holding the claim on its sequence,
/// then for reading by the stages whose barrier cleared this sequence.
pub struct RingBuffer<E> {
    /// The buffer containing the events themselves
    buffer: Box<[UnsafeCell<E>]>,
    /// The mask to use for getting an index with the buffer
    mask: usize,
}

/// SAFETY: Accesses to slots are guarded by the sequence protocol.
/// Slots are written from the producers' threads and read concurrently from the stages' threads.
unsafe impl<E> Sync for RingBuffer<E> where E: Send + Sync {}

impl<E> Debug for RingBuffer<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer").field("capacity", &self.buffer.len()).finish()
    }
}

impl<E> RingBuffer<E> {
    /// Creates a new ring buffer, using the factory to initialize each slot
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCapacity` when the capacity is not a power of two
    pub fn new<F>(capacity: usize, mut factory: F) -> Result<Self, ConfigError>
    where
        F: FnMut() -> E,
    {
        if !capacity.is_power_of_two() {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        let buffer = (0..capacity).map(|_| UnsafeCell::new(factory())).collect::<Box<[_]>>();
        Ok(Self {
            buffer,
            mask: capacity - 1,
        })
    }

    /// Gets the capacity of the ring
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Gets the index of the slot for a sequence
    #[must_use]
    #[inline]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub(crate) fn index_of(&self, sequence: i64) -> usize {
        debug_assert!(sequence >= 0);
        (sequence as usize) & self.mask
    }

    /// Gets the slot for a sequence in order to write it
    ///
    /// # Safety
    ///
    /// The caller must hold a valid claim on `sequence` and no other reference to the slot may be alive.
    #[must_use]
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_slot(&self, sequence: i64) -> &mut E {
        let index = self.index_of(sequence);
        unsafe { &mut *self.buffer.get_unchecked(index).get() }
    }

    /// Gets the slot for a sequence in order to read it
    ///
    /// # Safety
    ///
    /// The caller must have confirmed through a barrier that `sequence` is published
    /// and the slot must not be written while the reference is alive.
    #[must_use]
    #[inline]
    pub unsafe fn get_slot_for_read(&self, sequence: i64) -> &E {
        let index = self.index_of(sequence);
        unsafe { &*self.buffer.get_unchecked(index).get() }
    }
}

#[cfg(test)]
mod tests_init {
    use super::RingBuffer;
    use crate::errors::ConfigError;

    #[test]
    fn size_power_of_two() {
        let ring = RingBuffer::new(16, || 0_usize).unwrap();
        assert_eq!(ring.capacity(), 16);
    }

    #[test]
    fn error_on_non_power_of_two() {
        assert_eq!(
            RingBuffer::new(3, || 0_usize).err(),
            Some(ConfigError::InvalidCapacity(3))
        );
        assert_eq!(
            RingBuffer::new(0, || 0_usize).err(),
            Some(ConfigError::InvalidCapacity(0))
        );
    }

    #[test]
    fn factory_called_once_per_slot() {
        let mut created = 0;
        let ring = RingBuffer::new(8, || {
            created += 1;
            created
        })
        .unwrap();
        assert_eq!(created, 8);
        for sequence in 0..8 {
            assert_eq!(unsafe { *ring.get_slot_for_read(sequence) }, sequence as usize + 1);
        }
    }
}
