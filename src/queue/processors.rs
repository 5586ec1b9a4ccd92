/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! The event processors running consumer stages

use alloc::sync::Arc;
use core::fmt::{Debug, Display};
use core::sync::atomic::{AtomicU8, Ordering};

use super::barriers::SequenceBarrier;
use super::ring::RingBuffer;
use super::Sequence;
use crate::errors::{Alerted, HandlerError};

/// The business logic of a consumer stage.
/// Events are handled strictly in increasing sequence order, at most once per published sequence.
///
/// Closures with the signature of `on_event` are handlers.
pub trait EventHandler<E>: Send {
    /// Handles an event.
    /// `end_of_batch` is set on the last event currently available, so that handlers can coalesce flush-type work.
    ///
    /// # Errors
    ///
    /// The error is routed to the `ErrorHandler` of the stage
    fn on_event(&mut self, event: &E, sequence: i64, end_of_batch: bool) -> Result<(), HandlerError>;

    /// Called on the stage's thread before the first event
    fn on_start(&mut self) {}

    /// Called on the stage's thread after the last event
    fn on_shutdown(&mut self) {}
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(&E, i64, bool) -> Result<(), HandlerError> + Send,
{
    #[inline]
    fn on_event(&mut self, event: &E, sequence: i64, end_of_batch: bool) -> Result<(), HandlerError> {
        self(event, sequence, end_of_batch)
    }
}

/// What a stage does after its handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorAction {
    /// Advance past the failing event and keep processing
    Continue,
    /// Stop the stage, which becomes `Faulted`
    Halt,
}

/// Receives the errors of an event handler and decides whether the stage continues
pub trait ErrorHandler<E>: Send + Sync {
    /// Handles the error raised for the event at `sequence`
    fn handle_event_error(&self, error: &HandlerError, sequence: i64, event: &E) -> ErrorAction;
}

impl<E, F> ErrorHandler<E> for F
where
    F: Fn(&HandlerError, i64, &E) -> ErrorAction + Send + Sync,
{
    #[inline]
    fn handle_event_error(&self, error: &HandlerError, sequence: i64, event: &E) -> ErrorAction {
        self(error, sequence, event)
    }
}

/// Logs the error and continues with the next event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAndContinue;

impl<E> ErrorHandler<E> for LogAndContinue {
    fn handle_event_error(&self, error: &HandlerError, sequence: i64, _event: &E) -> ErrorAction {
        log::error!("failed to handle event {sequence}: {error}");
        ErrorAction::Continue
    }
}

/// Logs the error and halts the stage
#[derive(Debug, Default, Clone, Copy)]
pub struct HaltOnError;

impl<E> ErrorHandler<E> for HaltOnError {
    fn handle_event_error(&self, error: &HandlerError, sequence: i64, _event: &E) -> ErrorAction {
        log::error!("failed to handle event {sequence}, halting: {error}");
        ErrorAction::Halt
    }
}

/// The state of an event processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcessorState {
    /// Not yet started
    Idle = 0,
    /// Processing events
    Running = 1,
    /// Stopped after its barrier was alerted
    Halted = 2,
    /// Stopped after a handler error or a panic
    Faulted = 3,
}

impl Display for ProcessorState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Halted => write!(f, "halted"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// The state of a processor, shared with the pipeline
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(ProcessorState::Idle as u8))
    }
}

impl StateCell {
    #[inline]
    pub(crate) fn get(&self) -> ProcessorState {
        match self.0.load(Ordering::Acquire) {
            0 => ProcessorState::Idle,
            1 => ProcessorState::Running,
            2 => ProcessorState::Halted,
            _ => ProcessorState::Faulted,
        }
    }

    #[inline]
    fn set(&self, state: ProcessorState) {
        self.0.store(state as u8, Ordering::Release);
    }

    #[inline]
    fn transition(&self, from: ProcessorState, to: ProcessorState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Marks the processor as faulted when its thread unwinds
struct PanicGuard<'a>(&'a StateCell);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.set(ProcessorState::Faulted);
        }
    }
}

/// Runs one consumer stage: awaits on its barrier for available events,
/// hands them over to the stage's handler and publishes its progress in its own sequence.
pub(crate) struct EventProcessor<E> {
    /// The name of the stage
    name: String,
    /// The ring itself
    ring: Arc<RingBuffer<E>>,
    /// The barrier the stage is waiting on
    barrier: Arc<SequenceBarrier>,
    /// The last sequence handled by this stage
    sequence: Arc<Sequence>,
    /// The business logic
    handler: Box<dyn EventHandler<E>>,
    /// The policy when the business logic fails
    error_handler: Arc<dyn ErrorHandler<E>>,
    /// The current state
    state: Arc<StateCell>,
}

impl<E> Debug for EventProcessor<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("name", &self.name)
            .field("sequence", &self.sequence.get())
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl<E> EventProcessor<E> {
    /// Creates the processor for a stage
    #[must_use]
    pub(crate) fn new(
        name: String,
        ring: Arc<RingBuffer<E>>,
        barrier: Arc<SequenceBarrier>,
        sequence: Arc<Sequence>,
        handler: Box<dyn EventHandler<E>>,
        error_handler: Arc<dyn ErrorHandler<E>>,
    ) -> Self {
        Self {
            name,
            ring,
            barrier,
            sequence,
            handler,
            error_handler,
            state: Arc::new(StateCell::default()),
        }
    }

    /// Gets the name of the stage
    #[must_use]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Gets the sequence of the last event handled by the stage
    #[cfg(test)]
    pub(crate) fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    /// Gets the barrier the stage awaits on
    #[cfg(test)]
    pub(crate) fn barrier(&self) -> &Arc<SequenceBarrier> {
        &self.barrier
    }

    /// Gets the current state
    #[cfg(test)]
    pub(crate) fn state(&self) -> ProcessorState {
        self.state.get()
    }

    /// Gets the state shared with the pipeline
    pub(crate) fn state_cell(&self) -> &Arc<StateCell> {
        &self.state
    }

    /// Runs the stage on the current thread until its barrier is alerted or the error handler halts it.
    /// Returns the final state, either `Halted` or `Faulted`.
    ///
    /// # Panics
    ///
    /// Panics when the processor already ran
    pub(crate) fn run(&mut self) -> ProcessorState {
        assert!(
            self.state.transition(ProcessorState::Idle, ProcessorState::Running),
            "stage `{}` can only run once",
            self.name
        );
        let state = self.state.clone();
        let _guard = PanicGuard(&state);
        log::debug!("stage `{}` started after sequence {}", self.name, self.sequence.get());
        self.handler.on_start();
        let final_state = self.process_events();
        self.handler.on_shutdown();
        state.set(final_state);
        log::debug!(
            "stage `{}` stopped at sequence {}: {final_state}",
            self.name,
            self.sequence.get()
        );
        final_state
    }

    fn process_events(&mut self) -> ProcessorState {
        let mut next = self.sequence.get() + 1;
        loop {
            let available = match self.barrier.wait_for(next) {
                Ok(available) => available,
                Err(Alerted) => return ProcessorState::Halted,
            };
            while next <= available {
                // SAFETY: the barrier cleared the sequence and producers cannot claim it again
                // before this stage and the downstream ones advance past it
                let event = unsafe { self.ring.get_slot_for_read(next) };
                if let Err(error) = self.handler.on_event(event, next, next == available) {
                    match self.error_handler.handle_event_error(&error, next, event) {
                        ErrorAction::Continue => {}
                        ErrorAction::Halt => {
                            self.sequence.set(next - 1);
                            return ProcessorState::Faulted;
                        }
                    }
                }
                next += 1;
            }
            self.sequence.set(available);
        }
    }
}
