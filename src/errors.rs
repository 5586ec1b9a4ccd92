/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! Definition of errors for this crate

use thiserror::Error;

/// A boxed error coming from the business logic of a handler
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// An invalid configuration detected when building a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The capacity of the ring is zero or not a power of two
    #[error("invalid capacity {0}: the capacity must be a non-zero power of two")]
    InvalidCapacity(usize),
    /// The pipeline does not define any stage
    #[error("the pipeline must define at least one stage")]
    NoStages,
    /// Two stages share the same name
    #[error("duplicate stage name `{0}`")]
    DuplicateStage(String),
    /// A stage depends on a stage that is not defined
    #[error("stage `{stage}` depends on unknown stage `{dependency}`")]
    UnknownDependency {
        /// The stage declaring the dependency
        stage: String,
        /// The name of the missing stage
        dependency: String,
    },
    /// The dependencies between stages form a cycle
    #[error("cyclic dependency between stages: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
    /// The name of a wait strategy could not be recognized
    #[error("unknown wait strategy `{0}`")]
    UnknownWaitStrategy(String),
    /// The name of a producer mode could not be recognized
    #[error("unknown producer mode `{0}`")]
    UnknownProducerMode(String),
}

/// The ring does not have enough free slots for the requested claim
///
/// This is the backpressure signal of the non-blocking producer API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("insufficient capacity: the ring is full")]
pub struct InsufficientCapacity;

/// The barrier was alerted, the consumer awaiting on it should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the sequence barrier was alerted")]
pub struct Alerted;

/// An error raised by the business logic of an event handler
#[derive(Debug, Error)]
#[error("event handler failed: {0}")]
pub struct HandlerError(BoxError);

impl HandlerError {
    /// Wraps an error produced by a handler
    pub fn new<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self(error.into())
    }

    /// Gets the wrapped error
    #[must_use]
    pub fn inner(&self) -> &(dyn core::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }

    /// Gets back the wrapped error
    #[must_use]
    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

/// Error when building or operating a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration of the pipeline is invalid
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    /// The pipeline is already running
    #[error("the pipeline is already started")]
    AlreadyStarted,
    /// The pipeline was shut down and cannot be restarted
    #[error("the pipeline was shut down")]
    Terminated,
    /// A thread for a stage could not be spawned
    #[error("failed to spawn the thread for a stage: {0}")]
    Spawn(#[from] std::io::Error),
}
