/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! Construction and lifecycle of multi-stage pipelines.
//!
//! A pipeline is a ring of events with a graph of consumer stages.
//! Each stage runs on its own thread and declares the upstream stages it depends on, by name.
//! Stages without dependency consume events directly after producers publish them.

use alloc::sync::Arc;
use std::collections::HashMap;
use std::thread::JoinHandle;

use crossbeam_utils::Backoff;

use crate::affinity::{self, CoreId};
use crate::errors::{ConfigError, PipelineError};
use crate::queue::{
    ErrorHandler, EventHandler, EventProcessor, HaltOnError, LogAndContinue, MultiProducer, ProcessorState,
    ProducerCoordinator, ProducerMode, RingBuffer, Sequence, SequenceBarrier, SingleProducer, StateCell,
    WaitStrategyKind,
};

/// The default capacity of the ring
pub const DEFAULT_CAPACITY: usize = 1024;

/// The default prefix for the names of the threads of stages
pub const DEFAULT_THREAD_PREFIX: &str = "ringflow";

/// The definition of a consumer stage in a pipeline
pub struct StageDefinition<E> {
    /// The unique name of the stage
    name: String,
    /// The business logic
    handler: Box<dyn EventHandler<E>>,
    /// The names of the upstream stages
    dependencies: Vec<String>,
    /// The wait strategy, the default one for the pipeline if not set
    wait_strategy: Option<WaitStrategyKind>,
    /// The error handler
    error_handler: Arc<dyn ErrorHandler<E>>,
    /// The core to pin the stage's thread to
    core: Option<CoreId>,
}

impl<E> core::fmt::Debug for StageDefinition<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StageDefinition")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("wait_strategy", &self.wait_strategy)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E> StageDefinition<E> {
    /// Defines a stage running a handler.
    /// Errors from the handler are logged and the stage continues with the next event.
    #[must_use]
    pub fn new<N, H>(name: N, handler: H) -> Self
    where
        N: Into<String>,
        H: EventHandler<E> + 'static,
    {
        Self {
            name: name.into(),
            handler: Box::new(handler),
            dependencies: Vec::new(),
            wait_strategy: None,
            error_handler: Arc::new(LogAndContinue),
            core: None,
        }
    }

    /// Gets the name of the stage
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a dependency on an upstream stage, this stage only handles events already handled by the upstream one
    #[must_use]
    pub fn after<N: Into<String>>(mut self, dependency: N) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Sets the wait strategy for this stage
    #[must_use]
    pub fn wait_strategy(mut self, kind: WaitStrategyKind) -> Self {
        self.wait_strategy = Some(kind);
        self
    }

    /// Sets the handler for errors raised by the business logic
    #[must_use]
    pub fn error_handler<H>(mut self, handler: H) -> Self
    where
        H: ErrorHandler<E> + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Halts the stage on the first error raised by the business logic
    #[must_use]
    pub fn halt_on_error(self) -> Self {
        self.error_handler(HaltOnError)
    }

    /// Pins the thread of this stage to a core
    #[must_use]
    pub fn pin_to_core(mut self, core: CoreId) -> Self {
        self.core = Some(core);
        self
    }
}

/// A builder to build a pipeline
pub struct PipelineBuilder<E> {
    capacity: usize,
    factory: Box<dyn FnMut() -> E>,
    wait_strategy: WaitStrategyKind,
    producer_wait_strategy: Option<WaitStrategyKind>,
    thread_prefix: String,
    stages: Vec<StageDefinition<E>>,
}

impl<E> core::fmt::Debug for PipelineBuilder<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("capacity", &self.capacity)
            .field("wait_strategy", &self.wait_strategy)
            .field("producer_wait_strategy", &self.producer_wait_strategy)
            .field("thread_prefix", &self.thread_prefix)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl<E: Default + 'static> Default for PipelineBuilder<E> {
    fn default() -> Self {
        Self::new(E::default)
    }
}

impl<E> PipelineBuilder<E> {
    /// Gets a new builder, using the factory to pre-allocate the events in the ring
    #[must_use]
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut() -> E + 'static,
    {
        Self {
            capacity: DEFAULT_CAPACITY,
            factory: Box::new(factory),
            wait_strategy: WaitStrategyKind::default(),
            producer_wait_strategy: None,
            thread_prefix: String::from(DEFAULT_THREAD_PREFIX),
            stages: Vec::new(),
        }
    }

    /// Sets the capacity of the ring, must be a power of two
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the wait strategy for stages that do not define their own
    #[must_use]
    pub fn wait_strategy(mut self, kind: WaitStrategyKind) -> Self {
        self.wait_strategy = kind;
        self
    }

    /// Sets the wait strategy for producers waiting on a full ring.
    /// The default wait strategy is used if not set.
    #[must_use]
    pub fn producer_wait_strategy(mut self, kind: WaitStrategyKind) -> Self {
        self.producer_wait_strategy = Some(kind);
        self
    }

    /// Sets the prefix for the names of the threads, the full name is `{prefix}-{stage}`
    #[must_use]
    pub fn thread_prefix<N: Into<String>>(mut self, prefix: N) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    /// Adds a stage
    #[must_use]
    pub fn stage(mut self, stage: StageDefinition<E>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds a stage without dependency and with the default configuration
    #[must_use]
    pub fn handler<N, H>(self, name: N, handler: H) -> Self
    where
        N: Into<String>,
        H: EventHandler<E> + 'static,
    {
        self.stage(StageDefinition::new(name, handler))
    }

    /// Builds the pipeline with a single producer
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when the configuration is invalid
    pub fn build_single_producer(self) -> Result<(Pipeline<E>, SingleProducer<E>), ConfigError> {
        let pipeline = self.build(ProducerMode::Single)?;
        let producer = SingleProducer::new(pipeline.ring.clone(), pipeline.coordinator.clone());
        Ok((pipeline, producer))
    }

    /// Builds the pipeline with a producer that can be cloned for concurrent producers
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when the configuration is invalid
    pub fn build_multi_producer(self) -> Result<(Pipeline<E>, MultiProducer<E>), ConfigError> {
        let pipeline = self.build(ProducerMode::Multi)?;
        let producer = MultiProducer::new(pipeline.ring.clone(), pipeline.coordinator.clone());
        Ok((pipeline, producer))
    }

    fn build(self, mode: ProducerMode) -> Result<Pipeline<E>, ConfigError> {
        if !self.capacity.is_power_of_two() {
            return Err(ConfigError::InvalidCapacity(self.capacity));
        }
        let (dependencies, order) = resolve_dependencies(&self.stages)?;
        let ring = Arc::new(RingBuffer::new(self.capacity, self.factory)?);

        let sequences = (0..self.stages.len())
            .map(|_| Arc::new(Sequence::default()))
            .collect::<Vec<_>>();
        // producers are gated by the stages nothing depends on
        let mut is_upstream = vec![false; self.stages.len()];
        for &upstream in dependencies.iter().flatten() {
            is_upstream[upstream] = true;
        }
        let gating = sequences
            .iter()
            .zip(&is_upstream)
            .filter(|&(_, &upstream)| !upstream)
            .map(|(sequence, _)| sequence.clone())
            .collect::<Vec<_>>();
        let strategies = self
            .stages
            .iter()
            .map(|stage| stage.wait_strategy.unwrap_or(self.wait_strategy).build())
            .collect::<Vec<_>>();
        let producer_wait = self.producer_wait_strategy.unwrap_or(self.wait_strategy).build();
        let coordinator = Arc::new(ProducerCoordinator::new(
            mode,
            self.capacity,
            Arc::new(Sequence::default()),
            gating,
            strategies.clone(),
            producer_wait,
        ));

        let stages = self
            .stages
            .into_iter()
            .zip(dependencies)
            .zip(sequences.iter().zip(strategies))
            .map(|((definition, upstream), (sequence, strategy))| {
                let upstream_sequences = upstream.iter().map(|&index| sequences[index].clone()).collect();
                let barrier = Arc::new(SequenceBarrier::new(coordinator.clone(), upstream_sequences, strategy));
                let processor = EventProcessor::new(
                    definition.name.clone(),
                    ring.clone(),
                    barrier.clone(),
                    sequence.clone(),
                    definition.handler,
                    definition.error_handler,
                );
                Stage {
                    name: definition.name,
                    upstream,
                    sequence: sequence.clone(),
                    barrier,
                    state: processor.state_cell().clone(),
                    core: definition.core,
                    processor: Some(processor),
                    thread: None,
                }
            })
            .collect::<Vec<_>>();
        log::debug!(
            "built pipeline with {} stages, capacity {}, {mode} producer",
            stages.len(),
            self.capacity
        );
        Ok(Pipeline {
            ring,
            coordinator,
            stages,
            order,
            thread_prefix: self.thread_prefix,
            status: Status::Built,
        })
    }
}

/// Resolves the dependencies of each stage into the indices of the upstream stages,
/// and gets the stages in a topological order.
/// Checks that names are unique, dependencies exist and that the graph has no cycle (Kahn's algorithm).
fn resolve_dependencies<E>(stages: &[StageDefinition<E>]) -> Result<(Vec<Vec<usize>>, Vec<usize>), ConfigError> {
    if stages.is_empty() {
        return Err(ConfigError::NoStages);
    }
    let mut indices = HashMap::with_capacity(stages.len());
    for (index, stage) in stages.iter().enumerate() {
        if indices.insert(stage.name.as_str(), index).is_some() {
            return Err(ConfigError::DuplicateStage(stage.name.clone()));
        }
    }
    let mut dependencies = Vec::with_capacity(stages.len());
    for stage in stages {
        let mut upstream = Vec::with_capacity(stage.dependencies.len());
        for dependency in &stage.dependencies {
            let Some(&index) = indices.get(dependency.as_str()) else {
                return Err(ConfigError::UnknownDependency {
                    stage: stage.name.clone(),
                    dependency: dependency.clone(),
                });
            };
            if !upstream.contains(&index) {
                upstream.push(index);
            }
        }
        dependencies.push(upstream);
    }

    let mut remaining = dependencies.iter().map(Vec::len).collect::<Vec<_>>();
    let mut downstream = vec![Vec::new(); stages.len()];
    for (index, upstream) in dependencies.iter().enumerate() {
        for &dependency in upstream {
            downstream[dependency].push(index);
        }
    }
    let mut ready = (0..stages.len()).filter(|&index| remaining[index] == 0).collect::<Vec<_>>();
    let mut order = Vec::with_capacity(stages.len());
    while let Some(index) = ready.pop() {
        order.push(index);
        for &next in &downstream[index] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.push(next);
            }
        }
    }
    if order.len() < stages.len() {
        let cycle = stages
            .iter()
            .zip(&remaining)
            .filter(|&(_, &count)| count > 0)
            .map(|(stage, _)| stage.name.clone())
            .collect();
        return Err(ConfigError::CyclicDependency(cycle));
    }
    Ok((dependencies, order))
}

/// The status of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Built,
    Running,
    Terminated,
}

/// A stage within a running pipeline
struct Stage<E> {
    name: String,
    /// The indices of the upstream stages
    upstream: Vec<usize>,
    sequence: Arc<Sequence>,
    barrier: Arc<SequenceBarrier>,
    state: Arc<StateCell>,
    core: Option<CoreId>,
    /// The processor, until it is moved onto its thread
    processor: Option<EventProcessor<E>>,
    thread: Option<JoinHandle<ProcessorState>>,
}

/// A multi-stage pipeline of event processors over a ring
pub struct Pipeline<E> {
    /// The ring itself
    ring: Arc<RingBuffer<E>>,
    /// The coordinator of the producers
    coordinator: Arc<ProducerCoordinator>,
    /// The stages, in declaration order
    stages: Vec<Stage<E>>,
    /// The indices of the stages in a topological order
    order: Vec<usize>,
    /// The prefix for the names of threads
    thread_prefix: String,
    /// The current status
    status: Status,
}

impl<E> core::fmt::Debug for Pipeline<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipeline")
            .field("capacity", &self.ring.capacity())
            .field("cursor", &self.cursor())
            .field(
                "stages",
                &self
                    .stages
                    .iter()
                    .map(|stage| (&stage.name, stage.sequence.get(), stage.state.get()))
                    .collect::<Vec<_>>(),
            )
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<E> Pipeline<E>
where
    E: Send + Sync + 'static,
{
    /// Starts a thread for each stage
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` when the pipeline is running, `Terminated` once it was shut down,
    /// and `Spawn` when a thread cannot be created, in which case the started stages are stopped.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        match self.status {
            Status::Built => {}
            Status::Running => return Err(PipelineError::AlreadyStarted),
            Status::Terminated => return Err(PipelineError::Terminated),
        }
        self.status = Status::Running;
        for index in 0..self.stages.len() {
            if let Err(error) = self.spawn_stage(index) {
                log::warn!("failed to start stage `{}`: {error}", self.stages[index].name);
                self.shutdown(false);
                return Err(PipelineError::Spawn(error));
            }
        }
        log::info!(
            "pipeline started with {} stages: {}",
            self.stages.len(),
            self.stages
                .iter()
                .map(|stage| stage.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    fn spawn_stage(&mut self, index: usize) -> std::io::Result<()> {
        let stage = &mut self.stages[index];
        let Some(mut processor) = stage.processor.take() else {
            return Ok(());
        };
        let core = stage.core;
        let thread = std::thread::Builder::new()
            .name(format!("{}-{}", self.thread_prefix, stage.name))
            .spawn(move || {
                if let Some(core) = core {
                    if !affinity::pin_current_thread(core) {
                        log::warn!("failed to pin stage `{}` to core {core}", processor.name());
                    }
                }
                processor.run()
            })?;
        stage.thread = Some(thread);
        Ok(())
    }
}

impl<E> Pipeline<E> {
    /// Stops all stages and waits for their threads to exit.
    /// When `drain` is set, first waits for the stages to handle all the events published so far,
    /// unless a stage is faulted and cannot make progress.
    /// Otherwise, the stages stop after the batch they are currently handling.
    /// Shutting down an already shut down pipeline does nothing.
    pub fn shutdown(&mut self, drain: bool) {
        if self.status == Status::Terminated {
            return;
        }
        let was_running = self.status == Status::Running;
        self.status = Status::Terminated;
        if !was_running {
            log::debug!("pipeline shut down before being started");
            return;
        }
        if drain {
            self.drain();
        }
        for stage in &self.stages {
            stage.barrier.alert();
        }
        for stage in &mut self.stages {
            let Some(thread) = stage.thread.take() else {
                continue;
            };
            match thread.join() {
                Ok(state) => log::debug!("stage `{}` exited as {state}", stage.name),
                Err(_) => log::warn!("stage `{}` panicked at sequence {}", stage.name, stage.sequence.get()),
            }
        }
        log::info!("pipeline shut down at sequence {}", self.cursor());
    }

    /// Waits until each stage handled all the events published so far.
    /// Stopped stages do not progress anymore, their downstream stages only wait for what they handled.
    fn drain(&self) {
        let target = self.coordinator.published();
        log::debug!("draining pipeline up to sequence {target}");
        let backoff = Backoff::new();
        let mut reachable = vec![target; self.stages.len()];
        loop {
            let mut pending = false;
            for &index in &self.order {
                let stage = &self.stages[index];
                let limit = stage
                    .upstream
                    .iter()
                    .fold(target, |limit, &upstream| limit.min(reachable[upstream]));
                reachable[index] = match stage.state.get() {
                    ProcessorState::Idle | ProcessorState::Running => {
                        pending |= stage.sequence.get() < limit;
                        limit
                    }
                    ProcessorState::Halted | ProcessorState::Faulted => stage.sequence.get(),
                };
            }
            if !pending {
                return;
            }
            backoff.snooze();
        }
    }

    /// Gets whether the stages are running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    /// Gets the state of a stage
    #[must_use]
    pub fn stage_state(&self, name: &str) -> Option<ProcessorState> {
        self.stage(name).map(|stage| stage.state.get())
    }

    /// Gets the sequence of the last event handled by a stage
    #[must_use]
    pub fn stage_sequence(&self, name: &str) -> Option<i64> {
        self.stage(name).map(|stage| stage.sequence.get())
    }

    /// Gets the names of the stages, in declaration order
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.name.as_str())
    }

    /// Gets the current value of the cursor of the producers
    #[must_use]
    pub fn cursor(&self) -> i64 {
        self.coordinator.cursor().get()
    }

    /// Gets the capacity of the ring
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    fn stage(&self, name: &str) -> Option<&Stage<E>> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}

impl<E> Drop for Pipeline<E> {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}
