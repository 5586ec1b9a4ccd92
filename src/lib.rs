/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

//! # Ringflow
//!
//! Multi-stage event processing pipelines over a pre-allocated ring buffer.
//! The implementation is freely inspired by the [LMAX Disruptor](https://github.com/LMAX-Exchange/disruptor).
//!
//! Events live in slots of a ring that are allocated once and overwritten in place.
//! Producers claim sequences on the ring, write the corresponding slots and publish them.
//! Consumer stages run on their own threads and see immutable references to the published events.
//! Stages form a graph: a stage may depend on upstream stages and only handles an event once all of them handled it.
//! Producers cannot overwrite a slot before the last stages handled its previous event, which gives backpressure.
//!
//!
//! ## Example
//!
//! A pipeline with two stages in parallel (journal and replicate) and a third one after both.
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use ringflow::errors::HandlerError;
//! use ringflow::pipeline::{PipelineBuilder, StageDefinition};
//! use ringflow::queue::{Producer, WaitStrategyKind};
//!
//! let total = Arc::new(AtomicU64::new(0));
//! let (mut pipeline, mut producer) = PipelineBuilder::new(|| 0_u64)
//!     .capacity(256)
//!     .wait_strategy(WaitStrategyKind::Yielding)
//!     .handler("journal", |_event: &u64, _sequence: i64, _end_of_batch: bool| -> Result<(), HandlerError> {
//!         // append to a journal
//!         Ok(())
//!     })
//!     .handler("replicate", |_event: &u64, _sequence: i64, _end_of_batch: bool| -> Result<(), HandlerError> {
//!         // send to a replica
//!         Ok(())
//!     })
//!     .stage(
//!         StageDefinition::new("apply", {
//!             let total = total.clone();
//!             move |event: &u64, _sequence: i64, _end_of_batch: bool| -> Result<(), HandlerError> {
//!                 total.fetch_add(*event, Ordering::Relaxed);
//!                 Ok(())
//!             }
//!         })
//!         .after("journal")
//!         .after("replicate"),
//!     )
//!     .build_single_producer()
//!     .unwrap();
//!
//! pipeline.start().unwrap();
//! for value in 1..=1000 {
//!     producer.publish_event(|slot, _sequence| *slot = value);
//! }
//! pipeline.shutdown(true);
//! assert_eq!(total.load(Ordering::Relaxed), 500_500);
//! ```
//!
//!
//! ## License
//!
//! Copyright 2024 Cénotélie Opérations SAS
//!
//! Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the “Software”), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
//!
//! The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
//!
//! THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
//!

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::module_name_repetitions)]

extern crate alloc;

pub mod affinity;
pub mod errors;
pub mod pipeline;
pub mod queue;

#[cfg(test)]
mod tests;
