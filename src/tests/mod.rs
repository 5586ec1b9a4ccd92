/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

use alloc::sync::Arc;
use std::sync::Mutex;

use crate::errors::HandlerError;
use crate::queue::EventHandler;

mod perf;

/// The size of the ring to use
pub const SCALE_QUEUE_SIZE: usize = 32;

/// The number of messages
pub const SCALE_MSG_COUNT: usize = 1_000_000;

/// The number of producers in a multiple producers test
pub const SCALE_PRODUCERS: usize = 4;

/// What a handler saw for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seen<T> {
    pub value: T,
    pub sequence: i64,
    pub end_of_batch: bool,
}

/// A handler recording the events it sees
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<Seen<T>>>>,
}

impl<T> Recorder<T> {
    pub fn new() -> (Self, Arc<Mutex<Vec<Seen<T>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Self { seen: seen.clone() }, seen)
    }
}

impl<T: Copy + Send> EventHandler<T> for Recorder<T> {
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(Seen {
            value: *event,
            sequence,
            end_of_batch,
        });
        Ok(())
    }
}

fn assert_send<T: Send>(_thing: &T) {}

#[test]
fn test_producers_are_send() {
    let (pipeline, producer) = crate::pipeline::PipelineBuilder::new(|| 0_usize)
        .capacity(4)
        .handler("a", Recorder::new().0)
        .build_multi_producer()
        .unwrap();
    assert_send(&pipeline);
    assert_send(&producer);
}
