/*******************************************************************************
 * Copyright (c) 2024 Cénotélie Opérations SAS (cenotelie.fr)
 ******************************************************************************/

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::HandlerError;
use crate::pipeline::{PipelineBuilder, StageDefinition};
use crate::queue::{Producer, WaitStrategyKind};
use crate::tests::{SCALE_MSG_COUNT, SCALE_PRODUCERS, SCALE_QUEUE_SIZE};

fn counter(count: &Arc<AtomicUsize>) -> impl FnMut(&usize, i64, bool) -> Result<(), HandlerError> + Send + 'static {
    let count = count.clone();
    let mut local = 0;
    move |_event: &usize, _sequence: i64, end_of_batch: bool| {
        local += 1;
        if end_of_batch {
            count.fetch_add(local, Ordering::Relaxed);
            local = 0;
        }
        Ok(())
    }
}

#[test]
fn pipeline_1p_diamond() {
    let count = Arc::new(AtomicUsize::new(0));
    let (mut pipeline, mut producer) = PipelineBuilder::new(|| 0_usize)
        .capacity(SCALE_QUEUE_SIZE)
        .wait_strategy(WaitStrategyKind::BusySpin)
        .handler("left", |_: &usize, _: i64, _: bool| -> Result<(), HandlerError> { Ok(()) })
        .handler("right", |_: &usize, _: i64, _: bool| -> Result<(), HandlerError> { Ok(()) })
        .stage(StageDefinition::new("join", counter(&count)).after("left").after("right"))
        .build_single_producer()
        .unwrap();
    pipeline.start().unwrap();

    let start = std::time::Instant::now();
    for i in 0..SCALE_MSG_COUNT {
        producer.publish_event(|slot, _| *slot = i);
    }
    pipeline.shutdown(true);
    let duration = start.elapsed().as_secs_f64();
    assert_eq!(count.load(Ordering::Relaxed), SCALE_MSG_COUNT);

    #[allow(clippy::cast_precision_loss)]
    let throughput = (SCALE_MSG_COUNT as f64) / duration;
    println!("pipeline_1p_diamond queue_size={SCALE_QUEUE_SIZE}, items={SCALE_MSG_COUNT}, throughput={throughput}");
}

#[test]
fn pipeline_mp_1c() {
    let count = Arc::new(AtomicUsize::new(0));
    let (mut pipeline, producer) = PipelineBuilder::new(|| 0_usize)
        .capacity(SCALE_QUEUE_SIZE)
        .wait_strategy(WaitStrategyKind::Yielding)
        .handler("count", counter(&count))
        .build_multi_producer()
        .unwrap();
    pipeline.start().unwrap();

    let start = std::time::Instant::now();
    let producers = (0..SCALE_PRODUCERS)
        .map(|p| {
            let mut producer = producer.clone();
            std::thread::spawn(move || {
                for i in 0..(SCALE_MSG_COUNT / SCALE_PRODUCERS) {
                    producer.publish_event(|slot, _| *slot = (p * SCALE_MSG_COUNT / SCALE_PRODUCERS) + i);
                }
            })
        })
        .collect::<Vec<_>>();
    for producer in producers {
        producer.join().unwrap();
    }
    pipeline.shutdown(true);
    let duration = start.elapsed().as_secs_f64();
    assert_eq!(count.load(Ordering::Relaxed), SCALE_MSG_COUNT);

    #[allow(clippy::cast_precision_loss)]
    let throughput = (SCALE_MSG_COUNT as f64) / duration;
    println!("pipeline_mp_1c queue_size={SCALE_QUEUE_SIZE}, items={SCALE_MSG_COUNT}, throughput={throughput}");
}
