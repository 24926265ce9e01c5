//! End-to-end integration tests.
//!
//! Tests that drive a mixed workload through the engine with the consumer
//! loop running on an async runtime, the way an application would.

use parking_lot::Mutex;
use std::sync::Arc;
use traverse::testing::{FnJob, Gate, Recorder};
use traverse::{Job, JobId, Priority};

use crate::common::{TIMEOUT, blocker, engine_with_workers, wait_for_arrivals};

fn mean_position(log: &[(JobId, Priority)], priority: Priority) -> f64 {
    let positions: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, (_, p))| *p == priority)
        .map(|(index, _)| index)
        .collect();
    positions.iter().sum::<usize>() as f64 / positions.len() as f64
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_high_priority_jobs_complete_earlier_on_average() {
    let (engine, consumer) = engine_with_workers(2);
    let dispatcher = tokio::spawn(consumer.run());
    let gate = Arc::new(Gate::new());
    let log: Arc<Mutex<Vec<(JobId, Priority)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::new(Recorder::new());

    // Occupy both workers so the whole batch is queued before anything runs.
    engine.execute(blocker("blocker-a", &gate)).unwrap();
    engine.execute(blocker("blocker-b", &gate)).unwrap();
    wait_for_arrivals(&gate, 2);

    for i in 0..100 {
        let priority = if i % 2 == 0 {
            Priority::High
        } else {
            Priority::Low
        };
        let log = Arc::clone(&log);
        engine
            .execute(
                Job::new(FnJob::new(format!("job-{}", i), move |ctx, result| {
                    log.lock().push((ctx.id(), ctx.priority()));
                    result.push(i);
                    result.succeed();
                }))
                .with_priority(priority)
                .with_weak_owner(&recorder),
            )
            .unwrap();
    }

    gate.open();
    assert!(engine.wait_idle(TIMEOUT));
    engine.join();
    drop(engine);

    let stats = dispatcher.await.unwrap();
    assert_eq!(stats.published, 102);
    assert_eq!(stats.delivered, 100);
    assert_eq!(stats.skipped, 2);
    assert_eq!(recorder.result_count(), 100);

    let log = log.lock();
    assert_eq!(log.len(), 100);
    let high = mean_position(&log, Priority::High);
    let low = mean_position(&log, Priority::Low);
    assert!(
        high < low,
        "high priority mean position {} should precede low priority mean position {}",
        high,
        low
    );
}

#[tokio::test]
async fn test_next_awaits_deliveries() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());

    engine
        .execute(
            Job::new(FnJob::new("progressing", |ctx, result| {
                ctx.publish_progress_with(|progress| {
                    progress.push(50);
                });
                result.succeed();
            }))
            .with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();

    assert!(consumer.next().await.is_some());
    assert!(consumer.next().await.is_some());
    assert_eq!(recorder.len(), 2);
    assert_eq!(recorder.result_count(), 1);

    engine.join();
    drop(engine);
    assert!(consumer.next().await.is_none());
}
