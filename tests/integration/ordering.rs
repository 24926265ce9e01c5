//! Queue ordering integration tests.
//!
//! Tests that verify priority precedence, FIFO order among equal
//! priorities, and strict one-at-a-time execution on the serial pool.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use traverse::testing::{ConcurrencyProbe, FnJob, Gate, Recorder};
use traverse::{Job, Priority};

use crate::common::{TIMEOUT, blocker, engine_with_workers, wait_for_arrivals};

#[test]
fn test_serial_pool_runs_higher_priority_first() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());
    let gate = Arc::new(Gate::new());

    engine
        .execute_in_single(blocker("blocker", &gate).with_strong_owner(Arc::clone(&recorder)))
        .unwrap();
    wait_for_arrivals(&gate, 1);

    for (label, priority) in [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("high", Priority::High),
    ] {
        engine
            .execute_in_single(
                Job::new(FnJob::returning(label, 0))
                    .with_priority(priority)
                    .with_strong_owner(Arc::clone(&recorder)),
            )
            .unwrap();
    }

    gate.open();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert_eq!(
        recorder.result_labels(),
        vec!["blocker", "high", "normal", "low"]
    );
}

#[test]
fn test_serial_pool_is_fifo_for_equal_priority() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());
    let gate = Arc::new(Gate::new());

    engine
        .execute_in_single(blocker("blocker", &gate))
        .unwrap();
    wait_for_arrivals(&gate, 1);

    let expected: Vec<String> = (0..20).map(|i| format!("job-{}", i)).collect();
    for label in &expected {
        engine
            .execute_in_single(
                Job::new(FnJob::returning(label.as_str(), 0))
                    .with_strong_owner(Arc::clone(&recorder)),
            )
            .unwrap();
    }

    gate.open();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert_eq!(recorder.result_labels(), expected);
}

#[test]
fn test_serial_pool_never_overlaps() {
    let (engine, mut consumer) = engine_with_workers(4);
    let probe = Arc::new(ConcurrencyProbe::new());

    for i in 0..50 {
        let probe = Arc::clone(&probe);
        engine
            .execute_in_single(Job::new(FnJob::new(format!("job-{}", i), move |_ctx, result| {
                let _running = probe.enter();
                thread::sleep(Duration::from_micros(200));
                result.succeed();
            })))
            .unwrap();
    }

    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert_eq!(probe.peak(), 1);
    assert_eq!(probe.current(), 0);
    assert_eq!(engine.stats().serial.live, 1);
}

#[test]
fn test_parallel_pool_overlaps_up_to_worker_count() {
    let (engine, mut consumer) = engine_with_workers(3);
    let probe = Arc::new(ConcurrencyProbe::new());
    let gate = Arc::new(Gate::new());

    for i in 0..3 {
        let probe = Arc::clone(&probe);
        let gate = Arc::clone(&gate);
        engine
            .execute(Job::new(FnJob::new(format!("job-{}", i), move |_ctx, result| {
                let _running = probe.enter();
                gate.wait();
                result.succeed();
            })))
            .unwrap();
    }

    wait_for_arrivals(&gate, 3);
    assert_eq!(probe.current(), 3);
    assert_eq!(engine.stats().parallel.running, 3);

    gate.open();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();
    assert_eq!(probe.peak(), 3);
}
