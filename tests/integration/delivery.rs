//! Delivery integration tests.
//!
//! Tests that verify progress/result ordering on the consumer side and that
//! lost owners are skipped without leaking pooled payloads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use traverse::testing::{FnJob, Gate, Record, Recorder};
use traverse::{DispatchOutcome, Job, JobState, LivenessGuard};

use crate::common::{TIMEOUT, blocker, engine_with_workers, wait_for_arrivals};

fn reporting_job(label: String, steps: i64) -> Job<FnJob> {
    Job::new(FnJob::new(label, move |ctx, result| {
        for step in 0..steps {
            ctx.publish_progress_with(|progress| {
                progress.push(step);
            });
        }
        result.push(99i64);
        result.succeed();
    }))
}

#[test]
fn test_progress_precedes_result_for_each_job() {
    let (engine, consumer) = engine_with_workers(4);
    let recorder = Arc::new(Recorder::new());

    let mut handles = Vec::new();
    for i in 0..10 {
        let job = reporting_job(format!("job-{}", i), 5).with_strong_owner(Arc::clone(&recorder));
        handles.push(engine.execute(job).unwrap());
    }

    assert!(engine.wait_idle(TIMEOUT));
    engine.join();
    drop(engine);

    let stats = consumer.spawn("test-consumer").unwrap().join().unwrap();
    assert_eq!(stats.published, 60);
    assert_eq!(stats.delivered, 60);

    for i in 0..10 {
        let label = format!("job-{}", i);
        let mut expected: Vec<Record> = (0..5)
            .map(|value| Record::Progress {
                label: label.clone(),
                value,
            })
            .collect();
        expected.push(Record::Result {
            label: label.clone(),
            success: true,
            value: 99,
            error: None,
        });
        assert_eq!(recorder.for_label(&label), expected);
    }

    for handle in handles {
        assert_eq!(handle.progress_published(), 5);
        assert_eq!(handle.state(), JobState::Recycled);
    }
}

#[test]
fn test_dropped_weak_owner_is_skipped_and_payloads_recycled() {
    let (engine, mut consumer) = engine_with_workers(2);
    let gate = Arc::new(Gate::new());
    let recorder = Arc::new(Recorder::new());
    let owner_seen_alive = Arc::new(AtomicBool::new(true));

    for i in 0..2 {
        let gate = Arc::clone(&gate);
        let seen = Arc::clone(&owner_seen_alive);
        engine
            .execute(
                Job::new(FnJob::new(format!("job-{}", i), move |ctx, result| {
                    gate.wait();
                    seen.store(ctx.is_owner_alive(), Ordering::SeqCst);
                    ctx.publish_progress_with(|progress| {
                        progress.push(1);
                    });
                    result.succeed();
                }))
                .with_weak_owner(&recorder),
            )
            .unwrap();
    }
    wait_for_arrivals(&gate, 2);

    let weak = Arc::downgrade(&recorder);
    drop(recorder);
    assert!(weak.upgrade().is_none());

    gate.open();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    let stats = engine.stats();
    assert!(!owner_seen_alive.load(Ordering::SeqCst));
    assert_eq!(stats.dispatch.published, 4);
    assert_eq!(stats.dispatch.skipped, 4);
    assert_eq!(stats.dispatch.delivered, 0);
    assert_eq!(stats.payloads.in_use(), 0);
    assert_eq!(stats.payloads.results.idle, stats.payloads.results.allocated);
}

#[test]
fn test_detached_job_still_runs_but_is_not_delivered() {
    let (engine, mut consumer) = engine_with_workers(2);
    let gate = Arc::new(Gate::new());
    let recorder = Arc::new(Recorder::new());
    let ran = Arc::new(AtomicBool::new(false));

    engine.execute_in_single(blocker("blocker", &gate)).unwrap();
    wait_for_arrivals(&gate, 1);

    let flag = Arc::clone(&ran);
    let handle = engine
        .execute_in_single(
            Job::new(FnJob::new("detached", move |_ctx, result| {
                flag.store(true, Ordering::SeqCst);
                result.succeed();
            }))
            .with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();
    assert!(handle.is_attached());
    assert_eq!(handle.state(), JobState::Queued);

    handle.detach();
    assert!(!handle.is_attached());

    gate.open();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert!(ran.load(Ordering::SeqCst));
    assert!(recorder.is_empty());
    assert_eq!(handle.state(), JobState::Recycled);
    assert_eq!(Arc::strong_count(&recorder), 1);
}

#[test]
fn test_revoked_liveness_guard_skips_delivery() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());
    let live = LivenessGuard::new();
    let revoked = LivenessGuard::new();

    engine
        .execute(
            Job::new(FnJob::returning("live", 1))
                .with_guarded_owner(Arc::clone(&recorder), live.liveness()),
        )
        .unwrap();
    engine
        .execute(
            Job::new(FnJob::returning("revoked", 2))
                .with_guarded_owner(Arc::clone(&recorder), revoked.liveness()),
        )
        .unwrap();
    revoked.revoke();

    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert_eq!(recorder.result_labels(), vec!["live"]);
    let stats = consumer.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_try_next_reports_each_outcome() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());

    engine
        .execute_in_single(Job::new(FnJob::returning("owned", 1)).with_weak_owner(&recorder))
        .unwrap();
    engine
        .execute_in_single(Job::new(FnJob::returning("orphan", 2)))
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));

    assert_eq!(consumer.try_next(), Some(DispatchOutcome::Delivered));
    assert_eq!(consumer.try_next(), Some(DispatchOutcome::Skipped));
    assert_eq!(consumer.try_next(), None);
    assert_eq!(recorder.result_count(), 1);
}

#[test]
fn test_dispatched_result_releases_strong_owner() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());

    let handle = engine
        .execute(Job::new(FnJob::returning("held", 4)).with_strong_owner(Arc::clone(&recorder)))
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert_eq!(recorder.result_count(), 1);
    assert_eq!(handle.state(), JobState::Recycled);
    assert!(!handle.is_attached());
    assert_eq!(Arc::strong_count(&recorder), 1);
}

#[test]
fn test_dropping_the_loop_settles_queued_deliveries() {
    let (engine, consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());

    let handle = engine
        .execute(
            Job::new(FnJob::new("orphaned", |ctx, result| {
                ctx.publish_progress_with(|progress| {
                    progress.push(1);
                });
                result.succeed();
            }))
            .with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));
    drop(consumer);

    assert!(recorder.is_empty());
    assert_eq!(handle.state(), JobState::Recycled);
    assert_eq!(Arc::strong_count(&recorder), 1);
    let stats = engine.stats();
    assert_eq!(stats.dispatch.published, 2);
    assert_eq!(stats.dispatch.dropped, 2);
    assert_eq!(stats.dispatch.pending(), 0);
    assert_eq!(stats.payloads.in_use(), 0);

    let late = engine
        .execute(Job::new(FnJob::returning("late", 2)).with_strong_owner(Arc::clone(&recorder)))
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));
    assert_eq!(late.state(), JobState::Recycled);
    assert_eq!(engine.stats().dispatch.dropped, 3);
    assert_eq!(engine.stats().payloads.in_use(), 0);
}
