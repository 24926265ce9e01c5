//! Job lifecycle integration tests.
//!
//! Tests that verify panic containment, lifecycle events, worker growth and
//! retirement, and shutdown behavior.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use traverse::testing::{FnJob, Gate, Record, Recorder, wait_until};
use traverse::{
    DispatchOutcome, Engine, EngineConfig, EngineEvent, EventHandler, Job, JobBody, JobContext,
    JobResult, JobState, PoolConfig, PoolKind, ScheduleError,
};

use crate::common::{TIMEOUT, blocker, engine_with_workers, init_tracing, wait_for_arrivals};

/// Recording event handler for verifying events.
#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingHandler {
    fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, event: &EngineEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Event handler that panics on the events it selects.
struct PanicOn(fn(&EngineEvent) -> bool);

impl EventHandler for PanicOn {
    fn handle(&self, event: &EngineEvent) {
        if (self.0)(event) {
            panic!("handler failed on {:?}", event);
        }
    }
}

#[test]
fn test_body_panic_becomes_failed_result() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());
    let handler = Arc::new(RecordingHandler::default());
    engine.events().register(handler.clone());

    let panicking = engine
        .execute_in_single(
            Job::new(FnJob::new("panicking", |_ctx, _result| {
                panic!("decoder exploded");
            }))
            .with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();
    engine
        .execute_in_single(
            Job::new(FnJob::returning("after", 7)).with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();

    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert_eq!(
        recorder.records(),
        vec![
            Record::Result {
                label: "panicking".into(),
                success: false,
                value: 0,
                error: Some("job panicked: decoder exploded".into()),
            },
            Record::Result {
                label: "after".into(),
                success: true,
                value: 7,
                error: None,
            },
        ]
    );
    assert_eq!(engine.stats().serial.live, 1);
    assert!(handler.events().iter().any(|event| matches!(
        event,
        EngineEvent::JobPanicked { job_id, message, .. }
            if *job_id == panicking.id() && message == "decoder exploded"
    )));
}

struct FaultyTranslator;

impl JobBody for FaultyTranslator {
    type Callback = Recorder;

    fn do_in_background(&self, _ctx: &mut JobContext<'_>, result: &mut JobResult) {
        result.succeed();
    }

    fn on_result(&self, _recorder: &Recorder, _result: &JobResult) {
        panic!("listener bug");
    }
}

#[test]
fn test_callback_panic_does_not_stop_the_loop() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());

    engine
        .execute_in_single(Job::new(FaultyTranslator).with_strong_owner(Arc::clone(&recorder)))
        .unwrap();
    engine
        .execute_in_single(
            Job::new(FnJob::returning("healthy", 3)).with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));

    assert_eq!(consumer.try_next(), Some(DispatchOutcome::CallbackPanicked));
    assert_eq!(consumer.try_next(), Some(DispatchOutcome::Delivered));

    let stats = engine.stats();
    assert_eq!(stats.dispatch.callback_panics, 1);
    assert_eq!(stats.payloads.in_use(), 0);
    assert_eq!(recorder.result_labels(), vec!["healthy"]);
}

#[test]
fn test_lifecycle_events_are_emitted_in_order() {
    let (engine, mut consumer) = engine_with_workers(2);
    let handler = Arc::new(RecordingHandler::default());
    engine.events().register(handler.clone());
    let recorder = Arc::new(Recorder::new());

    let handle = engine
        .execute(
            Job::new(FnJob::returning("observed", 1)).with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    let kinds: Vec<&str> = handler
        .events()
        .iter()
        .filter(|event| event.job_id() == handle.id())
        .filter_map(|event| match event {
            EngineEvent::JobStarted { .. } => Some("started"),
            EngineEvent::JobCompleted { success: true, .. } => Some("completed"),
            EngineEvent::ResultDispatched {
                outcome: DispatchOutcome::Delivered,
                ..
            } => Some("dispatched"),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["started", "completed", "dispatched"]);
    assert!(handler.events().iter().any(|event| matches!(
        event,
        EngineEvent::JobQueued { job_id, pool: PoolKind::Parallel, .. } if *job_id == handle.id()
    )));
}

#[test]
fn test_panicking_start_handler_does_not_lose_the_result() {
    let (engine, mut consumer) = engine_with_workers(2);
    engine.events().register(Arc::new(PanicOn(|event| {
        matches!(event, EngineEvent::JobStarted { .. })
    })));
    let recorder = Arc::new(Recorder::new());
    let ran = Arc::new(AtomicBool::new(false));

    let body_ran = Arc::clone(&ran);
    let handle = engine
        .execute_in_single(
            Job::new(FnJob::new("started", move |_ctx, result| {
                body_ran.store(true, Ordering::SeqCst);
                result.push(5);
                result.succeed();
            }))
            .with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(recorder.result_labels(), vec!["started"]);
    assert_eq!(handle.state(), JobState::Recycled);
    assert_eq!(engine.stats().payloads.in_use(), 0);
}

#[test]
fn test_panicking_dispatch_handler_does_not_stop_the_loop() {
    let (engine, mut consumer) = engine_with_workers(2);
    engine.events().register(Arc::new(PanicOn(|event| {
        matches!(
            event,
            EngineEvent::ResultDispatched { .. } | EngineEvent::DeliverySkipped { .. }
        )
    })));
    let recorder = Arc::new(Recorder::new());

    engine
        .execute_in_single(
            Job::new(FnJob::returning("first", 1)).with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));
    assert_eq!(consumer.try_next(), Some(DispatchOutcome::Delivered));

    engine
        .execute_in_single(
            Job::new(FnJob::returning("second", 2)).with_strong_owner(Arc::clone(&recorder)),
        )
        .unwrap();
    assert!(engine.wait_idle(TIMEOUT));
    assert_eq!(consumer.drain(), 1);

    let stats = engine.stats().dispatch;
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.published, 2);
    assert_eq!(recorder.result_labels(), vec!["first", "second"]);
}

#[test]
fn test_extra_workers_retire_after_keep_alive() {
    init_tracing();
    let config = EngineConfig::default().with_parallel(PoolConfig {
        core_workers: 1,
        max_workers: 3,
        keep_alive: Duration::from_millis(50),
    });
    let (engine, mut consumer) = Engine::new(config).unwrap();
    let gate = Arc::new(Gate::new());

    engine.execute(blocker("first", &gate)).unwrap();
    wait_for_arrivals(&gate, 1);
    for i in 0..4 {
        engine
            .execute(blocker(&format!("backlog-{}", i), &gate))
            .unwrap();
    }

    let grown = engine.stats().parallel.live;
    assert!((2..=3).contains(&grown), "live workers: {}", grown);

    gate.open();
    assert!(engine.wait_idle(TIMEOUT));
    consumer.drain();

    assert!(wait_until(TIMEOUT, || engine.stats().parallel.live == 1));
}

#[test]
fn test_shutdown_rejects_new_jobs_but_drains_queue() {
    let (engine, mut consumer) = engine_with_workers(2);
    let recorder = Arc::new(Recorder::new());
    let gate = Arc::new(Gate::new());

    engine.execute_in_single(blocker("blocker", &gate)).unwrap();
    wait_for_arrivals(&gate, 1);
    for i in 0..3 {
        engine
            .execute_in_single(
                Job::new(FnJob::returning(format!("queued-{}", i), i))
                    .with_strong_owner(Arc::clone(&recorder)),
            )
            .unwrap();
    }

    engine.shutdown();
    assert!(engine.is_shutdown());
    let rejected = engine.execute(Job::new(FnJob::returning("late", 0)));
    assert!(matches!(
        rejected,
        Err(ScheduleError::Shutdown {
            pool: PoolKind::Parallel
        })
    ));

    gate.open();
    engine.join();
    consumer.drain();

    assert_eq!(
        recorder.result_labels(),
        vec!["queued-0", "queued-1", "queued-2"]
    );
    assert_eq!(engine.stats().serial.live, 0);
}
