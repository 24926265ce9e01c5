//! Worker pools backed by OS threads.
//!
//! A pool starts workers lazily: one per submission until the core count is
//! reached, then extra workers up to the maximum while the backlog exceeds
//! the number of live workers. Extra workers exit after sitting idle for the
//! keep-alive duration. The serial pool is a pool with one core and one
//! maximum worker.

use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::job::ErasedJob;
use crate::core::types::{JobState, PoolKind};
use crate::events::EngineEvent;

use super::engine::ScheduleError;
use super::queue::{WorkItem, WorkQueue};
use super::{Runtime, panic_message};

/// Snapshot of a pool's worker and queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub kind: PoolKind,
    /// Workers currently alive.
    pub live: usize,
    /// Live workers waiting for work.
    pub idle: usize,
    /// Bodies currently executing.
    pub running: usize,
    /// Jobs waiting in the queue.
    pub queued: usize,
    pub core_workers: usize,
    pub max_workers: usize,
}

struct PoolState {
    queue: WorkQueue,
    live: usize,
    idle: usize,
    running: usize,
    shutdown: bool,
}

struct PoolShared {
    kind: PoolKind,
    thread_name: String,
    core_workers: usize,
    max_workers: usize,
    keep_alive: Duration,
    state: Mutex<PoolState>,
    work_available: Condvar,
    quiescent: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    spawned: AtomicUsize,
    runtime: Arc<Runtime>,
}

impl PoolShared {
    /// Block until there is work, or return `None` when this worker should exit.
    fn next_item(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.queue.pop() {
                state.running += 1;
                return Some(item);
            }
            if state.shutdown {
                state.live -= 1;
                self.quiescent.notify_all();
                return None;
            }

            state.idle += 1;
            let timed_out = if state.live > self.core_workers {
                self.work_available
                    .wait_for(&mut state, self.keep_alive)
                    .timed_out()
            } else {
                self.work_available.wait(&mut state);
                false
            };
            state.idle -= 1;

            if timed_out && state.queue.is_empty() && state.live > self.core_workers {
                state.live -= 1;
                tracing::debug!(pool = %self.kind, live = state.live, "idle worker retiring");
                return None;
            }
        }
    }

    fn finish_item(&self) {
        let mut state = self.state.lock();
        state.running -= 1;
        if state.running == 0 && state.queue.is_empty() {
            self.quiescent.notify_all();
        }
    }

    fn is_quiescent(state: &PoolState) -> bool {
        state.running == 0 && state.queue.is_empty()
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    tracing::debug!(pool = %shared.kind, "worker started");
    while let Some(item) = shared.next_item() {
        let WorkItem {
            job,
            submitted_at,
            pool,
            ..
        } = item;
        let job_id = job.id();
        let waited = submitted_at.elapsed();
        tracing::trace!(job_id = %job_id, %pool, ?waited, "running job");

        // Bodies are already guarded inside run(); this keeps the worker
        // alive if an event handler panics.
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| job.run(&shared.runtime, pool, waited)));
        if let Err(panic) = outcome {
            tracing::error!(
                job_id = %job_id,
                %pool,
                panic = %panic_message(panic.as_ref()),
                "worker caught panic outside job body"
            );
        }
        shared.finish_item();
    }
    tracing::debug!(pool = %shared.kind, "worker exiting");
}

/// A pool of worker threads consuming one priority queue.
pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub(crate) fn new(
        kind: PoolKind,
        thread_name: String,
        core_workers: usize,
        max_workers: usize,
        keep_alive: Duration,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                kind,
                thread_name,
                core_workers,
                max_workers,
                keep_alive,
                state: Mutex::new(PoolState {
                    queue: WorkQueue::new(kind),
                    live: 0,
                    idle: 0,
                    running: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                quiescent: Condvar::new(),
                workers: Mutex::new(Vec::new()),
                spawned: AtomicUsize::new(0),
                runtime,
            }),
        }
    }

    /// Single-worker pool with strictly serial execution.
    pub(crate) fn serial(thread_name: String, runtime: Arc<Runtime>) -> Self {
        Self::new(
            PoolKind::Serial,
            thread_name,
            1,
            1,
            Duration::MAX,
            runtime,
        )
    }

    /// Queue a job without blocking on its execution.
    pub(crate) fn submit(&self, job: Arc<dyn ErasedJob>) -> Result<(), ScheduleError> {
        let shared = &self.shared;
        let job_id = job.id();
        let priority = job.priority();

        let (sequence, spawn) = {
            let mut state = shared.state.lock();
            if state.shutdown {
                return Err(ScheduleError::Shutdown { pool: shared.kind });
            }
            job.mark(JobState::Queued);
            let sequence = state.queue.push(job);
            let spawn = state.live < shared.core_workers
                || (state.idle == 0
                    && state.queue.len() > state.live
                    && state.live < shared.max_workers);
            if spawn {
                state.live += 1;
            }
            (sequence, spawn)
        };
        shared.work_available.notify_one();

        tracing::trace!(job_id = %job_id, pool = %shared.kind, %priority, "job queued");
        shared
            .runtime
            .events
            .emit(EngineEvent::job_queued(job_id, priority, shared.kind));

        if spawn {
            if let Err(source) = self.spawn_worker() {
                let mut state = shared.state.lock();
                state.live -= 1;
                if state.live == 0 && state.queue.remove(sequence).is_some() {
                    return Err(ScheduleError::Spawn {
                        pool: shared.kind,
                        source,
                    });
                }
                tracing::warn!(
                    pool = %shared.kind,
                    error = %source,
                    live = state.live,
                    "failed to start extra worker, continuing with existing workers"
                );
            }
        }
        Ok(())
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        let shared = Arc::clone(&self.shared);
        let index = shared.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}-{}", shared.thread_name, shared.kind, index);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(shared))?;

        let mut workers = self.shared.workers.lock();
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);
        Ok(())
    }

    /// Block until the queue is empty and no body is running, or the
    /// deadline passes. `None` waits without a deadline. Returns whether the
    /// pool went quiet.
    pub(crate) fn wait_idle(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.shared.state.lock();
        while !PoolShared::is_quiescent(&state) {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .quiescent
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return PoolShared::is_quiescent(&state);
                    }
                }
                None => self.shared.quiescent.wait(&mut state),
            }
        }
        true
    }

    pub(crate) fn is_idle(&self) -> bool {
        PoolShared::is_quiescent(&self.shared.state.lock())
    }

    /// Stop accepting jobs. Queued jobs still run.
    pub(crate) fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            tracing::debug!(
                pool = %self.shared.kind,
                queued = state.queue.len(),
                "pool shutting down"
            );
        }
        drop(state);
        self.shared.work_available.notify_all();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Wait for every worker thread to exit. Call after [`shutdown`](Self::shutdown).
    pub(crate) fn join(&self) {
        let workers = std::mem::take(&mut *self.shared.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                tracing::warn!(pool = %self.shared.kind, "worker thread panicked");
            }
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            kind: self.shared.kind,
            live: state.live,
            idle: state.idle,
            running: state.running,
            queued: state.queue.len(),
            core_workers: self.shared.core_workers,
            max_workers: self.shared.max_workers,
        }
    }
}
