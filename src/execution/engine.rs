//! The job engine.
//!
//! An [`Engine`] owns a parallel pool and a serial pool, the payload free
//! lists, and the sending half of the dispatcher. It is an explicit value
//! rather than a process-wide singleton: clone it to share it, and drop the
//! last clone to shut it down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{ConfigError, EngineConfig};
use crate::core::bundle::{Bundle, JobResult, Progress};
use crate::core::job::{ErasedJob, Job, JobBody, JobHandle};
use crate::core::recycle::{Pooled, Recycle, Recycler};
use crate::core::types::{JobId, PoolKind};
use crate::events::EventBus;
use crate::traverse::{DispatchStats, Traverse, TraverseLoop};

use super::Runtime;
use super::pool::{PoolStats, WorkerPool};

/// Errors returned when submitting a job.
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// The engine has been shut down.
    #[error("{pool} pool is shut down")]
    Shutdown { pool: PoolKind },

    /// No worker thread could be started to run the job.
    #[error("failed to start a {pool} worker: {source}")]
    Spawn {
        pool: PoolKind,
        #[source]
        source: std::io::Error,
    },
}

/// Counters of one payload free list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeListStats {
    pub idle: usize,
    pub in_use: usize,
    pub allocated: usize,
}

impl<T: Recycle + Default> From<&Recycler<T>> for FreeListStats {
    fn from(recycler: &Recycler<T>) -> Self {
        Self {
            idle: recycler.idle(),
            in_use: recycler.in_use(),
            allocated: recycler.allocated(),
        }
    }
}

/// Counters of every payload free list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadStats {
    pub params: FreeListStats,
    pub results: FreeListStats,
    pub progress: FreeListStats,
}

impl PayloadStats {
    /// Containers currently checked out of any free list.
    pub fn in_use(&self) -> usize {
        self.params.in_use + self.results.in_use + self.progress.in_use
    }
}

/// The engine's payload free lists.
#[derive(Debug, Clone)]
pub struct Payloads {
    params: Recycler<Bundle>,
    results: Recycler<JobResult>,
    progress: Recycler<Progress>,
}

impl Payloads {
    pub fn new(max_idle: usize) -> Self {
        Self {
            params: Recycler::with_max_idle(max_idle),
            results: Recycler::with_max_idle(max_idle),
            progress: Recycler::with_max_idle(max_idle),
        }
    }

    pub fn params(&self) -> &Recycler<Bundle> {
        &self.params
    }

    pub fn results(&self) -> &Recycler<JobResult> {
        &self.results
    }

    pub fn progress(&self) -> &Recycler<Progress> {
        &self.progress
    }

    pub fn stats(&self) -> PayloadStats {
        PayloadStats {
            params: FreeListStats::from(&self.params),
            results: FreeListStats::from(&self.results),
            progress: FreeListStats::from(&self.progress),
        }
    }
}

/// Snapshot of engine-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub parallel: PoolStats,
    pub serial: PoolStats,
    pub payloads: PayloadStats,
    pub dispatch: DispatchStats,
}

struct EngineInner {
    config: EngineConfig,
    parallel: WorkerPool,
    serial: WorkerPool,
    runtime: Arc<Runtime>,
    next_id: AtomicU64,
}

impl EngineInner {
    fn pool(&self, kind: PoolKind) -> &WorkerPool {
        match kind {
            PoolKind::Parallel => &self.parallel,
            PoolKind::Serial => &self.serial,
        }
    }

    fn shutdown(&self) {
        self.parallel.shutdown();
        self.serial.shutdown();
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Priority job engine with a parallel pool and a serial pool.
///
/// # Example
///
/// ```ignore
/// let (engine, dispatcher) = Engine::new(EngineConfig::default())?;
/// let consumer = dispatcher.spawn("traverse-consumer")?;
///
/// let handle = engine.execute(
///     Job::new(DecodeFont)
///         .with_priority(Priority::High)
///         .with_weak_owner(&listener)
///         .with_param(0, "fonts/mono.ttf"),
/// )?;
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine and the consumer loop its results are delivered on.
    ///
    /// The loop must be driven by the context that should receive
    /// callbacks; see [`TraverseLoop`].
    pub fn new(config: EngineConfig) -> Result<(Engine, TraverseLoop), ConfigError> {
        config.validate()?;

        let events = Arc::new(EventBus::new());
        let (traverse, consumer) = Traverse::channel(Arc::clone(&events));
        let runtime = Arc::new(Runtime {
            traverse,
            payloads: Payloads::new(config.payload_pool_capacity),
            events,
        });

        let parallel = WorkerPool::new(
            PoolKind::Parallel,
            config.thread_name.clone(),
            config.parallel.core_workers,
            config.parallel.max_workers,
            config.parallel.keep_alive,
            Arc::clone(&runtime),
        );
        let serial = WorkerPool::serial(config.thread_name.clone(), Arc::clone(&runtime));

        if !config.parallel.is_default_sizing() {
            tracing::info!(
                core_workers = config.parallel.core_workers,
                max_workers = config.parallel.max_workers,
                "parallel pool sizing overridden"
            );
        }
        tracing::debug!(
            core_workers = config.parallel.core_workers,
            max_workers = config.parallel.max_workers,
            keep_alive = ?config.parallel.keep_alive,
            "engine created"
        );

        let engine = Engine {
            inner: Arc::new(EngineInner {
                config,
                parallel,
                serial,
                runtime,
                next_id: AtomicU64::new(1),
            }),
        };
        Ok((engine, consumer))
    }

    /// Create an engine with the default sizing.
    pub fn with_defaults() -> Result<(Engine, TraverseLoop), ConfigError> {
        Self::new(EngineConfig::default())
    }

    /// Queue a job on the parallel pool.
    pub fn execute<B: JobBody>(&self, job: Job<B>) -> Result<JobHandle, ScheduleError> {
        self.execute_on(PoolKind::Parallel, job)
    }

    /// Queue a job on the serial pool.
    ///
    /// Jobs on this pool never overlap, and equal-priority jobs run in
    /// submission order.
    pub fn execute_in_single<B: JobBody>(&self, job: Job<B>) -> Result<JobHandle, ScheduleError> {
        self.execute_on(PoolKind::Serial, job)
    }

    /// Queue a job on the given pool.
    pub fn execute_on<B: JobBody>(
        &self,
        pool: PoolKind,
        job: Job<B>,
    ) -> Result<JobHandle, ScheduleError> {
        let cell = job.into_cell(|| self.next_id());
        let job: Arc<dyn ErasedJob> = Arc::new(cell);
        self.inner.pool(pool).submit(Arc::clone(&job))?;
        Ok(JobHandle::new(job, pool))
    }

    fn next_id(&self) -> JobId {
        JobId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Take an empty parameter container from the engine's free list.
    pub fn obtain_params(&self) -> Pooled<Bundle> {
        self.inner.runtime.payloads.params().get()
    }

    pub fn payloads(&self) -> &Payloads {
        &self.inner.runtime.payloads
    }

    /// The event bus jobs report their lifecycle to.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.runtime.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            parallel: self.inner.parallel.stats(),
            serial: self.inner.serial.stats(),
            payloads: self.inner.runtime.payloads.stats(),
            dispatch: self.inner.runtime.traverse.stats(),
        }
    }

    /// Block until both queues are empty and no body is running.
    ///
    /// Returns `false` if `timeout` elapsed first. A timeout too large to
    /// represent, such as `Duration::MAX`, waits without a deadline.
    /// Deliveries may still be waiting in the consumer loop afterwards.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            // A serial job may queue parallel work and vice versa, so both
            // pools must be idle at the same time.
            if !self.inner.parallel.wait_idle(deadline) || !self.inner.serial.wait_idle(deadline)
            {
                return false;
            }
            if self.inner.parallel.is_idle() && self.inner.serial.is_idle() {
                return true;
            }
        }
    }

    /// Reject further submissions. Already queued jobs still run.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.parallel.is_shutdown() && self.inner.serial.is_shutdown()
    }

    /// Shut down and wait for every worker thread to exit.
    pub fn join(&self) {
        self.inner.shutdown();
        self.inner.parallel.join();
        self.inner.serial.join();
        tracing::debug!("engine workers joined");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("parallel", &self.inner.parallel.stats())
            .field("serial", &self.inner.serial.stats())
            .finish()
    }
}
