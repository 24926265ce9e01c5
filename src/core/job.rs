//! Job descriptors, job bodies and handles.
//!
//! A [`Job`] bundles a [`JobBody`] with its priority, identity, tag, owner
//! reference and parameters. Submitting a job to the engine consumes it, so a
//! submitted job can't be submitted twice; the returned [`JobHandle`] lets
//! the submitter observe its state or detach the owner.

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bundle::{Bundle, JobResult, Progress, Value};
use super::owner::{Liveness, Owner};
use super::recycle::{Pooled, Recycle};
use super::types::{AtomicJobState, JobId, JobState, PoolKind, Priority};
use crate::events::EngineEvent;
use crate::execution::{Runtime, panic_message};
use crate::traverse::Payload;

/// The work a job performs and how its payloads reach the owner.
///
/// `do_in_background` runs once on a worker thread. `on_progress` and
/// `on_result` run on the consumer thread driving the
/// [`TraverseLoop`](crate::TraverseLoop), and only when the owner still
/// resolves.
///
/// Failures inside the body should be recorded with
/// [`JobResult::fail`] so that `on_result` stays the single notification
/// path. A panic is still caught by the worker and turned into a failed
/// result.
///
/// # Example
///
/// ```ignore
/// use traverse::{JobBody, JobContext, JobResult};
///
/// trait DecodeListener: Send + Sync {
///     fn decoded(&self, glyphs: i32);
///     fn failed(&self, reason: &str);
/// }
///
/// struct DecodeFont;
///
/// impl JobBody for DecodeFont {
///     type Callback = dyn DecodeListener;
///
///     fn do_in_background(&self, ctx: &mut JobContext<'_>, result: &mut JobResult) {
///         let path = ctx.params().get_str(0, "");
///         match decode(path) {
///             Ok(count) => {
///                 result.push(count);
///                 result.succeed();
///             }
///             Err(e) => {
///                 result.fail(e.to_string());
///             }
///         }
///     }
///
///     fn on_result(&self, listener: &dyn DecodeListener, result: &JobResult) {
///         if result.is_success() {
///             listener.decoded(result.values().get_int(0, 0));
///         } else {
///             listener.failed(result.error().unwrap_or("unknown"));
///         }
///     }
/// }
/// ```
pub trait JobBody: Send + Sync + 'static {
    /// The owner interface the translators call into.
    type Callback: ?Sized + Send + Sync + 'static;

    /// Execute the job on a worker thread, filling in `result`.
    ///
    /// `result` starts out cleared and unsuccessful.
    fn do_in_background(&self, ctx: &mut JobContext<'_>, result: &mut JobResult);

    /// Translate the final result into owner callbacks.
    fn on_result(&self, _callback: &Self::Callback, _result: &JobResult) {}

    /// Translate a progress update into owner callbacks.
    fn on_progress(&self, _callback: &Self::Callback, _progress: &Progress) {}
}

/// A job ready for submission.
pub struct Job<B: JobBody> {
    id: Option<JobId>,
    priority: Priority,
    tag: Option<String>,
    owner: Owner<B::Callback>,
    params: Pooled<Bundle>,
    body: B,
}

impl<B: JobBody> Job<B> {
    /// Create a job with normal priority, no owner and no parameters.
    pub fn new(body: B) -> Self {
        Self {
            id: None,
            priority: Priority::Normal,
            tag: None,
            owner: Owner::Detached,
            params: Pooled::detached(Bundle::new()),
            body,
        }
    }

    /// Set an explicit id. Without one the engine assigns the next free id.
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach an opaque tag, e.g. the name of the requesting component.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_owner(mut self, owner: Owner<B::Callback>) -> Self {
        self.owner = owner;
        self
    }

    /// Keep the owner alive until the job is finished.
    pub fn with_strong_owner(self, owner: Arc<B::Callback>) -> Self {
        self.with_owner(Owner::Strong(owner))
    }

    /// Deliver only while the owner is alive elsewhere.
    pub fn with_weak_owner(self, owner: &Arc<B::Callback>) -> Self {
        self.with_owner(Owner::Weak(Arc::downgrade(owner)))
    }

    /// Deliver only while `liveness` reports the owner alive.
    pub fn with_guarded_owner(self, owner: Arc<B::Callback>, liveness: Liveness) -> Self {
        self.with_owner(Owner::guarded(owner, liveness))
    }

    /// Replace the parameter container, e.g. with one from
    /// [`Engine::obtain_params`](crate::Engine::obtain_params).
    pub fn with_params(mut self, params: impl Into<Pooled<Bundle>>) -> Self {
        self.params = params.into();
        self
    }

    /// Store a single parameter.
    pub fn with_param(mut self, key: u32, value: impl Into<Value>) -> Self {
        self.params.put(key, value);
        self
    }

    pub fn id(&self) -> Option<JobId> {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn params(&self) -> &Bundle {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Bundle {
        &mut self.params
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub(crate) fn into_cell(self, fallback_id: impl FnOnce() -> JobId) -> JobCell<B> {
        JobCell {
            id: self.id.unwrap_or_else(fallback_id),
            priority: self.priority,
            tag: self.tag,
            body: self.body,
            owner: Mutex::new(self.owner),
            params: Mutex::new(Some(self.params)),
            state: AtomicJobState::new(JobState::Created),
            progress_published: AtomicU32::new(0),
        }
    }
}

impl<B: JobBody> fmt::Debug for Job<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("tag", &self.tag)
            .field("owner", &self.owner)
            .field("params", &self.params.len())
            .finish()
    }
}

/// What a running body sees of its job.
pub struct JobContext<'a> {
    job: &'a Arc<dyn ErasedJob>,
    params: &'a Bundle,
    runtime: &'a Runtime,
}

impl JobContext<'_> {
    pub fn id(&self) -> JobId {
        self.job.id()
    }

    pub fn priority(&self) -> Priority {
        self.job.priority()
    }

    pub fn tag(&self) -> Option<&str> {
        self.job.tag()
    }

    /// Parameters supplied at submission.
    pub fn params(&self) -> &Bundle {
        self.params
    }

    /// Check whether the owner would still receive deliveries.
    ///
    /// Long-running bodies can poll this to stop early once the requester is
    /// gone.
    pub fn is_owner_alive(&self) -> bool {
        self.job.is_attached()
    }

    /// Take an empty progress container from the engine's free list.
    pub fn obtain_progress(&self) -> Pooled<Progress> {
        self.runtime.payloads.progress().get()
    }

    /// Send a progress update to the owner.
    ///
    /// Returns `false` if no consumer loop is left to receive it; the
    /// container is recycled either way.
    pub fn publish_progress(&mut self, progress: Pooled<Progress>) -> bool {
        self.job.note_progress();
        self.runtime
            .traverse
            .publish_progress(Arc::clone(self.job), progress)
    }

    /// Fill a pooled progress container and publish it.
    pub fn publish_progress_with(&mut self, fill: impl FnOnce(&mut Progress)) -> bool {
        let mut progress = self.obtain_progress();
        fill(&mut progress);
        self.publish_progress(progress)
    }
}

/// Type-erased job as seen by queues, workers and the dispatcher.
pub(crate) trait ErasedJob: Send + Sync {
    fn id(&self) -> JobId;
    fn priority(&self) -> Priority;
    fn tag(&self) -> Option<&str>;
    fn state(&self) -> JobState;
    fn mark(&self, state: JobState);
    fn detach(&self);
    fn is_attached(&self) -> bool;
    fn note_progress(&self);
    fn progress_published(&self) -> u32;

    /// Run the body and publish its result. Called once, on a worker.
    fn run(self: Arc<Self>, runtime: &Runtime, pool: PoolKind, waited: Duration);

    /// Resolve the owner and invoke the matching translator.
    ///
    /// Returns `false` if the owner was gone.
    fn deliver(&self, payload: &Payload) -> bool;
}

/// A submitted job.
pub(crate) struct JobCell<B: JobBody> {
    id: JobId,
    priority: Priority,
    tag: Option<String>,
    body: B,
    owner: Mutex<Owner<B::Callback>>,
    params: Mutex<Option<Pooled<Bundle>>>,
    state: AtomicJobState,
    progress_published: AtomicU32,
}

impl<B: JobBody> JobCell<B> {
    fn execute_body(
        &self,
        job: &Arc<dyn ErasedJob>,
        runtime: &Runtime,
        result: &mut JobResult,
    ) -> Result<(), Box<dyn Any + Send>> {
        let params = self
            .params
            .lock()
            .take()
            .unwrap_or_else(|| Pooled::detached(Bundle::new()));
        let mut ctx = JobContext {
            job,
            params: &params,
            runtime,
        };
        panic::catch_unwind(AssertUnwindSafe(|| {
            self.body.do_in_background(&mut ctx, result)
        }))
    }
}

impl<B: JobBody> ErasedJob for JobCell<B> {
    fn id(&self) -> JobId {
        self.id
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn state(&self) -> JobState {
        self.state.get()
    }

    fn mark(&self, state: JobState) {
        self.state.advance(state);
    }

    fn detach(&self) {
        let previous = self.owner.lock().clear();
        // Drop the owner outside the lock; its destructor may do anything.
        drop(previous);
    }

    fn is_attached(&self) -> bool {
        self.owner.lock().is_alive()
    }

    fn note_progress(&self) {
        self.progress_published.fetch_add(1, Ordering::AcqRel);
    }

    fn progress_published(&self) -> u32 {
        self.progress_published.load(Ordering::Acquire)
    }

    fn run(self: Arc<Self>, runtime: &Runtime, pool: PoolKind, waited: Duration) {
        let job: Arc<dyn ErasedJob> = self.clone();
        self.mark(JobState::Running);
        runtime
            .events
            .emit(EngineEvent::job_started(self.id, pool, waited));

        let started = Instant::now();
        let mut result = runtime.payloads.results().get();

        if let Err(panic) = self.execute_body(&job, runtime, &mut result) {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                job_id = %self.id,
                pool = %pool,
                panic = %message,
                "job body panicked"
            );
            result.recycle();
            result.fail(format!("job panicked: {}", message));
            runtime
                .events
                .emit(EngineEvent::job_panicked(self.id, pool, message));
        }

        let success = result.is_success();
        self.mark(JobState::Completed);
        runtime.events.emit(EngineEvent::job_completed(
            self.id,
            pool,
            success,
            started.elapsed(),
        ));
        tracing::debug!(job_id = %self.id, pool = %pool, success, "job completed");

        runtime.traverse.publish_result(job, result);
    }

    fn deliver(&self, payload: &Payload) -> bool {
        // Resolve once; the lock is released before any callback runs.
        let owner = self.owner.lock().resolve();
        let Some(owner) = owner else {
            return false;
        };
        match payload {
            Payload::Progress(progress) => self.body.on_progress(&owner, progress),
            Payload::Result(result) => self.body.on_result(&owner, result),
        }
        true
    }
}

/// Submitter-side view of a job after submission.
#[derive(Clone)]
pub struct JobHandle {
    job: Arc<dyn ErasedJob>,
    pool: PoolKind,
}

impl JobHandle {
    pub(crate) fn new(job: Arc<dyn ErasedJob>, pool: PoolKind) -> Self {
        Self { job, pool }
    }

    pub fn id(&self) -> JobId {
        self.job.id()
    }

    pub fn priority(&self) -> Priority {
        self.job.priority()
    }

    pub fn tag(&self) -> Option<&str> {
        self.job.tag()
    }

    /// The pool the job was submitted to.
    pub fn pool(&self) -> PoolKind {
        self.pool
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    /// Number of progress updates the body has published so far.
    pub fn progress_published(&self) -> u32 {
        self.job.progress_published()
    }

    /// Clear the owner reference.
    ///
    /// The body still runs if it hasn't yet, but every delivery from now on
    /// is skipped and its payload recycled.
    pub fn detach(&self) {
        tracing::debug!(job_id = %self.job.id(), "detaching job owner");
        self.job.detach();
    }

    /// Check whether deliveries would currently reach an owner.
    ///
    /// Also `false` once the result has been dispatched; the owner
    /// reference is released at that point.
    pub fn is_attached(&self) -> bool {
        self.job.is_attached()
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.job.id())
            .field("pool", &self.pool)
            .field("state", &self.job.state())
            .finish()
    }
}
