//! Testing utilities for users of the traverse library.
//!
//! This module provides helpers for testing job submission and delivery:
//!
//! - [`FnJob`]: A job body built from a closure that reports to a [`Recorder`]
//! - [`Recorder`]: A callback owner that captures every delivery in order
//! - [`Gate`]: A latch that holds workers until the test releases them
//! - [`ConcurrencyProbe`]: Tracks how many bodies overlap
//! - [`wait_until`] and [`drain_until`]: Bounded polling helpers

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::bundle::{JobResult, Progress};
use crate::core::job::{JobBody, JobContext};
use crate::traverse::TraverseLoop;

type BodyFn = dyn Fn(&mut JobContext<'_>, &mut JobResult) + Send + Sync;

/// A job body built from a closure.
///
/// Deliveries are recorded into the owning [`Recorder`] under the job's
/// label. The first value (key 0) of each payload is recorded as an `i64`.
///
/// # Example
///
/// ```
/// use traverse::testing::FnJob;
///
/// let job = FnJob::new("answer", |_ctx, result| {
///     result.push(42);
///     result.succeed();
/// });
/// assert_eq!(job.label(), "answer");
/// ```
pub struct FnJob {
    label: String,
    body: Box<BodyFn>,
}

impl FnJob {
    pub fn new(
        label: impl Into<String>,
        body: impl Fn(&mut JobContext<'_>, &mut JobResult) + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            body: Box::new(body),
        }
    }

    /// A body that succeeds immediately with `value` as its first result.
    pub fn returning(label: impl Into<String>, value: i64) -> Self {
        Self::new(label, move |_ctx, result| {
            result.push(value);
            result.succeed();
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for FnJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob").field("label", &self.label).finish()
    }
}

impl JobBody for FnJob {
    type Callback = Recorder;

    fn do_in_background(&self, ctx: &mut JobContext<'_>, result: &mut JobResult) {
        (self.body)(ctx, result)
    }

    fn on_result(&self, recorder: &Recorder, result: &JobResult) {
        recorder.record(Record::Result {
            label: self.label.clone(),
            success: result.is_success(),
            value: result.values().get_long(0, 0),
            error: result.error().map(str::to_string),
        });
    }

    fn on_progress(&self, recorder: &Recorder, progress: &Progress) {
        recorder.record(Record::Progress {
            label: self.label.clone(),
            value: progress.values().get_long(0, 0),
        });
    }
}

/// One captured delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Progress {
        label: String,
        value: i64,
    },
    Result {
        label: String,
        success: bool,
        value: i64,
        error: Option<String>,
    },
}

impl Record {
    pub fn label(&self) -> &str {
        match self {
            Record::Progress { label, .. } | Record::Result { label, .. } => label,
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Record::Result { .. })
    }
}

/// A callback owner that captures deliveries in arrival order.
#[derive(Debug, Default)]
pub struct Recorder {
    records: Mutex<Vec<Record>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: Record) {
        self.records.lock().push(record);
    }

    /// Every delivery so far, in arrival order.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of result deliveries so far.
    pub fn result_count(&self) -> usize {
        self.records.lock().iter().filter(|r| r.is_result()).count()
    }

    /// Labels of result deliveries, in arrival order.
    pub fn result_labels(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.is_result())
            .map(|r| r.label().to_string())
            .collect()
    }

    /// Deliveries for one job label, in arrival order.
    pub fn for_label(&self, label: &str) -> Vec<Record> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.label() == label)
            .cloned()
            .collect()
    }
}

/// A one-shot latch.
///
/// Bodies call [`wait`](Self::wait) to park until the test calls
/// [`open`](Self::open). [`arrivals`](Self::arrivals) tells the test how
/// many bodies have reached the gate.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    arrivals: AtomicUsize,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block until the gate is opened.
    pub fn wait(&self) {
        self.arrivals.fetch_add(1, Ordering::AcqRel);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    /// Block until the gate is opened or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        self.arrivals.fetch_add(1, Ordering::AcqRel);
        let mut open = self.open.lock();
        while !*open {
            if self.opened.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }

    /// Number of callers that reached the gate.
    pub fn arrivals(&self) -> usize {
        self.arrivals.load(Ordering::Acquire)
    }
}

/// Counts overlapping bodies and remembers the highest overlap seen.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a body as running until the returned guard is dropped.
    pub fn enter(&self) -> ProbeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        ProbeGuard { probe: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

/// Returned by [`ConcurrencyProbe::enter`].
#[derive(Debug)]
pub struct ProbeGuard<'a> {
    probe: &'a ConcurrencyProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if condition() {
            return true;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// Pump `consumer` until `condition` holds or `timeout` elapses.
pub fn drain_until(
    consumer: &mut TraverseLoop,
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    wait_until(timeout, || {
        consumer.drain();
        condition()
    })
}
