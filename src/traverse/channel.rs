//! Sender side of the dispatcher and the delivery message types.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::core::bundle::{JobResult, Progress};
use crate::core::job::ErasedJob;
use crate::core::recycle::Pooled;
use crate::core::types::JobState;
use crate::events::{EngineEvent, EventBus};

use super::consumer::TraverseLoop;

/// Which kind of payload a delivery carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Progress,
    Result,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Progress => f.write_str("progress"),
            PayloadKind::Result => f.write_str("result"),
        }
    }
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchOutcome {
    /// The owner resolved and the translator ran.
    Delivered,
    /// The owner was gone; the payload was recycled without a callback.
    Skipped,
    /// The translator panicked; the loop caught it and moved on.
    CallbackPanicked,
    /// No consumer loop was left to receive the payload.
    ConsumerGone,
}

pub(crate) enum Payload {
    Progress(Pooled<Progress>),
    Result(Pooled<JobResult>),
}

impl Payload {
    pub(crate) fn kind(&self) -> PayloadKind {
        match self {
            Payload::Progress(_) => PayloadKind::Progress,
            Payload::Result(_) => PayloadKind::Result,
        }
    }
}

/// A payload in flight, tagged with the job it belongs to.
pub(crate) struct Delivery {
    pub(crate) job: Arc<dyn ErasedJob>,
    pub(crate) payload: Payload,
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Payloads handed to the dispatcher.
    pub published: u64,
    /// Payloads delivered to a live owner.
    pub delivered: u64,
    /// Payloads dropped because the owner was gone.
    pub skipped: u64,
    /// Deliveries whose translator panicked.
    pub callback_panics: u64,
    /// Payloads dropped because the consumer loop was gone.
    pub dropped: u64,
}

impl DispatchStats {
    /// Payloads published but not yet processed by the loop.
    pub fn pending(&self) -> u64 {
        self.published
            .saturating_sub(self.delivered)
            .saturating_sub(self.skipped)
            .saturating_sub(self.callback_panics)
            .saturating_sub(self.dropped)
    }
}

#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    callback_panics: AtomicU64,
    dropped: AtomicU64,
}

impl DispatchCounters {
    pub(crate) fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Delivered => &self.delivered,
            DispatchOutcome::Skipped => &self.skipped,
            DispatchOutcome::CallbackPanicked => &self.callback_panics,
            DispatchOutcome::ConsumerGone => &self.dropped,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            published: self.published.load(Ordering::Acquire),
            delivered: self.delivered.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
            callback_panics: self.callback_panics.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
        }
    }
}

/// Finish a delivery: recycle the payload, count the outcome and, for
/// results, move the job through `Dispatched` and `Recycled`.
///
/// A settled result also releases the owner reference, so a handle kept by
/// the submitter no longer pins the owner.
pub(crate) fn settle(
    job: &dyn ErasedJob,
    payload: Payload,
    outcome: DispatchOutcome,
    counters: &DispatchCounters,
    events: &EventBus,
) {
    let is_result = payload.kind() == PayloadKind::Result;
    if is_result {
        job.mark(JobState::Dispatched);
    }
    drop(payload);
    if is_result {
        job.detach();
        job.mark(JobState::Recycled);
    }
    counters.record(outcome);
    if is_result {
        events.emit(EngineEvent::result_dispatched(job.id(), outcome));
    }
}

/// Sender half of the dispatcher, shared by all worker threads.
#[derive(Clone)]
pub(crate) struct Traverse {
    tx: mpsc::UnboundedSender<Delivery>,
    counters: Arc<DispatchCounters>,
    events: Arc<EventBus>,
}

impl Traverse {
    /// Create a connected sender and consumer loop.
    pub(crate) fn channel(events: Arc<EventBus>) -> (Traverse, TraverseLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(DispatchCounters::default());
        let traverse = Traverse {
            tx,
            counters: Arc::clone(&counters),
            events: Arc::clone(&events),
        };
        (traverse, TraverseLoop::new(rx, counters, events))
    }

    /// Hand a progress update to the consumer loop.
    pub(crate) fn publish_progress(
        &self,
        job: Arc<dyn ErasedJob>,
        progress: Pooled<Progress>,
    ) -> bool {
        self.publish(Delivery {
            job,
            payload: Payload::Progress(progress),
        })
    }

    /// Hand a final result to the consumer loop.
    pub(crate) fn publish_result(
        &self,
        job: Arc<dyn ErasedJob>,
        result: Pooled<JobResult>,
    ) -> bool {
        self.publish(Delivery {
            job,
            payload: Payload::Result(result),
        })
    }

    fn publish(&self, delivery: Delivery) -> bool {
        self.counters.published.fetch_add(1, Ordering::AcqRel);
        match self.tx.send(delivery) {
            Ok(()) => true,
            Err(mpsc::error::SendError(Delivery { job, payload })) => {
                tracing::debug!(
                    job_id = %job.id(),
                    kind = %payload.kind(),
                    "consumer loop is gone, recycling payload"
                );
                settle(
                    &*job,
                    payload,
                    DispatchOutcome::ConsumerGone,
                    &self.counters,
                    &self.events,
                );
                false
            }
        }
    }

    pub(crate) fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}
