//! Consumer side of the dispatcher.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::events::{EngineEvent, EventBus};
use crate::execution::panic_message;

use super::channel::{Delivery, DispatchCounters, DispatchOutcome, DispatchStats, settle};

/// The single consumer of published progress and results.
///
/// Every translator (`on_progress` / `on_result`) runs on the thread that
/// drives this loop. Pick one way to drive it:
///
/// - [`run`](Self::run) on an async runtime owned by the consumer context
/// - [`run_blocking`](Self::run_blocking) or [`spawn`](Self::spawn) for a
///   dedicated thread
/// - [`drain`](Self::drain) from an existing event loop tick
///
/// The loop ends once the engine and all of its workers are gone.
pub struct TraverseLoop {
    rx: mpsc::UnboundedReceiver<Delivery>,
    counters: Arc<DispatchCounters>,
    events: Arc<EventBus>,
}

impl TraverseLoop {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Delivery>,
        counters: Arc<DispatchCounters>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            rx,
            counters,
            events,
        }
    }

    /// Dispatch deliveries until every sender is gone.
    pub async fn run(mut self) -> DispatchStats {
        while let Some(delivery) = self.rx.recv().await {
            self.dispatch(delivery);
        }
        tracing::debug!("traverse loop finished");
        self.stats()
    }

    /// Blocking version of [`run`](Self::run).
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn run_blocking(mut self) -> DispatchStats {
        while let Some(delivery) = self.rx.blocking_recv() {
            self.dispatch(delivery);
        }
        tracing::debug!("traverse loop finished");
        self.stats()
    }

    /// Run the loop on a dedicated, named thread.
    pub fn spawn(self, name: impl Into<String>) -> std::io::Result<JoinHandle<DispatchStats>> {
        thread::Builder::new()
            .name(name.into())
            .spawn(move || self.run_blocking())
    }

    /// Wait for and dispatch the next delivery.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<DispatchOutcome> {
        let delivery = self.rx.recv().await?;
        Some(self.dispatch(delivery))
    }

    /// Dispatch the next delivery if one is already waiting.
    pub fn try_next(&mut self) -> Option<DispatchOutcome> {
        let delivery = self.rx.try_recv().ok()?;
        Some(self.dispatch(delivery))
    }

    /// Dispatch everything that is currently waiting, without blocking.
    ///
    /// Returns the number of deliveries processed.
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(delivery) = self.rx.try_recv() {
            self.dispatch(delivery);
            processed += 1;
        }
        processed
    }

    /// Current dispatcher counters.
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    fn dispatch(&self, delivery: Delivery) -> DispatchOutcome {
        let Delivery { job, payload } = delivery;
        let kind = payload.kind();

        // The owner is resolved once, inside deliver().
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job.deliver(&payload))) {
            Ok(true) => DispatchOutcome::Delivered,
            Ok(false) => DispatchOutcome::Skipped,
            Err(panic) => {
                tracing::error!(
                    job_id = %job.id(),
                    kind = %kind,
                    panic = %panic_message(panic.as_ref()),
                    "callback panicked during delivery"
                );
                DispatchOutcome::CallbackPanicked
            }
        };

        let skipped = outcome == DispatchOutcome::Skipped;
        if skipped {
            tracing::trace!(job_id = %job.id(), kind = %kind, "owner gone, skipping delivery");
        } else if outcome == DispatchOutcome::Delivered {
            tracing::trace!(job_id = %job.id(), kind = %kind, "delivered");
        }

        settle(&*job, payload, outcome, &self.counters, &self.events);
        if skipped {
            self.events
                .emit(EngineEvent::delivery_skipped(job.id(), kind));
        }
        outcome
    }
}

impl Drop for TraverseLoop {
    /// Settle whatever is still queued so that every job reaches
    /// `Recycled` and every publication is counted.
    fn drop(&mut self) {
        self.rx.close();
        let mut dropped = 0usize;
        while let Ok(Delivery { job, payload }) = self.rx.try_recv() {
            settle(
                &*job,
                payload,
                DispatchOutcome::ConsumerGone,
                &self.counters,
                &self.events,
            );
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "traverse loop dropped with pending deliveries");
        }
    }
}
