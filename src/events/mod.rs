//! Lifecycle events and event handling.
//!
//! This module provides event emission for job lifecycle transitions,
//! enabling observability into queueing, execution and delivery.
//!
//! Handlers run synchronously on whichever thread emits the event: worker
//! threads for queue and execution events, the consumer thread for delivery
//! events. Keep them short.

use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::{JobId, PoolKind, Priority};
use crate::execution::panic_message;
use crate::traverse::{DispatchOutcome, PayloadKind};

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A job was inserted into a pool queue.
    JobQueued {
        job_id: JobId,
        priority: Priority,
        pool: PoolKind,
        timestamp: Instant,
    },

    /// A worker started running a job body.
    JobStarted {
        job_id: JobId,
        pool: PoolKind,
        /// Time spent in the queue.
        waited: Duration,
        timestamp: Instant,
    },

    /// A job body returned (or panicked and was converted to a failure).
    JobCompleted {
        job_id: JobId,
        pool: PoolKind,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },

    /// A job body panicked. Followed by a failed `JobCompleted`.
    JobPanicked {
        job_id: JobId,
        pool: PoolKind,
        message: String,
        timestamp: Instant,
    },

    /// The final result of a job went through the dispatcher.
    ResultDispatched {
        job_id: JobId,
        outcome: DispatchOutcome,
        timestamp: Instant,
    },

    /// A delivery was dropped because the owner was gone.
    DeliverySkipped {
        job_id: JobId,
        kind: PayloadKind,
        timestamp: Instant,
    },
}

impl EngineEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            EngineEvent::JobQueued { timestamp, .. } => *timestamp,
            EngineEvent::JobStarted { timestamp, .. } => *timestamp,
            EngineEvent::JobCompleted { timestamp, .. } => *timestamp,
            EngineEvent::JobPanicked { timestamp, .. } => *timestamp,
            EngineEvent::ResultDispatched { timestamp, .. } => *timestamp,
            EngineEvent::DeliverySkipped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job the event refers to.
    pub fn job_id(&self) -> JobId {
        match self {
            EngineEvent::JobQueued { job_id, .. }
            | EngineEvent::JobStarted { job_id, .. }
            | EngineEvent::JobCompleted { job_id, .. }
            | EngineEvent::JobPanicked { job_id, .. }
            | EngineEvent::ResultDispatched { job_id, .. }
            | EngineEvent::DeliverySkipped { job_id, .. } => *job_id,
        }
    }

    /// Create a JobQueued event.
    pub fn job_queued(job_id: JobId, priority: Priority, pool: PoolKind) -> Self {
        EngineEvent::JobQueued {
            job_id,
            priority,
            pool,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobStarted event.
    pub fn job_started(job_id: JobId, pool: PoolKind, waited: Duration) -> Self {
        EngineEvent::JobStarted {
            job_id,
            pool,
            waited,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(job_id: JobId, pool: PoolKind, success: bool, duration: Duration) -> Self {
        EngineEvent::JobCompleted {
            job_id,
            pool,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobPanicked event.
    pub fn job_panicked(job_id: JobId, pool: PoolKind, message: String) -> Self {
        EngineEvent::JobPanicked {
            job_id,
            pool,
            message,
            timestamp: Instant::now(),
        }
    }

    /// Create a ResultDispatched event.
    pub fn result_dispatched(job_id: JobId, outcome: DispatchOutcome) -> Self {
        EngineEvent::ResultDispatched {
            job_id,
            outcome,
            timestamp: Instant::now(),
        }
    }

    /// Create a DeliverySkipped event.
    pub fn delivery_skipped(job_id: JobId, kind: PayloadKind) -> Self {
        EngineEvent::DeliverySkipped {
            job_id,
            kind,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    fn handle(&self, event: &EngineEvent);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Emit an event to all registered handlers.
    ///
    /// Handlers are called outside the lock, so a handler may register
    /// further handlers. A panicking handler is logged and skipped; it never
    /// unwinds into the worker or consumer thread that emitted the event.
    pub fn emit(&self, event: EngineEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = self.handlers.read().clone();
        for handler in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event)));
            if let Err(panic) = outcome {
                tracing::error!(
                    job_id = %event.job_id(),
                    panic = %panic_message(panic.as_ref()),
                    "event handler panicked"
                );
            }
        }
    }

    /// Get the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
