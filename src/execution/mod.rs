//! Job execution.
//!
//! This module provides the [`Engine`] with its two worker pools, the
//! priority queue they consume, and the payload free lists shared by every
//! job.

mod engine;
mod pool;
mod queue;

use std::any::Any;
use std::sync::Arc;

use crate::events::EventBus;
use crate::traverse::Traverse;

pub use engine::{Engine, EngineStats, FreeListStats, PayloadStats, Payloads, ScheduleError};
pub use pool::PoolStats;

/// Everything a running job needs from the engine.
pub(crate) struct Runtime {
    pub(crate) traverse: Traverse,
    pub(crate) payloads: Payloads,
    pub(crate) events: Arc<EventBus>,
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
