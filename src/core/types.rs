//! Core identifier and classification types for the engine.
//!
//! These types give jobs a type-safe identity, an ordering priority and a
//! lifecycle state that can be observed from any thread.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    /// Create a new JobId from an integer.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying integer value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority of a job.
///
/// Variants are declared from lowest to highest so that the derived `Ord`
/// gives `High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(name)
    }
}

/// Which worker pool a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// The bounded multi-worker pool.
    Parallel,
    /// The single-worker pool with strictly serial execution.
    Serial,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Parallel => f.write_str("parallel"),
            PoolKind::Serial => f.write_str("serial"),
        }
    }
}

/// Lifecycle state of a submitted job.
///
/// States only move forward:
/// `Created -> Queued -> Running -> Completed -> Dispatched -> Recycled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum JobState {
    /// Built but not yet submitted.
    Created = 0,
    /// Waiting in a pool queue.
    Queued = 1,
    /// Body is executing on a worker thread.
    Running = 2,
    /// Body returned; the result is on its way to the consumer.
    Completed = 3,
    /// The result was handed to the owner, or skipped because the owner was gone.
    Dispatched = 4,
    /// The result payload is back in its free list.
    Recycled = 5,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Created,
            1 => JobState::Queued,
            2 => JobState::Running,
            3 => JobState::Completed,
            4 => JobState::Dispatched,
            _ => JobState::Recycled,
        }
    }

    /// Check whether the body has finished executing.
    pub fn is_finished(&self) -> bool {
        *self >= JobState::Completed
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Dispatched => "dispatched",
            JobState::Recycled => "recycled",
        };
        f.write_str(name)
    }
}

/// A `JobState` cell shared between the submitter, a worker and the dispatcher.
#[derive(Debug)]
pub(crate) struct AtomicJobState(AtomicU8);

impl AtomicJobState {
    pub(crate) fn new(state: JobState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` unless the job is already at or past it.
    pub(crate) fn advance(&self, next: JobState) {
        self.0.fetch_max(next as u8, Ordering::AcqRel);
    }
}
