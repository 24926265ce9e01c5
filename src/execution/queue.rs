//! Priority-ordered work queue.
//!
//! Items pop highest priority first; equal priorities pop in submission
//! order. Each pool owns one queue, so items of different pools are never
//! compared with each other.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

use crate::core::job::ErasedJob;
use crate::core::types::{PoolKind, Priority};

/// A queued job with its ordering keys.
pub(crate) struct WorkItem {
    pub(crate) job: Arc<dyn ErasedJob>,
    pub(crate) priority: Priority,
    /// Monotonic per queue; breaks ties between equal priorities.
    pub(crate) sequence: u64,
    pub(crate) submitted_at: Instant,
    pub(crate) pool: PoolKind,
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WorkItem {}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkItem {
    /// Greater pops first: higher priority, then lower sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Max-heap of work items for one pool.
pub(crate) struct WorkQueue {
    pool: PoolKind,
    heap: BinaryHeap<WorkItem>,
    next_sequence: u64,
}

impl WorkQueue {
    pub(crate) fn new(pool: PoolKind) -> Self {
        Self {
            pool,
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    /// Insert a job, stamping it with the next sequence number.
    pub(crate) fn push(&mut self, job: Arc<dyn ErasedJob>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(WorkItem {
            priority: job.priority(),
            job,
            sequence,
            submitted_at: Instant::now(),
            pool: self.pool,
        });
        sequence
    }

    pub(crate) fn pop(&mut self) -> Option<WorkItem> {
        self.heap.pop()
    }

    /// Remove a specific item, e.g. when no worker could be started for it.
    pub(crate) fn remove(&mut self, sequence: u64) -> Option<WorkItem> {
        let mut removed = None;
        let items = std::mem::take(&mut self.heap).into_vec();
        self.heap = items
            .into_iter()
            .filter_map(|item| {
                if item.sequence == sequence {
                    removed = Some(item);
                    None
                } else {
                    Some(item)
                }
            })
            .collect();
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
