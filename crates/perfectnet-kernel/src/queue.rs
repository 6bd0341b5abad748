//! The candidate queue.
//!
//! Highest priority is served first. Among equal priorities the smallest
//! exponent wins (small cases first), then the earliest enqueue time.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
};

use perfectnet_types::{Exponent, Priority, Timestamp, WorkerId};
use serde::{Deserialize, Serialize};

/// A candidate waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCandidate {
    pub exponent: Exponent,
    pub priority: Priority,
    pub enqueued_at: Timestamp,
    /// Set when the candidate came back through lease expiry. That worker
    /// may still submit a verdict until someone else leases it.
    pub reclaimed_from: Option<WorkerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<Priority>,
    exponent: Exponent,
    enqueued_at: Timestamp,
}

impl QueueKey {
    fn of(candidate: &QueuedCandidate) -> Self {
        Self {
            priority: Reverse(candidate.priority),
            exponent: candidate.exponent,
            enqueued_at: candidate.enqueued_at,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("candidate {0} is already queued")]
    DuplicateCandidate(Exponent),

    #[error("candidate queue is empty")]
    EmptyQueue,

    #[error("candidate {0} is not queued")]
    NotFound(Exponent),
}

/// Ordered store of untested candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateQueue {
    entries: BTreeMap<Exponent, QueuedCandidate>,
    order: BTreeSet<QueueKey>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fresh candidate.
    pub fn enqueue(
        &mut self,
        exponent: Exponent,
        priority: Priority,
        enqueued_at: Timestamp,
    ) -> Result<&QueuedCandidate, QueueError> {
        self.insert(QueuedCandidate {
            exponent,
            priority,
            enqueued_at,
            reclaimed_from: None,
        })
    }

    /// Returns a candidate to the queue after its lease lapsed.
    pub fn reinsert(
        &mut self,
        exponent: Exponent,
        priority: Priority,
        enqueued_at: Timestamp,
        reclaimed_from: Option<WorkerId>,
    ) -> Result<&QueuedCandidate, QueueError> {
        self.insert(QueuedCandidate {
            exponent,
            priority,
            enqueued_at,
            reclaimed_from,
        })
    }

    pub(crate) fn insert(
        &mut self,
        candidate: QueuedCandidate,
    ) -> Result<&QueuedCandidate, QueueError> {
        let exponent = candidate.exponent;
        if self.entries.contains_key(&exponent) {
            return Err(QueueError::DuplicateCandidate(exponent));
        }
        self.order.insert(QueueKey::of(&candidate));
        Ok(self.entries.entry(exponent).or_insert(candidate))
    }

    /// The candidate the next assignment would receive.
    pub fn peek_next(&self) -> Result<&QueuedCandidate, QueueError> {
        let key = self.order.first().ok_or(QueueError::EmptyQueue)?;
        self.entries
            .get(&key.exponent)
            .ok_or(QueueError::NotFound(key.exponent))
    }

    pub fn remove(&mut self, exponent: Exponent) -> Result<QueuedCandidate, QueueError> {
        let candidate = self
            .entries
            .remove(&exponent)
            .ok_or(QueueError::NotFound(exponent))?;
        let removed = self.order.remove(&QueueKey::of(&candidate));
        debug_assert!(removed, "queue order index out of sync for {exponent}");
        Ok(candidate)
    }

    pub fn get(&self, exponent: Exponent) -> Option<&QueuedCandidate> {
        self.entries.get(&exponent)
    }

    pub fn contains(&self, exponent: Exponent) -> bool {
        self.entries.contains_key(&exponent)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates in service order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedCandidate> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(&key.exponent))
    }
}
