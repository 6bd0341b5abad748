//! Keyed mirror of the four durable collections.

use std::collections::BTreeMap;

use perfectnet_kernel::{Effect, Lease, QueuedCandidate, ResultRecord, Snapshot, User};
use perfectnet_types::{Exponent, WorkerId};

/// Queue, lease, result and user tables, updated by durable effects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    queue: BTreeMap<Exponent, QueuedCandidate>,
    leases: BTreeMap<Exponent, Lease>,
    results: BTreeMap<Exponent, ResultRecord>,
    users: BTreeMap<WorkerId, User>,
}

impl Tables {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut tables = Self::default();
        for candidate in snapshot.queue {
            tables.queue.insert(candidate.exponent, candidate);
        }
        for lease in snapshot.leases {
            tables.leases.insert(lease.exponent, lease);
        }
        for record in snapshot.results {
            tables.results.insert(record.exponent(), record);
        }
        for user in snapshot.users {
            tables.users.insert(user.id.clone(), user);
        }
        tables
    }

    /// Applies one effect. Audit effects are ignored.
    pub fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::QueueWrite(candidate) => {
                self.queue.insert(candidate.exponent, candidate.clone());
            }
            Effect::QueueDelete(exponent) => {
                self.queue.remove(exponent);
            }
            Effect::LeaseWrite(lease) => {
                self.leases.insert(lease.exponent, lease.clone());
            }
            Effect::LeaseDelete(exponent) => {
                self.leases.remove(exponent);
            }
            Effect::ResultWrite(record) => {
                self.results.insert(record.exponent(), record.clone());
            }
            Effect::UserWrite(user) => {
                self.users.insert(user.id.clone(), user.clone());
            }
            Effect::AuditLogAppend(_) => {}
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        let mut results: Vec<ResultRecord> = self.results.values().cloned().collect();
        results.sort_by_key(|record| record.sequence);
        Snapshot {
            queue: self.queue.values().cloned().collect(),
            leases: self.leases.values().cloned().collect(),
            results,
            users: self.users.values().cloned().collect(),
        }
    }

    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.queue.len() + self.leases.len() + self.results.len() + self.users.len()
    }
}
