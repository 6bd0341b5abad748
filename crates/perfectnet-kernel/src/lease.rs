//! Leases: time-bounded, exclusive assignments of a candidate to a worker.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use perfectnet_types::{Exponent, Priority, Progress, Timestamp, WorkerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseStatus {
    Active,
    Expired,
    Completed,
}

/// A candidate held by one worker until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub exponent: Exponent,
    pub worker: WorkerId,
    /// Queue priority at the time of leasing, carried back on expiry.
    pub priority: Priority,
    pub granted_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_progress_at: Timestamp,
    pub progress: Progress,
    pub status: LeaseStatus,
}

impl Lease {
    /// A lease lapses strictly after its deadline.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }

    pub fn is_held_by(&self, worker: &WorkerId) -> bool {
        &self.worker == worker
    }
}

/// Lease lengths and related scheduling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeasePolicy {
    /// Lease length for exponents below `large_exponent_threshold`.
    pub standard_duration: Duration,
    /// Lease length at or above `large_exponent_threshold`.
    pub large_duration: Duration,
    pub large_exponent_threshold: Exponent,
    /// Floor priority for candidates returned to the queue after expiry.
    pub reclaim_priority: Priority,
    pub max_leases_per_worker: usize,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            standard_duration: Duration::from_secs(24 * 3600),
            large_duration: Duration::from_secs(72 * 3600),
            large_exponent_threshold: Exponent::new(10_000),
            reclaim_priority: Priority::RECLAIM,
            max_leases_per_worker: 1,
        }
    }
}

impl LeasePolicy {
    pub fn duration_for(&self, exponent: Exponent) -> Duration {
        if exponent >= self.large_exponent_threshold {
            self.large_duration
        } else {
            self.standard_duration
        }
    }
}

/// Active leases, indexed by candidate and by worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseTable {
    leases: BTreeMap<Exponent, Lease>,
    by_worker: BTreeMap<WorkerId, BTreeSet<Exponent>>,
}

impl LeaseTable {
    pub fn get(&self, exponent: Exponent) -> Option<&Lease> {
        self.leases.get(&exponent)
    }

    pub fn contains(&self, exponent: Exponent) -> bool {
        self.leases.contains_key(&exponent)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    /// Exponents currently leased to `worker`.
    pub fn held_by(&self, worker: &WorkerId) -> impl Iterator<Item = Exponent> + '_ {
        self.by_worker
            .get(worker)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn count_for(&self, worker: &WorkerId) -> usize {
        self.by_worker.get(worker).map_or(0, BTreeSet::len)
    }

    /// Leases whose deadline passed before `now`.
    pub fn expired_at(&self, now: Timestamp) -> Vec<Exponent> {
        self.leases
            .values()
            .filter(|lease| lease.is_expired_at(now))
            .map(|lease| lease.exponent)
            .collect()
    }

    /// Inserts or replaces the lease on `lease.exponent`.
    pub(crate) fn put(&mut self, lease: Lease) {
        if let Some(previous) = self.leases.get(&lease.exponent) {
            debug_assert!(
                previous.worker == lease.worker,
                "lease on {} changed hands without being dropped",
                lease.exponent
            );
        }
        self.by_worker
            .entry(lease.worker.clone())
            .or_default()
            .insert(lease.exponent);
        self.leases.insert(lease.exponent, lease);
    }

    pub(crate) fn remove(&mut self, exponent: Exponent) -> Option<Lease> {
        let lease = self.leases.remove(&exponent)?;
        if let Some(set) = self.by_worker.get_mut(&lease.worker) {
            set.remove(&exponent);
            if set.is_empty() {
                self.by_worker.remove(&lease.worker);
            }
        }
        Some(lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(p: u64, worker: &str, expires_secs: u64) -> Lease {
        Lease {
            exponent: Exponent::new(p),
            worker: WorkerId::new(worker).unwrap(),
            priority: Priority::new(1),
            granted_at: Timestamp::EPOCH,
            expires_at: Timestamp::from_secs(expires_secs),
            last_progress_at: Timestamp::EPOCH,
            progress: Progress::ZERO,
            status: LeaseStatus::Active,
        }
    }

    #[test]
    fn duration_depends_on_exponent_size() {
        let policy = LeasePolicy::default();
        assert_eq!(policy.duration_for(Exponent::new(9_999)), Duration::from_secs(86_400));
        assert_eq!(policy.duration_for(Exponent::new(10_000)), Duration::from_secs(259_200));
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let l = lease(127, "alice", 100);
        assert!(!l.is_expired_at(Timestamp::from_secs(100)));
        assert!(l.is_expired_at(Timestamp::from_nanos(100_000_000_001)));
    }

    #[test]
    fn worker_index_tracks_inserts_and_removals() {
        let mut table = LeaseTable::default();
        let alice = WorkerId::new("alice").unwrap();
        table.put(lease(127, "alice", 10));
        table.put(lease(521, "alice", 20));
        table.put(lease(607, "bob", 30));

        assert_eq!(table.count_for(&alice), 2);
        assert_eq!(
            table.held_by(&alice).collect::<Vec<_>>(),
            vec![Exponent::new(127), Exponent::new(521)]
        );
        assert_eq!(table.expired_at(Timestamp::from_secs(25)), vec![
            Exponent::new(127),
            Exponent::new(521)
        ]);

        table.remove(Exponent::new(127)).unwrap();
        table.remove(Exponent::new(521)).unwrap();
        assert_eq!(table.count_for(&alice), 0);
        assert!(table.remove(Exponent::new(521)).is_none());
        assert_eq!(table.len(), 1);
    }
}
