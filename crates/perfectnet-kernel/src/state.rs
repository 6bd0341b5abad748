//! Kernel state management.
//!
//! State transitions take ownership and return a new state. The four
//! collections are mutated only from `kernel.rs`.

use perfectnet_types::{Exponent, WorkerId};
use serde::{Deserialize, Serialize};

use crate::{
    KernelError,
    lease::{Lease, LeasePolicy, LeaseTable},
    ledger::{ResultLedger, ResultRecord, User},
    queue::{CandidateQueue, QueuedCandidate},
};

/// The coordinator's entire scheduling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    policy: LeasePolicy,
    queue: CandidateQueue,
    leases: LeaseTable,
    ledger: ResultLedger,
}

impl State {
    pub fn new(policy: LeasePolicy) -> Self {
        Self {
            policy,
            queue: CandidateQueue::default(),
            leases: LeaseTable::default(),
            ledger: ResultLedger::default(),
        }
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    pub fn queue(&self) -> &CandidateQueue {
        &self.queue
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    pub fn ledger(&self) -> &ResultLedger {
        &self.ledger
    }

    /// True if the exponent is queued, leased, or completed.
    pub fn knows(&self, exponent: Exponent) -> bool {
        self.queue.contains(exponent)
            || self.leases.contains(exponent)
            || self.ledger.contains(exponent)
    }

    /// Whether `worker` may submit the verdict for `exponent`: nothing is
    /// recorded for it yet, and the worker holds its lease (swept or not) or
    /// was the last holder of a reclaimed candidate nobody has re-leased.
    pub fn check_submitter(&self, exponent: Exponent, worker: &WorkerId) -> Result<(), KernelError> {
        if self.ledger.contains(exponent) {
            return Err(KernelError::AlreadyRecorded(exponent));
        }
        let owned = match self.leases.get(exponent) {
            Some(lease) => lease.is_held_by(worker),
            None => self
                .queue
                .get(exponent)
                .is_some_and(|queued| queued.reclaimed_from.as_ref() == Some(worker)),
        };
        if owned {
            Ok(())
        } else {
            Err(KernelError::LeaseNotOwned {
                worker: worker.clone(),
                exponent,
            })
        }
    }

    pub(crate) fn queue_mut(&mut self) -> &mut CandidateQueue {
        &mut self.queue
    }

    pub(crate) fn leases_mut(&mut self) -> &mut LeaseTable {
        &mut self.leases
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut ResultLedger {
        &mut self.ledger
    }

    /// Flattens the state into its four durable collections.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            queue: self.queue.iter().cloned().collect(),
            leases: self.leases.iter().cloned().collect(),
            results: self.ledger.results().cloned().collect(),
            users: self.ledger.users().cloned().collect(),
        }
    }

    /// Rebuilds state from durable collections.
    ///
    /// Rejects snapshots where an exponent sits in more than one collection
    /// or appears twice in one.
    pub fn restore(policy: LeasePolicy, snapshot: Snapshot) -> Result<Self, KernelError> {
        let mut state = State::new(policy);
        for record in snapshot.results {
            let exponent = record.exponent();
            if state.knows(exponent) {
                return Err(KernelError::InconsistentSnapshot(exponent));
            }
            state.ledger.put_result(record);
        }
        for lease in snapshot.leases {
            let exponent = lease.exponent;
            if state.knows(exponent) {
                return Err(KernelError::InconsistentSnapshot(exponent));
            }
            state.leases.put(lease);
        }
        for candidate in snapshot.queue {
            let exponent = candidate.exponent;
            if state.knows(exponent) {
                return Err(KernelError::InconsistentSnapshot(exponent));
            }
            state
                .queue
                .insert(candidate)
                .map_err(|_| KernelError::InconsistentSnapshot(exponent))?;
        }
        for user in snapshot.users {
            state.ledger.put_user(user);
        }
        Ok(state)
    }
}

/// The four durable collections, as plain lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub queue: Vec<QueuedCandidate>,
    pub leases: Vec<Lease>,
    pub results: Vec<ResultRecord>,
    pub users: Vec<User>,
}
