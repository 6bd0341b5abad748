//! The result ledger: accepted verdicts and per-worker aggregates.

use std::{collections::BTreeMap, time::Duration};

use perfectnet_types::{Exponent, PerfectNumber, Timestamp, Verdict, WorkerId};
use serde::{Deserialize, Serialize};

/// An accepted verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub verdict: Verdict,
    /// Present iff the verdict is a prime witness.
    pub perfect_number: Option<PerfectNumber>,
    pub recorded_at: Timestamp,
    /// Position in acceptance order; discoveries are listed by it.
    pub sequence: u64,
}

impl ResultRecord {
    pub fn exponent(&self) -> Exponent {
        self.verdict.exponent
    }

    pub fn is_discovery(&self) -> bool {
        self.verdict.is_prime_witness
    }
}

/// Per-worker totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: WorkerId,
    pub candidates_completed: u64,
    pub discoveries: u64,
    pub compute_time: Duration,
    pub registered_at: Timestamp,
    pub last_active_at: Timestamp,
    /// SHA-256 of the worker's API key, if one was issued.
    pub key_hash: Option<[u8; 32]>,
}

impl User {
    pub fn new(id: WorkerId, now: Timestamp) -> Self {
        Self {
            id,
            candidates_completed: 0,
            discoveries: 0,
            compute_time: Duration::ZERO,
            registered_at: now,
            last_active_at: now,
            key_hash: None,
        }
    }
}

/// Accepted verdicts, one per candidate, plus the users who produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultLedger {
    results: BTreeMap<Exponent, ResultRecord>,
    by_sequence: BTreeMap<u64, Exponent>,
    users: BTreeMap<WorkerId, User>,
    next_sequence: u64,
}

impl ResultLedger {
    pub fn contains(&self, exponent: Exponent) -> bool {
        self.results.contains_key(&exponent)
    }

    pub fn get(&self, exponent: Exponent) -> Option<&ResultRecord> {
        self.results.get(&exponent)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn user(&self, id: &WorkerId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// All results in acceptance order.
    pub fn results(&self) -> impl DoubleEndedIterator<Item = &ResultRecord> {
        self.by_sequence
            .values()
            .filter_map(|exponent| self.results.get(exponent))
    }

    /// Prime witnesses in discovery order.
    pub fn list_discoveries(&self) -> impl Iterator<Item = &ResultRecord> {
        self.results().filter(|record| record.is_discovery())
    }

    pub fn discovery_count(&self) -> usize {
        self.list_discoveries().count()
    }

    /// The `limit` most recent results, newest first.
    pub fn recent(&self, limit: usize) -> Vec<&ResultRecord> {
        self.results().rev().take(limit).collect()
    }

    /// Users by candidates completed, then compute time.
    pub fn leaderboard(&self, limit: usize) -> Vec<&User> {
        let mut users: Vec<&User> = self.users.values().collect();
        users.sort_by(|a, b| {
            b.candidates_completed
                .cmp(&a.candidates_completed)
                .then(b.compute_time.cmp(&a.compute_time))
                .then(a.id.cmp(&b.id))
        });
        users.truncate(limit);
        users
    }

    pub fn total_compute_time(&self) -> Duration {
        self.users.values().map(|user| user.compute_time).sum()
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Builds the record and updated user for `verdict` without storing them.
    pub(crate) fn prepare(
        &self,
        verdict: Verdict,
        perfect_number: Option<PerfectNumber>,
        now: Timestamp,
    ) -> (ResultRecord, User) {
        let mut user = self
            .users
            .get(&verdict.worker)
            .cloned()
            .unwrap_or_else(|| User::new(verdict.worker.clone(), now));
        user.candidates_completed += 1;
        if verdict.is_prime_witness {
            user.discoveries += 1;
        }
        user.compute_time = user.compute_time.saturating_add(verdict.elapsed);
        user.last_active_at = now;

        let record = ResultRecord {
            verdict,
            perfect_number,
            recorded_at: now,
            sequence: self.next_sequence,
        };
        (record, user)
    }

    pub(crate) fn put_result(&mut self, record: ResultRecord) {
        self.next_sequence = self.next_sequence.max(record.sequence + 1);
        self.by_sequence.insert(record.sequence, record.exponent());
        self.results.insert(record.exponent(), record);
    }

    pub(crate) fn put_user(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }
}
