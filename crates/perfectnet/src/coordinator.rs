//! The coordinator facade.
//!
//! [`Coordinator`] is the single serialization point for scheduler state.
//! Every mutation follows the same path: take the write lock, apply the
//! command to a copy of the kernel state, persist the effects, and only
//! then publish the new state. Reads take the read lock and never block
//! on I/O.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use perfectnet_arith::{perfect_number, sieve};
use perfectnet_kernel::{
    AuditEvent, Command, Effect, KernelError, Lease, LeasePolicy, ResultRecord, State, User,
    apply_committed,
};
use perfectnet_storage::DurableStore;
use perfectnet_types::{
    Assignment, Clock, Exponent, Priority, Progress, Stats, Timestamp, Verdict, WorkerId,
};
use tracing::{debug, error, info, warn};

use crate::error::{CoordinatorError, Result};
use crate::export::write_results_csv;
use crate::keys::{ApiKey, hash_key};

/// Exponents below this are seeded at [`Priority::SMALL_SEED`].
const SMALL_SEED_LIMIT: u64 = 1000;

/// Configuration for opening a [`Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub policy: LeasePolicy,
    /// How many discoveries [`Coordinator::stats`] lists.
    pub recent_discoveries: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            policy: LeasePolicy::default(),
            recent_discoveries: 5,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_policy(mut self, policy: LeasePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// State shared by every clone of a [`Coordinator`].
#[derive(Debug)]
struct Inner {
    state: State,
    store: Box<dyn DurableStore>,
    /// Why the coordinator stopped accepting writes, if it did.
    degraded: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    expired_total: AtomicU64,
    rejected_verdicts: AtomicU64,
}

/// Handle to the coordinator. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct Coordinator {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
    config: Arc<CoordinatorConfig>,
}

impl Coordinator {
    /// Recovers state from `store` and starts serving.
    pub fn open(
        config: CoordinatorConfig,
        mut store: Box<dyn DurableStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let snapshot = store.recover()?;
        let state = State::restore(config.policy.clone(), snapshot)?;
        info!(
            queued = state.queue().len(),
            leased = state.leases().len(),
            results = state.ledger().len(),
            users = state.ledger().user_count(),
            "coordinator state recovered"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                state,
                store,
                degraded: None,
            })),
            clock,
            counters: Arc::new(Counters::default()),
            config: Arc::new(config),
        })
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.config.policy
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ========================================================================
    // Write Path
    // ========================================================================

    /// Applies one command built at the current time and persists its
    /// effects. Nothing is published unless the store accepted the batch.
    fn execute(&self, build: impl FnOnce(Timestamp) -> Command) -> Result<Vec<Effect>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| CoordinatorError::internal("lock poisoned"))?;
        if let Some(reason) = &inner.degraded {
            return Err(CoordinatorError::Unavailable(reason.clone()));
        }

        let cmd = build(self.clock.now());
        let (next, effects) = apply_committed(inner.state.clone(), cmd)?;

        if let Err(e) = inner.store.persist(&effects) {
            let reason = format!("persisting state failed: {e}");
            error!(error = %e, "store write failed; refusing further mutations");
            inner.degraded = Some(reason.clone());
            return Err(CoordinatorError::Unavailable(reason));
        }
        inner.state = next;
        drop(inner);

        for event in effects.iter().filter_map(Effect::as_audit) {
            log_audit(event);
        }
        Ok(effects)
    }

    /// Leases the next candidate to `worker`.
    pub fn request_assignment(&self, worker: &WorkerId) -> Result<Assignment> {
        let effects = self.execute(|now| Command::RequestAssignment {
            worker: worker.clone(),
            now,
        })?;
        let lease = effects
            .iter()
            .find_map(Effect::as_lease_write)
            .ok_or_else(|| CoordinatorError::internal("assignment produced no lease"))?;
        Ok(Assignment {
            exponent: lease.exponent,
            expires_at: lease.expires_at,
            lease_duration: lease.expires_at.saturating_duration_since(lease.granted_at),
        })
    }

    /// Records progress and renews the lease. Returns the new deadline.
    pub fn report_progress(
        &self,
        worker: &WorkerId,
        exponent: Exponent,
        percent: f64,
    ) -> Result<Timestamp> {
        let progress = Progress::from_percent(percent)?;
        let effects = self.execute(|now| Command::ReportProgress {
            worker: worker.clone(),
            exponent,
            progress,
            now,
        })?;
        effects
            .iter()
            .find_map(Effect::as_lease_write)
            .map(|lease| lease.expires_at)
            .ok_or_else(|| CoordinatorError::internal("progress produced no lease"))
    }

    /// Accepts a verdict from the worker that owns the candidate.
    ///
    /// Ownership and duplication are checked under the read lock before a
    /// witness's perfect number is derived, so a stranger's verdict costs
    /// nothing. The kernel checks both again under the write lock.
    pub fn submit_verdict(&self, verdict: Verdict) -> Result<ResultRecord> {
        verdict.validate()?;
        let exponent = verdict.exponent;
        let worker = verdict.worker.clone();

        if let Err(e) = self.read(|state| state.check_submitter(exponent, &worker))? {
            return Err(self.reject_verdict(&worker, exponent, e));
        }
        let perfect = if verdict.is_prime_witness {
            Some(perfect_number(exponent)?)
        } else {
            None
        };

        let result = self.execute(|now| Command::SubmitVerdict {
            verdict,
            perfect_number: perfect,
            now,
        });
        let effects = match result {
            Ok(effects) => effects,
            Err(CoordinatorError::Kernel(e)) => return Err(self.reject_verdict(&worker, exponent, e)),
            Err(e) => return Err(e),
        };

        effects
            .into_iter()
            .find_map(|effect| match effect {
                Effect::ResultWrite(record) => Some(record),
                _ => None,
            })
            .ok_or_else(|| CoordinatorError::internal("verdict produced no result"))
    }

    fn reject_verdict(&self, worker: &WorkerId, exponent: Exponent, e: KernelError) -> CoordinatorError {
        self.counters
            .rejected_verdicts
            .fetch_add(1, Ordering::Relaxed);
        warn!(%worker, %exponent, error = %e, "verdict rejected");
        e.into()
    }

    /// Reclaims every lease past its deadline. Returns the reclaimed exponents.
    pub fn sweep_expired(&self) -> Result<Vec<Exponent>> {
        let effects = self.execute(|now| Command::SweepExpired { now })?;
        let reclaimed = deleted_leases(&effects);
        if !reclaimed.is_empty() {
            self.counters
                .expired_total
                .fetch_add(reclaimed.len() as u64, Ordering::Relaxed);
        }
        Ok(reclaimed)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub fn enqueue(&self, exponent: Exponent, priority: Priority) -> Result<()> {
        self.execute(|now| Command::Enqueue {
            exponent,
            priority,
            now,
        })?;
        Ok(())
    }

    /// Queues every prime exponent in `start..=end` not already known.
    ///
    /// Returns how many were added.
    pub fn seed(&self, start: u64, end: u64) -> Result<usize> {
        let candidates: Vec<(Exponent, Priority)> = sieve::primes_in_range(start, end)?
            .into_iter()
            .map(|p| (Exponent::new(p), seed_priority(p)))
            .collect();
        let offered = candidates.len();
        let effects = self.execute(|now| Command::Seed { candidates, now })?;
        let added = effects
            .iter()
            .filter(|e| matches!(e, Effect::QueueWrite(_)))
            .count();
        info!(start, end, offered, added, "seeded candidate range");
        Ok(added)
    }

    pub fn withdraw(&self, exponent: Exponent) -> Result<()> {
        self.execute(|_| Command::Withdraw { exponent })?;
        Ok(())
    }

    /// Returns every lease `worker` holds to the queue.
    pub fn release_worker(&self, worker: &WorkerId) -> Result<Vec<Exponent>> {
        let effects = self.execute(|now| Command::ReleaseWorker {
            worker: worker.clone(),
            now,
        })?;
        Ok(deleted_leases(&effects))
    }

    /// Issues an API key for `worker`. Only its hash is kept.
    pub fn register_worker(&self, worker: &WorkerId, rotate: bool) -> Result<ApiKey> {
        let key = ApiKey::generate();
        let key_hash = key.hash();
        self.execute(|now| Command::RegisterWorker {
            worker: worker.clone(),
            key_hash,
            rotate,
            now,
        })?;
        Ok(key)
    }

    /// Checks `key` against the hash stored for `worker`.
    pub fn authenticate(&self, worker: &WorkerId, key: &str) -> Result<()> {
        let expected = self.read(|state| state.ledger().user(worker).and_then(|u| u.key_hash))?;
        match expected {
            Some(hash) if hash == hash_key(key) => Ok(()),
            _ => Err(CoordinatorError::Unauthorized(worker.to_string())),
        }
    }

    /// Folds the store's journal into a snapshot.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| CoordinatorError::internal("lock poisoned"))?;
        inner.store.compact()?;
        Ok(())
    }

    // ========================================================================
    // Read Path
    // ========================================================================

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T> {
        let inner = self
            .inner
            .read()
            .map_err(|_| CoordinatorError::internal("lock poisoned"))?;
        Ok(f(&inner.state))
    }

    /// True once a store write has failed. A poisoned lock counts too.
    pub fn is_degraded(&self) -> bool {
        self.inner
            .read()
            .map_or(true, |inner| inner.degraded.is_some())
    }

    pub fn stats(&self) -> Result<Stats> {
        let limit = self.config.recent_discoveries;
        let inner = self
            .inner
            .read()
            .map_err(|_| CoordinatorError::internal("lock poisoned"))?;
        let state = &inner.state;
        let ledger = state.ledger();

        let mut recent: Vec<_> = ledger
            .list_discoveries()
            .filter_map(|record| record.perfect_number)
            .collect();
        recent.reverse();
        recent.truncate(limit);

        Ok(Stats {
            queued: state.queue().len() as u64,
            active_leases: state.leases().len() as u64,
            users: ledger.user_count() as u64,
            results: ledger.len() as u64,
            discoveries: ledger.discovery_count() as u64,
            compute_time: ledger.total_compute_time(),
            expired_total: self.counters.expired_total.load(Ordering::Relaxed),
            rejected_verdicts: self.counters.rejected_verdicts.load(Ordering::Relaxed),
            degraded: inner.degraded.is_some(),
            recent_discoveries: recent,
        })
    }

    /// Prime witnesses in discovery order.
    pub fn list_discoveries(&self) -> Result<Vec<ResultRecord>> {
        self.read(|state| state.ledger().list_discoveries().cloned().collect())
    }

    /// The newest results first.
    pub fn recent_results(&self, limit: usize) -> Result<Vec<ResultRecord>> {
        self.read(|state| state.ledger().recent(limit).into_iter().cloned().collect())
    }

    pub fn leaderboard(&self, limit: usize) -> Result<Vec<User>> {
        self.read(|state| {
            state
                .ledger()
                .leaderboard(limit)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    pub fn active_leases(&self) -> Result<Vec<Lease>> {
        self.read(|state| state.leases().iter().cloned().collect())
    }

    pub fn user(&self, worker: &WorkerId) -> Result<Option<User>> {
        self.read(|state| state.ledger().user(worker).cloned())
    }

    /// Every known user, ordered by id.
    pub fn users(&self) -> Result<Vec<User>> {
        self.read(|state| state.ledger().users().cloned().collect())
    }

    /// Writes all results as CSV. Returns the number of rows.
    pub fn export_csv<W: Write>(&self, out: W) -> Result<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|_| CoordinatorError::internal("lock poisoned"))?;
        Ok(write_results_csv(inner.state.ledger(), out)?)
    }
}

fn seed_priority(p: u64) -> Priority {
    if p < SMALL_SEED_LIMIT {
        Priority::SMALL_SEED
    } else {
        Priority::LARGE_SEED
    }
}

fn deleted_leases(effects: &[Effect]) -> Vec<Exponent> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::LeaseDelete(exponent) => Some(*exponent),
            _ => None,
        })
        .collect()
}

fn log_audit(event: &AuditEvent) {
    match event {
        AuditEvent::LeaseGranted {
            exponent,
            worker,
            expires_at,
        } => info!(%exponent, %worker, %expires_at, "lease granted"),
        AuditEvent::LeaseExpired {
            exponent,
            worker,
            requeued_at,
        } => info!(%exponent, %worker, priority = %requeued_at, "lease expired; candidate requeued"),
        AuditEvent::VerdictRecorded {
            exponent,
            worker,
            is_prime_witness,
            late: true,
        } => warn!(%exponent, %worker, is_prime_witness, "late verdict accepted"),
        AuditEvent::VerdictRecorded {
            exponent,
            worker,
            is_prime_witness,
            late: false,
        } => info!(%exponent, %worker, is_prime_witness, "verdict accepted"),
        AuditEvent::Discovery {
            exponent,
            worker,
            digit_count,
        } => info!(%exponent, %worker, digit_count, "perfect number discovered"),
        other => debug!(?other, "audit"),
    }
}
