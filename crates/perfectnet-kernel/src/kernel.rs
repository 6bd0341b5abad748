//! The kernel - pure functional core of the scheduler.
//!
//! The kernel applies committed commands to produce new state and effects.
//! It is completely pure: no IO, no clocks, no randomness. This makes it
//! deterministic and easy to test.
//!
//! # Example
//!
//! ```ignore
//! let state = State::new(LeasePolicy::default());
//! let (new_state, effects) = apply_committed(state, Command::SweepExpired { now })?;
//! // Runtime persists effects...
//! ```

use perfectnet_types::{ErrorClass, Exponent, Progress, ValidationError, WorkerId};

use crate::command::Command;
use crate::effects::{AuditEvent, Effect};
use crate::lease::{Lease, LeaseStatus};
use crate::ledger::User;
use crate::queue::QueueError;
use crate::state::State;

/// Applies a committed command to the state, producing new state and effects.
///
/// Takes ownership of state, returns new state. On error the caller keeps
/// whatever copy it had; nothing partial escapes.
#[allow(clippy::too_many_lines)]
pub fn apply_committed(
    mut state: State,
    cmd: Command,
) -> Result<(State, Vec<Effect>), KernelError> {
    let mut effects = Vec::new();

    match cmd {
        // ====================================================================
        // Candidate Queue
        // ====================================================================
        Command::Enqueue {
            exponent,
            priority,
            now,
        } => {
            // Precondition: a real exponent, unknown to every collection
            if !exponent.is_valid() {
                return Err(KernelError::InvalidExponent(exponent));
            }
            if state.knows(exponent) {
                return Err(KernelError::DuplicateCandidate(exponent));
            }

            let candidate = state
                .queue_mut()
                .enqueue(exponent, priority, now)
                .map_err(KernelError::from)?
                .clone();
            effects.push(Effect::QueueWrite(candidate));
            effects.push(Effect::AuditLogAppend(AuditEvent::CandidateEnqueued {
                exponent,
                priority,
            }));

            Ok((state, effects))
        }

        Command::Seed { candidates, now } => {
            for (exponent, priority) in candidates {
                if !exponent.is_valid() || state.knows(exponent) {
                    continue;
                }
                let candidate = state
                    .queue_mut()
                    .enqueue(exponent, priority, now)
                    .map_err(KernelError::from)?
                    .clone();
                effects.push(Effect::QueueWrite(candidate));
            }
            Ok((state, effects))
        }

        Command::Withdraw { exponent } => {
            state
                .queue_mut()
                .remove(exponent)
                .map_err(KernelError::from)?;
            effects.push(Effect::QueueDelete(exponent));
            effects.push(Effect::AuditLogAppend(AuditEvent::CandidateWithdrawn {
                exponent,
            }));
            Ok((state, effects))
        }

        // ====================================================================
        // Lease Manager
        // ====================================================================
        Command::RequestAssignment { worker, now } => {
            // Precondition: worker is under its lease allowance
            let held = state.leases().count_for(&worker);
            if held >= state.policy().max_leases_per_worker {
                let exponent = state.leases().held_by(&worker).next();
                return Err(KernelError::LeaseAlreadyActive { worker, exponent });
            }

            let candidate = match state.queue().peek_next() {
                Ok(candidate) => candidate.clone(),
                Err(QueueError::EmptyQueue) => return Err(KernelError::NoWorkAvailable),
                Err(e) => return Err(e.into()),
            };
            let exponent = candidate.exponent;

            // Precondition: nobody holds this candidate already
            debug_assert!(
                !state.leases().contains(exponent),
                "queued candidate {exponent} also has an active lease"
            );

            state.queue_mut().remove(exponent)?;
            let expires_at = now.saturating_add(state.policy().duration_for(exponent));
            let lease = Lease {
                exponent,
                worker: worker.clone(),
                priority: candidate.priority,
                granted_at: now,
                expires_at,
                last_progress_at: now,
                progress: Progress::ZERO,
                status: LeaseStatus::Active,
            };
            state.leases_mut().put(lease.clone());

            effects.push(Effect::QueueDelete(exponent));
            effects.push(Effect::LeaseWrite(lease));
            effects.push(Effect::AuditLogAppend(AuditEvent::LeaseGranted {
                exponent,
                worker,
                expires_at,
            }));

            // Postcondition: the candidate moved from queued to leased
            debug_assert!(!state.queue().contains(exponent));
            debug_assert!(state.leases().contains(exponent));

            Ok((state, effects))
        }

        Command::ReportProgress {
            worker,
            exponent,
            progress,
            now,
        } => {
            // Precondition: an unexpired lease held by this worker
            let mut lease = match state.leases().get(exponent) {
                Some(lease) if lease.is_held_by(&worker) && !lease.is_expired_at(now) => {
                    lease.clone()
                }
                _ => return Err(KernelError::UnknownLease { worker, exponent }),
            };

            let renewed = now.saturating_add(state.policy().duration_for(exponent));
            // expires_at never moves backwards
            lease.expires_at = lease.expires_at.max(renewed);
            lease.last_progress_at = now;
            lease.progress = progress;
            let expires_at = lease.expires_at;
            state.leases_mut().put(lease.clone());

            effects.push(Effect::LeaseWrite(lease));
            effects.push(Effect::AuditLogAppend(AuditEvent::LeaseRenewed {
                exponent,
                worker,
                expires_at,
            }));

            Ok((state, effects))
        }

        Command::SubmitVerdict {
            verdict,
            perfect_number,
            now,
        } => {
            verdict.validate()?;
            let exponent = verdict.exponent;
            let worker = verdict.worker.clone();

            // Precondition: the perfect number is present exactly for witnesses
            match (&perfect_number, verdict.is_prime_witness) {
                (Some(perfect), true) if perfect.exponent == exponent => {}
                (None, false) => {}
                _ => {
                    return Err(KernelError::InvalidVerdict(
                        "perfect number must be present iff the verdict is a witness".into(),
                    ));
                }
            }

            // Precondition: first verdict, from the candidate's owner
            state.check_submitter(exponent, &worker)?;

            let late = if let Some(lease) = state.leases().get(exponent) {
                let late = lease.is_expired_at(now);
                state.leases_mut().remove(exponent);
                effects.push(Effect::LeaseDelete(exponent));
                late
            } else {
                // reclaimed and still queued
                state.queue_mut().remove(exponent)?;
                effects.push(Effect::QueueDelete(exponent));
                true
            };

            let is_prime_witness = verdict.is_prime_witness;
            let (record, user) = state.ledger().prepare(verdict, perfect_number, now);
            state.ledger_mut().put_result(record.clone());
            state.ledger_mut().put_user(user.clone());

            effects.push(Effect::ResultWrite(record));
            effects.push(Effect::UserWrite(user));
            effects.push(Effect::AuditLogAppend(AuditEvent::VerdictRecorded {
                exponent,
                worker: worker.clone(),
                is_prime_witness,
                late,
            }));
            if let Some(perfect) = perfect_number {
                effects.push(Effect::AuditLogAppend(AuditEvent::Discovery {
                    exponent,
                    worker,
                    digit_count: perfect.digit_count,
                }));
            }

            // Postcondition: candidate is completed and nowhere else
            debug_assert!(state.ledger().contains(exponent));
            debug_assert!(!state.leases().contains(exponent));
            debug_assert!(!state.queue().contains(exponent));

            Ok((state, effects))
        }

        Command::SweepExpired { now } => {
            let reclaim = state.policy().reclaim_priority;
            for exponent in state.leases().expired_at(now) {
                let Some(mut lease) = state.leases_mut().remove(exponent) else {
                    continue;
                };
                lease.status = LeaseStatus::Expired;
                let priority = lease.priority.max(reclaim);
                let candidate = state
                    .queue_mut()
                    .reinsert(exponent, priority, now, Some(lease.worker.clone()))?
                    .clone();

                effects.push(Effect::LeaseDelete(exponent));
                effects.push(Effect::QueueWrite(candidate));
                effects.push(Effect::AuditLogAppend(AuditEvent::LeaseExpired {
                    exponent,
                    worker: lease.worker,
                    requeued_at: priority,
                }));
            }
            Ok((state, effects))
        }

        Command::ReleaseWorker { worker, now } => {
            let reclaim = state.policy().reclaim_priority;
            let held: Vec<Exponent> = state.leases().held_by(&worker).collect();
            for exponent in held {
                let Some(lease) = state.leases_mut().remove(exponent) else {
                    continue;
                };
                let priority = lease.priority.max(reclaim);
                // cleared workers lose the right to a late submission
                let candidate = state
                    .queue_mut()
                    .reinsert(exponent, priority, now, None)?
                    .clone();
                effects.push(Effect::LeaseDelete(exponent));
                effects.push(Effect::QueueWrite(candidate));
                effects.push(Effect::AuditLogAppend(AuditEvent::LeaseReleased {
                    exponent,
                    worker: worker.clone(),
                }));
            }
            Ok((state, effects))
        }

        // ====================================================================
        // Users
        // ====================================================================
        Command::RegisterWorker {
            worker,
            key_hash,
            rotate,
            now,
        } => {
            let mut user = match state.ledger().user(&worker) {
                Some(user) if user.key_hash.is_some() && !rotate => {
                    return Err(KernelError::WorkerAlreadyRegistered(worker));
                }
                Some(user) => user.clone(),
                None => User::new(worker.clone(), now),
            };
            let rotated = user.key_hash.is_some();
            user.key_hash = Some(key_hash);
            state.ledger_mut().put_user(user.clone());

            effects.push(Effect::UserWrite(user));
            effects.push(Effect::AuditLogAppend(AuditEvent::WorkerRegistered {
                worker,
                rotated,
            }));
            Ok((state, effects))
        }
    }
}

/// Applies commands in order, stopping at the first failure.
pub fn apply_committed_batch(
    state: State,
    commands: impl IntoIterator<Item = Command>,
) -> Result<(State, Vec<Effect>), KernelError> {
    let mut all_effects = Vec::new();
    let mut state = state;
    for cmd in commands {
        let (next, effects) = apply_committed(state, cmd)?;
        state = next;
        all_effects.extend(effects);
    }
    Ok((state, all_effects))
}

/// Errors that can occur when applying commands to the kernel.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    // Queue errors
    #[error("candidate {0} is already queued, leased or completed")]
    DuplicateCandidate(Exponent),

    #[error("candidate {0} not found")]
    NotFound(Exponent),

    #[error("invalid exponent {0}: must be within 2..=4294967295")]
    InvalidExponent(Exponent),

    #[error("no work available")]
    NoWorkAvailable,

    // Lease errors
    #[error("worker {worker} already holds an active lease{}", .exponent.map(|p| format!(" on {p}")).unwrap_or_default())]
    LeaseAlreadyActive {
        worker: WorkerId,
        exponent: Option<Exponent>,
    },

    #[error("worker {worker} has no active lease on {exponent}")]
    UnknownLease { worker: WorkerId, exponent: Exponent },

    #[error("worker {worker} does not own candidate {exponent}")]
    LeaseNotOwned { worker: WorkerId, exponent: Exponent },

    // Ledger errors
    #[error("a verdict for {0} is already recorded")]
    AlreadyRecorded(Exponent),

    #[error("invalid verdict: {0}")]
    InvalidVerdict(String),

    #[error("worker {0} is already registered")]
    WorkerAlreadyRegistered(WorkerId),

    // Recovery errors
    #[error("snapshot lists candidate {0} more than once")]
    InconsistentSnapshot(Exponent),
}

impl KernelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KernelError::LeaseAlreadyActive { .. }
            | KernelError::UnknownLease { .. }
            | KernelError::LeaseNotOwned { .. } => ErrorClass::Contention,
            KernelError::DuplicateCandidate(_)
            | KernelError::NotFound(_)
            | KernelError::InvalidExponent(_)
            | KernelError::AlreadyRecorded(_)
            | KernelError::InvalidVerdict(_)
            | KernelError::WorkerAlreadyRegistered(_) => ErrorClass::Data,
            KernelError::NoWorkAvailable => ErrorClass::Exhausted,
            KernelError::InconsistentSnapshot(_) => ErrorClass::Internal,
        }
    }
}

impl From<QueueError> for KernelError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::DuplicateCandidate(p) => KernelError::DuplicateCandidate(p),
            QueueError::NotFound(p) => KernelError::NotFound(p),
            QueueError::EmptyQueue => KernelError::NoWorkAvailable,
        }
    }
}

impl From<ValidationError> for KernelError {
    fn from(e: ValidationError) -> Self {
        KernelError::InvalidVerdict(e.to_string())
    }
}
