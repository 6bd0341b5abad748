//! Unit tests for perfectnet-kernel
//!
//! The kernel is pure (no IO), making it ideal for unit testing.
//! Every code path can be tested without mocks.

use std::time::Duration;

use perfectnet_types::{
    ErrorClass, Exponent, PerfectNumber, Priority, Progress, Residue64, Timestamp, Verdict,
    WorkerId,
};

use crate::command::Command;
use crate::effects::{AuditEvent, Effect};
use crate::kernel::{KernelError, apply_committed, apply_committed_batch};
use crate::lease::LeasePolicy;
use crate::state::State;

// ============================================================================
// Test Helpers
// ============================================================================

const HOUR: Duration = Duration::from_secs(3600);

fn p(n: u64) -> Exponent {
    Exponent::new(n)
}

fn worker(name: &str) -> WorkerId {
    WorkerId::new(name).unwrap()
}

fn t(secs: u64) -> Timestamp {
    Timestamp::from_secs(secs)
}

fn state_with(candidates: &[(u64, u32)]) -> State {
    let commands = candidates.iter().map(|&(exponent, priority)| Command::Enqueue {
        exponent: p(exponent),
        priority: Priority::new(priority),
        now: t(0),
    });
    let (state, _) =
        apply_committed_batch(State::new(LeasePolicy::default()), commands).expect("seed queue");
    state
}

fn assign(state: State, who: &str, now: Timestamp) -> Result<(State, Exponent), KernelError> {
    let (state, effects) = apply_committed(
        state,
        Command::RequestAssignment {
            worker: worker(who),
            now,
        },
    )?;
    let exponent = effects
        .iter()
        .find_map(Effect::as_lease_write)
        .expect("assignment writes a lease")
        .exponent;
    Ok((state, exponent))
}

fn verdict(exponent: u64, who: &str, witness: bool) -> Command {
    Command::SubmitVerdict {
        verdict: Verdict {
            exponent: p(exponent),
            worker: worker(who),
            is_prime_witness: witness,
            residue: if witness { Residue64::ZERO } else { Residue64::new(0x5EED) },
            elapsed: Duration::from_secs(90),
        },
        perfect_number: witness.then(|| PerfectNumber {
            exponent: p(exponent),
            digit_count: 77,
        }),
        now: t(100),
    }
}

fn sweep(state: State, now: Timestamp) -> (State, Vec<Effect>) {
    apply_committed(state, Command::SweepExpired { now }).unwrap()
}

fn assert_exclusive(state: &State) {
    for lease in state.leases().iter() {
        assert!(!state.queue().contains(lease.exponent));
        assert!(!state.ledger().contains(lease.exponent));
    }
    for candidate in state.queue().iter() {
        assert!(!state.ledger().contains(candidate.exponent));
    }
}

// ============================================================================
// Candidate Queue
// ============================================================================

#[test]
fn enqueue_rejects_known_candidates() {
    let state = state_with(&[(127, 1)]);
    let err = apply_committed(
        state.clone(),
        Command::Enqueue {
            exponent: p(127),
            priority: Priority::new(9),
            now: t(1),
        },
    )
    .unwrap_err();
    assert_eq!(err, KernelError::DuplicateCandidate(p(127)));
    assert_eq!(err.class(), ErrorClass::Data);

    // leased candidates are known too
    let (state, leased) = assign(state, "alice", t(1)).unwrap();
    let err = apply_committed(
        state,
        Command::Enqueue {
            exponent: leased,
            priority: Priority::new(1),
            now: t(2),
        },
    )
    .unwrap_err();
    assert_eq!(err, KernelError::DuplicateCandidate(leased));
}

#[test]
fn enqueue_rejects_out_of_range_exponents() {
    for exponent in [p(1), p(Exponent::MAX.as_u64() + 1), p(1 << 45)] {
        let err = apply_committed(
            State::new(LeasePolicy::default()),
            Command::Enqueue {
                exponent,
                priority: Priority::new(1),
                now: t(0),
            },
        )
        .unwrap_err();
        assert_eq!(err, KernelError::InvalidExponent(exponent));
    }
}

#[test]
fn priority_order_serves_13_then_50_then_89() {
    let mut state = state_with(&[(50, 1), (13, 5), (89, 1)]);
    let mut served = Vec::new();
    for (i, who) in ["w-one", "w-two", "w-three"].iter().enumerate() {
        let (next, exponent) = assign(state, who, t(i as u64)).unwrap();
        state = next;
        served.push(exponent.as_u64());
    }
    assert_eq!(served, vec![13, 50, 89]);
}

#[test]
fn seed_skips_known_and_invalid_exponents() {
    let state = state_with(&[(127, 1)]);
    let (state, effects) = apply_committed(
        state,
        Command::Seed {
            candidates: vec![
                (p(127), Priority::new(100)),
                (p(1), Priority::new(100)),
                (p(1 << 45), Priority::new(50)),
                (p(521), Priority::new(50)),
            ],
            now: t(1),
        },
    )
    .unwrap();
    assert_eq!(effects.len(), 1);
    assert_eq!(state.queue().len(), 2);
    assert_eq!(state.queue().get(p(127)).unwrap().priority, Priority::new(1));
}

#[test]
fn withdraw_removes_only_queued() {
    let state = state_with(&[(127, 1)]);
    let (state, effects) = apply_committed(state, Command::Withdraw { exponent: p(127) }).unwrap();
    assert!(state.queue().is_empty());
    assert_eq!(effects[0], Effect::QueueDelete(p(127)));
    assert_eq!(
        apply_committed(state, Command::Withdraw { exponent: p(127) }).unwrap_err(),
        KernelError::NotFound(p(127))
    );
}

// ============================================================================
// Assignment
// ============================================================================

#[test]
fn assignment_moves_candidate_into_a_lease() {
    let state = state_with(&[(127, 1)]);
    let (state, effects) = apply_committed(
        state,
        Command::RequestAssignment {
            worker: worker("alice"),
            now: t(10),
        },
    )
    .unwrap();

    assert!(state.queue().is_empty());
    let lease = state.leases().get(p(127)).unwrap();
    assert_eq!(lease.worker, worker("alice"));
    assert_eq!(lease.granted_at, t(10));
    assert_eq!(lease.expires_at, t(10).saturating_add(24 * HOUR));
    assert_eq!(effects[0], Effect::QueueDelete(p(127)));
    assert!(matches!(effects[1], Effect::LeaseWrite(_)));
    assert!(matches!(
        effects[2],
        Effect::AuditLogAppend(AuditEvent::LeaseGranted { .. })
    ));
}

#[test]
fn large_exponents_get_the_long_lease() {
    let state = state_with(&[(11_213, 1)]);
    let (state, exponent) = assign(state, "alice", t(0)).unwrap();
    assert_eq!(
        state.leases().get(exponent).unwrap().expires_at,
        t(0).saturating_add(72 * HOUR)
    );
}

#[test]
fn empty_queue_means_no_work() {
    let err = assign(State::new(LeasePolicy::default()), "alice", t(0)).unwrap_err();
    assert_eq!(err, KernelError::NoWorkAvailable);
    assert_eq!(err.class(), ErrorClass::Exhausted);
}

#[test]
fn second_assignment_for_busy_worker_is_rejected() {
    let state = state_with(&[(127, 1), (521, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let err = assign(state.clone(), "alice", t(1)).unwrap_err();
    assert_eq!(
        err,
        KernelError::LeaseAlreadyActive {
            worker: worker("alice"),
            exponent: Some(p(127)),
        }
    );
    assert_eq!(err.class(), ErrorClass::Contention);
    // someone else still gets work
    assert!(assign(state, "bob", t(1)).is_ok());
}

#[test]
fn concurrency_limit_is_configurable() {
    let policy = LeasePolicy {
        max_leases_per_worker: 2,
        ..LeasePolicy::default()
    };
    let commands = [127, 521, 607].map(|e| Command::Enqueue {
        exponent: p(e),
        priority: Priority::new(1),
        now: t(0),
    });
    let (state, _) = apply_committed_batch(State::new(policy), commands).unwrap();
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    assert!(matches!(
        assign(state, "alice", t(0)),
        Err(KernelError::LeaseAlreadyActive { .. })
    ));
}

// ============================================================================
// Progress
// ============================================================================

#[test]
fn progress_renews_the_lease() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let (state, _) = apply_committed(
        state,
        Command::ReportProgress {
            worker: worker("alice"),
            exponent: p(127),
            progress: Progress::from_percent(40.0).unwrap(),
            now: t(3600),
        },
    )
    .unwrap();

    let lease = state.leases().get(p(127)).unwrap();
    assert_eq!(lease.expires_at, t(3600).saturating_add(24 * HOUR));
    assert_eq!(lease.last_progress_at, t(3600));
    assert_eq!(lease.progress.basis_points(), 4000);
    assert_eq!(lease.granted_at, t(0));
}

#[test]
fn progress_never_shortens_a_lease() {
    let policy = LeasePolicy {
        standard_duration: HOUR,
        ..LeasePolicy::default()
    };
    let (state, _) = apply_committed(
        State::new(policy),
        Command::Enqueue {
            exponent: p(127),
            priority: Priority::new(1),
            now: t(0),
        },
    )
    .unwrap();
    let (mut state, _) = assign(state, "alice", t(1000)).unwrap();
    let before = state.leases().get(p(127)).unwrap().expires_at;
    // a report with a clock that went backwards
    (state, _) = apply_committed(
        state,
        Command::ReportProgress {
            worker: worker("alice"),
            exponent: p(127),
            progress: Progress::ZERO,
            now: t(10),
        },
    )
    .unwrap();
    assert_eq!(state.leases().get(p(127)).unwrap().expires_at, before);
}

#[test]
fn progress_from_the_wrong_worker_is_unknown_lease() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let err = apply_committed(
        state,
        Command::ReportProgress {
            worker: worker("mallory"),
            exponent: p(127),
            progress: Progress::ZERO,
            now: t(1),
        },
    )
    .unwrap_err();
    assert_eq!(
        err,
        KernelError::UnknownLease {
            worker: worker("mallory"),
            exponent: p(127),
        }
    );
}

#[test]
fn progress_after_deadline_is_unknown_lease_even_before_sweep() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let late = t(0).saturating_add(25 * HOUR);
    let err = apply_committed(
        state,
        Command::ReportProgress {
            worker: worker("alice"),
            exponent: p(127),
            progress: Progress::ZERO,
            now: late,
        },
    )
    .unwrap_err();
    assert!(matches!(err, KernelError::UnknownLease { .. }));
}

// ============================================================================
// Verdicts
// ============================================================================

#[test]
fn verdict_completes_candidate_and_credits_user() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let (state, effects) = apply_committed(state, verdict(127, "alice", true)).unwrap();

    assert!(state.leases().is_empty());
    assert!(state.queue().is_empty());
    let record = state.ledger().get(p(127)).unwrap();
    assert!(record.is_discovery());
    assert_eq!(record.perfect_number.unwrap().digit_count, 77);

    let user = state.ledger().user(&worker("alice")).unwrap();
    assert_eq!(user.candidates_completed, 1);
    assert_eq!(user.discoveries, 1);
    assert_eq!(user.compute_time, Duration::from_secs(90));

    assert!(effects.contains(&Effect::LeaseDelete(p(127))));
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::AuditLogAppend(AuditEvent::Discovery { digit_count: 77, .. })
    )));
}

#[test]
fn second_verdict_is_already_recorded_and_not_credited() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let (state, _) = apply_committed(state, verdict(127, "alice", true)).unwrap();

    let err = apply_committed(state.clone(), verdict(127, "alice", true)).unwrap_err();
    assert_eq!(err, KernelError::AlreadyRecorded(p(127)));
    assert_eq!(state.ledger().len(), 1);
    assert_eq!(
        state.ledger().user(&worker("alice")).unwrap().candidates_completed,
        1
    );
}

#[test]
fn verdict_from_non_holder_is_rejected() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let err = apply_committed(state.clone(), verdict(127, "mallory", false)).unwrap_err();
    assert_eq!(
        err,
        KernelError::LeaseNotOwned {
            worker: worker("mallory"),
            exponent: p(127),
        }
    );
    // nothing changed: alice can still finish
    assert!(apply_committed(state, verdict(127, "alice", false)).is_ok());
}

#[test]
fn verdict_for_unassigned_candidate_is_rejected() {
    let state = state_with(&[(127, 1)]);
    assert!(matches!(
        apply_committed(state, verdict(127, "alice", false)),
        Err(KernelError::LeaseNotOwned { .. })
    ));
}

#[test]
fn witness_without_perfect_number_is_invalid() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let Command::SubmitVerdict { verdict, now, .. } = verdict(127, "alice", true) else {
        unreachable!()
    };
    let err = apply_committed(
        state,
        Command::SubmitVerdict {
            verdict,
            perfect_number: None,
            now,
        },
    )
    .unwrap_err();
    assert!(matches!(err, KernelError::InvalidVerdict(_)));
}

#[test]
fn witness_with_nonzero_residue_is_invalid() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let Command::SubmitVerdict {
        mut verdict,
        perfect_number,
        now,
    } = verdict(127, "alice", true)
    else {
        unreachable!()
    };
    verdict.residue = Residue64::new(1);
    let err = apply_committed(
        state,
        Command::SubmitVerdict {
            verdict,
            perfect_number,
            now,
        },
    )
    .unwrap_err();
    assert!(matches!(err, KernelError::InvalidVerdict(_)));
}

// ============================================================================
// Expiry and Reassignment
// ============================================================================

#[test]
fn sweep_leaves_live_leases_alone() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let deadline = state.leases().get(p(127)).unwrap().expires_at;
    let (state, effects) = sweep(state, deadline);
    assert!(effects.is_empty());
    assert!(state.leases().contains(p(127)));
}

#[test]
fn crashed_worker_candidate_goes_to_next_requester() {
    let state = state_with(&[(521, 1)]);
    let (state, exponent) = assign(state, "worker-a", t(0)).unwrap();
    assert_eq!(exponent, p(521));

    // worker A never reports; the lease runs out and the sweep reclaims it
    let after = t(0).saturating_add(24 * HOUR + Duration::from_secs(1));
    let (state, effects) = sweep(state, after);
    assert!(effects.contains(&Effect::LeaseDelete(p(521))));
    assert_eq!(state.queue().peek_next().unwrap().exponent, p(521));
    assert_exclusive(&state);

    let (state, exponent) = assign(state, "worker-b", after).unwrap();
    assert_eq!(exponent, p(521));
    assert_eq!(state.leases().get(p(521)).unwrap().worker, worker("worker-b"));
}

#[test]
fn reclaimed_candidates_are_boosted() {
    let state = state_with(&[(127, 100), (61, 100)]);
    let (state, first) = assign(state, "alice", t(0)).unwrap();
    assert_eq!(first, p(61));
    let (state, _) = sweep(state, t(0).saturating_add(25 * HOUR));
    let requeued = state.queue().get(p(61)).unwrap();
    assert_eq!(requeued.priority, Priority::RECLAIM);
    assert_eq!(requeued.reclaimed_from, Some(worker("alice")));
    assert_eq!(state.queue().peek_next().unwrap().exponent, p(61));
}

#[test]
fn late_verdict_before_reassignment_is_accepted() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let (state, _) = sweep(state, t(0).saturating_add(25 * HOUR));

    let (state, effects) = apply_committed(state, verdict(127, "alice", true)).unwrap();
    assert!(state.queue().is_empty());
    assert!(state.ledger().contains(p(127)));
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::AuditLogAppend(AuditEvent::VerdictRecorded { late: true, .. })
    )));
}

#[test]
fn late_verdict_after_reassignment_is_not_owned() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let later = t(0).saturating_add(25 * HOUR);
    let (state, _) = sweep(state, later);
    let (state, _) = assign(state, "bob", later).unwrap();

    let err = apply_committed(state.clone(), verdict(127, "alice", false)).unwrap_err();
    assert!(matches!(err, KernelError::LeaseNotOwned { .. }));
    assert!(apply_committed(state, verdict(127, "bob", false)).is_ok());
}

#[test]
fn expired_but_unswept_lease_still_accepts_its_holder() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let Command::SubmitVerdict {
        verdict, perfect_number, ..
    } = verdict(127, "alice", false)
    else {
        unreachable!()
    };
    let (state, _) = apply_committed(
        state,
        Command::SubmitVerdict {
            verdict,
            perfect_number,
            now: t(0).saturating_add(30 * HOUR),
        },
    )
    .unwrap();
    assert!(state.ledger().contains(p(127)));
}

#[test]
fn release_worker_requeues_without_late_rights() {
    let state = state_with(&[(127, 1)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let (state, effects) = apply_committed(
        state,
        Command::ReleaseWorker {
            worker: worker("alice"),
            now: t(5),
        },
    )
    .unwrap();
    assert_eq!(effects.len(), 3);
    assert_eq!(state.queue().get(p(127)).unwrap().reclaimed_from, None);
    assert!(matches!(
        apply_committed(state, verdict(127, "alice", false)),
        Err(KernelError::LeaseNotOwned { .. })
    ));
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn registration_requires_rotate_for_existing_key() {
    let register = |rotate| Command::RegisterWorker {
        worker: worker("alice"),
        key_hash: [7; 32],
        rotate,
        now: t(0),
    };
    let (state, _) = apply_committed(State::new(LeasePolicy::default()), register(false)).unwrap();
    assert_eq!(
        state.ledger().user(&worker("alice")).unwrap().key_hash,
        Some([7; 32])
    );
    assert_eq!(
        apply_committed(state.clone(), register(false)).unwrap_err(),
        KernelError::WorkerAlreadyRegistered(worker("alice"))
    );
    assert!(apply_committed(state, register(true)).is_ok());
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn snapshot_restores_identical_state() {
    let state = state_with(&[(127, 1), (521, 2), (607, 3)]);
    let (state, _) = assign(state, "alice", t(0)).unwrap();
    let (state, _) = apply_committed(state, verdict(607, "alice", false)).unwrap();
    let (state, _) = assign(state, "bob", t(1)).unwrap();

    let snapshot = state.snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    let restored =
        State::restore(LeasePolicy::default(), serde_json::from_str(&json).unwrap()).unwrap();
    assert_eq!(restored, state);
}

#[test]
fn snapshot_with_double_membership_is_rejected() {
    let state = state_with(&[(127, 1)]);
    let (leased, _) = assign(state.clone(), "alice", t(0)).unwrap();
    let mut snapshot = leased.snapshot();
    snapshot.queue = state.snapshot().queue;
    assert_eq!(
        State::restore(LeasePolicy::default(), snapshot).unwrap_err(),
        KernelError::InconsistentSnapshot(p(127))
    );
}

// ============================================================================
// Property Tests
// ============================================================================

mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u64, u32),
        Assign(usize),
        Progress(usize, u64),
        Submit(usize, u64),
        Sweep,
        Tick(u64),
    }

    const WORKERS: [&str; 4] = ["w-a", "w-b", "w-c", "w-d"];

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (2u64..40, 0u32..4).prop_map(|(e, pr)| Op::Enqueue(e, pr)),
            (0usize..4).prop_map(Op::Assign),
            (0usize..4, 2u64..40).prop_map(|(w, e)| Op::Progress(w, e)),
            (0usize..4, 2u64..40).prop_map(|(w, e)| Op::Submit(w, e)),
            Just(Op::Sweep),
            (1u64..48).prop_map(Op::Tick),
        ]
    }

    proptest! {
        #[test]
        fn candidates_are_never_in_two_places(ops in proptest::collection::vec(op(), 1..120)) {
            let mut state = State::new(LeasePolicy::default());
            let mut now = t(0);
            let mut expires = std::collections::BTreeMap::new();

            for op in ops {
                let cmd = match op {
                    Op::Enqueue(e, pr) => Command::Enqueue { exponent: p(e), priority: Priority::new(pr), now },
                    Op::Assign(w) => Command::RequestAssignment { worker: worker(WORKERS[w]), now },
                    Op::Progress(w, e) => Command::ReportProgress {
                        worker: worker(WORKERS[w]),
                        exponent: p(e),
                        progress: Progress::ZERO,
                        now,
                    },
                    Op::Submit(w, e) => Command::SubmitVerdict {
                        verdict: Verdict {
                            exponent: p(e),
                            worker: worker(WORKERS[w]),
                            is_prime_witness: false,
                            residue: Residue64::new(1),
                            elapsed: Duration::from_secs(1),
                        },
                        perfect_number: None,
                        now,
                    },
                    Op::Sweep => Command::SweepExpired { now },
                    Op::Tick(hours) => {
                        now = now.saturating_add(HOUR * hours as u32);
                        continue;
                    }
                };
                let results_before = state.ledger().len();
                if let Ok((next, _)) = apply_committed(state.clone(), cmd) {
                    state = next;
                }

                assert_exclusive(&state);
                prop_assert!(state.ledger().len() >= results_before);
                for name in WORKERS {
                    prop_assert!(state.leases().count_for(&worker(name)) <= 1);
                }
                // deadlines never move backwards, even across reassignment
                for lease in state.leases().iter() {
                    let previous = expires.entry(lease.exponent).or_insert(lease.expires_at);
                    prop_assert!(lease.expires_at >= *previous);
                    *previous = lease.expires_at;
                }
            }
        }

        #[test]
        fn swept_state_has_no_overdue_leases(hours in 0u64..200, count in 1u64..10) {
            let candidates: Vec<(u64, u32)> = (0..count).map(|i| (100 + i, 1)).collect();
            let mut state = state_with(&candidates);
            for (i, name) in WORKERS.iter().enumerate().take(count as usize) {
                state = assign(state, name, t(i as u64)).unwrap().0;
            }
            let now = t(0).saturating_add(HOUR * hours as u32);
            let (state, _) = sweep(state, now);
            prop_assert!(state.leases().iter().all(|lease| !lease.is_expired_at(now)));
            prop_assert_eq!(state.queue().len() + state.leases().len(), count as usize);
        }
    }
}
