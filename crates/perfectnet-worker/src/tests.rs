//! Unit tests for the worker driver.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use perfectnet::{Coordinator, CoordinatorConfig, MemoryStore, SystemClock};
use perfectnet_client::{ClientConfig, ClientError, ErrorCode};
use perfectnet_engine::{EngineConfig, EngineEvent, ProgressReport, VerificationEngine};
use perfectnet_server::{Server, ServerConfig};
use perfectnet_types::{
    Assignment, ErrorClass, Exponent, Priority, Progress, Timestamp, Verdict, WorkerId,
};
use test_case::test_case;

use crate::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn coordinator() -> Coordinator {
    Coordinator::open(
        CoordinatorConfig::default(),
        Box::new(MemoryStore::new()),
        Arc::new(SystemClock),
    )
    .unwrap()
}

fn alice() -> WorkerId {
    WorkerId::new("alice").unwrap()
}

fn quick_backoff() -> BackoffConfig {
    BackoffConfig {
        initial: Duration::from_millis(1),
        multiplier: 2.0,
        max: Duration::from_millis(5),
        jitter: 0.0,
    }
}

fn config(dir: &tempfile::TempDir) -> DriverConfig {
    DriverConfig::new(alice(), dir.path())
        .with_engine(EngineConfig {
            checkpoint_interval: 50,
            progress_interval: Duration::from_secs(300),
        })
        .with_backoff(quick_backoff())
        .with_exit_when_idle(true)
}

fn worker(dir: &tempfile::TempDir, link: Arc<dyn CoordinatorLink>) -> Worker {
    Worker::new(config(dir), link).unwrap()
}

/// The first checkpoint a fresh run of `p` would write.
fn first_checkpoint(p: u64) -> perfectnet_engine::VerificationState {
    let engine = VerificationEngine::new(EngineConfig {
        checkpoint_interval: 50,
        progress_interval: Duration::from_secs(300),
    });
    engine
        .run(Exponent::new(p), None)
        .unwrap()
        .find_map(|event| match event {
            EngineEvent::Checkpoint(state) => Some(state),
            _ => None,
        })
        .unwrap()
}

/// Delegates to a local coordinator but fails calls from a script first.
struct ScriptedLink {
    inner: LocalLink,
    submit_errors: Mutex<VecDeque<LinkError>>,
    progress_error: Option<ErrorCode>,
}

impl ScriptedLink {
    fn new(coordinator: Coordinator) -> Self {
        Self {
            inner: LocalLink::new(coordinator),
            submit_errors: Mutex::new(VecDeque::new()),
            progress_error: None,
        }
    }

    fn fail_submit(self, error: LinkError) -> Self {
        self.submit_errors.lock().unwrap().push_back(error);
        self
    }
}

impl CoordinatorLink for ScriptedLink {
    fn request_assignment(&self, worker: &WorkerId) -> LinkResult<Assignment> {
        self.inner.request_assignment(worker)
    }

    fn report_progress(
        &self,
        worker: &WorkerId,
        exponent: Exponent,
        percent: f64,
    ) -> LinkResult<Timestamp> {
        if let Some(code) = self.progress_error {
            return Err(LinkError::Rejected {
                class: code.class(),
                code: Some(code),
                message: code.to_string(),
                held_lease: None,
            });
        }
        self.inner.report_progress(worker, exponent, percent)
    }

    fn submit_verdict(&self, verdict: &Verdict) -> LinkResult<Accepted> {
        if let Some(error) = self.submit_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.inner.submit_verdict(verdict)
    }
}

fn rejected(code: ErrorCode) -> LinkError {
    LinkError::Rejected {
        class: code.class(),
        code: Some(code),
        message: code.to_string(),
        held_lease: None,
    }
}

// ============================================================================
// Driver
// ============================================================================

#[test]
fn drains_the_queue_and_reports_discoveries() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    // 2 3 5 7 11 13 17 19 23 29 31; 11, 23 and 29 are not witnesses
    assert_eq!(coordinator.seed(2, 32).unwrap(), 11);

    let mut worker = worker(&dir, Arc::new(LocalLink::new(coordinator.clone())));
    let summary = worker.run().unwrap();

    assert_eq!(summary.completed, 11);
    assert_eq!(summary.discarded, 0);
    assert_eq!(summary.discoveries.len(), 8);

    let stats = coordinator.stats().unwrap();
    assert_eq!(stats.results, 11);
    assert_eq!(stats.discoveries, 8);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.active_leases, 0);
    assert!(worker.checkpoints().list().unwrap().is_empty());
}

#[test]
fn stops_at_the_assignment_limit() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator.seed(2, 32).unwrap();

    let mut worker = Worker::new(
        config(&dir).with_max_assignments(Some(3)),
        Arc::new(LocalLink::new(coordinator.clone())),
    )
    .unwrap();
    let summary = worker.run().unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(coordinator.stats().unwrap().queued, 8);
}

#[test]
fn witness_127_is_recorded_with_its_perfect_number() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(127), Priority::new(1))
        .unwrap();

    let mut worker = worker(&dir, Arc::new(LocalLink::new(coordinator.clone())));
    let step = worker.step().unwrap();

    let Step::Completed {
        exponent,
        perfect_number,
        ..
    } = step
    else {
        panic!("expected completion, got {step:?}");
    };
    assert_eq!(exponent, Exponent::new(127));
    assert_eq!(perfect_number.unwrap().digit_count, 77);
    assert_eq!(coordinator.list_discoveries().unwrap().len(), 1);
}

#[test]
fn resumes_a_checkpointed_lease() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(127), Priority::new(1))
        .unwrap();
    coordinator.request_assignment(&alice()).unwrap();

    let mut worker = worker(&dir, Arc::new(LocalLink::new(coordinator.clone())));
    worker.checkpoints().save(&first_checkpoint(127)).unwrap();

    // The coordinator would refuse a second lease; the checkpoint carries on
    let step = worker.step().unwrap();
    assert!(matches!(
        step,
        Step::Completed { exponent, .. } if exponent == Exponent::new(127)
    ));
    assert!(worker.checkpoints().list().unwrap().is_empty());

    let leases = coordinator.active_leases().unwrap();
    assert!(leases.is_empty());
}

#[test]
fn corrupt_checkpoint_restarts_from_zero() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(127), Priority::new(1))
        .unwrap();
    coordinator.request_assignment(&alice()).unwrap();

    let mut worker = worker(&dir, Arc::new(LocalLink::new(coordinator.clone())));
    std::fs::write(
        worker.checkpoints().path_for(Exponent::new(127)),
        b"not a checkpoint",
    )
    .unwrap();

    let step = worker.step().unwrap();
    let Step::Completed { perfect_number, .. } = step else {
        panic!("expected completion, got {step:?}");
    };
    assert_eq!(perfect_number.unwrap().exponent, Exponent::new(127));
}

#[test]
fn checkpoint_for_a_lost_lease_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();

    let mut worker = worker(&dir, Arc::new(LocalLink::new(coordinator)));
    worker.checkpoints().save(&first_checkpoint(521)).unwrap();

    assert_eq!(worker.step().unwrap(), Step::Idle);
    assert!(worker.checkpoints().list().unwrap().is_empty());
}

#[test]
fn stop_flag_keeps_the_lease_and_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(521), Priority::new(1))
        .unwrap();

    let mut worker = worker(&dir, Arc::new(LocalLink::new(coordinator.clone())));
    worker.stop_flag().store(true, Ordering::SeqCst);

    assert_eq!(worker.step().unwrap(), Step::Stopped);
    assert_eq!(coordinator.active_leases().unwrap().len(), 1);
    assert!(coordinator.list_discoveries().unwrap().is_empty());
    assert_eq!(
        worker.checkpoints().list().unwrap(),
        vec![Exponent::new(521)]
    );
}

#[test]
fn restart_before_first_interval_resumes_from_iteration_zero() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(521), Priority::new(1))
        .unwrap();

    // Stopped before any interval checkpoint could be written
    let mut first = worker(&dir, Arc::new(LocalLink::new(coordinator.clone())));
    first.stop_flag().store(true, Ordering::SeqCst);
    assert_eq!(first.step().unwrap(), Step::Stopped);
    let saved = first
        .checkpoints()
        .load(Exponent::new(521))
        .unwrap()
        .unwrap();
    assert_eq!(saved.iteration, 0);
    drop(first);

    let mut second = worker(&dir, Arc::new(LocalLink::new(coordinator.clone())));
    let step = second.step().unwrap();
    let Step::Completed { exponent, perfect_number, .. } = step else {
        panic!("expected completion, got {step:?}");
    };
    assert_eq!(exponent, Exponent::new(521));
    assert!(perfect_number.is_some());
    assert!(second.checkpoints().list().unwrap().is_empty());
    assert!(coordinator.active_leases().unwrap().is_empty());
}

#[test]
fn held_lease_without_checkpoint_is_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(521), Priority::new(1))
        .unwrap();
    // A previous run took the lease and lost its checkpoint directory
    coordinator.request_assignment(&alice()).unwrap();

    let mut worker = worker(&dir, Arc::new(LocalLink::new(coordinator.clone())));
    let step = worker.step().unwrap();
    assert!(matches!(
        step,
        Step::Completed { exponent, .. } if exponent == Exponent::new(521)
    ));
    assert!(coordinator.active_leases().unwrap().is_empty());
    assert_eq!(coordinator.list_discoveries().unwrap().len(), 1);
}

#[test]
fn refused_verdict_discards_the_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(127), Priority::new(1))
        .unwrap();

    let link = ScriptedLink::new(coordinator.clone())
        .fail_submit(rejected(ErrorCode::LeaseNotOwned));
    let mut worker = worker(&dir, Arc::new(link));

    assert_eq!(
        worker.step().unwrap(),
        Step::Discarded {
            exponent: Exponent::new(127),
            class: ErrorClass::Contention,
        }
    );
    assert!(worker.checkpoints().list().unwrap().is_empty());
}

#[test]
fn transient_submit_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(127), Priority::new(1))
        .unwrap();

    let link = ScriptedLink::new(coordinator.clone())
        .fail_submit(LinkError::Transport("connection reset".into()))
        .fail_submit(rejected(ErrorCode::Unavailable));
    let mut worker = worker(&dir, Arc::new(link));

    assert!(matches!(worker.step().unwrap(), Step::Completed { .. }));
    assert_eq!(coordinator.stats().unwrap().discoveries, 1);
}

#[test]
fn unauthorized_submit_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(127), Priority::new(1))
        .unwrap();

    let link = ScriptedLink::new(coordinator)
        .fail_submit(LinkError::Unauthorized("invalid API key".into()));
    let mut worker = worker(&dir, Arc::new(link));

    assert!(matches!(
        worker.run(),
        Err(WorkerError::Link(LinkError::Unauthorized(_)))
    ));
}

#[test]
fn idle_worker_exits_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker = worker(&dir, Arc::new(LocalLink::new(coordinator())));
    assert_eq!(worker.run().unwrap(), Summary::default());
}

// ============================================================================
// Reporter
// ============================================================================

fn report(exponent: Exponent) -> ProgressReport {
    ProgressReport {
        exponent,
        iteration: 10,
        required: 125,
        progress: Progress::from_iterations(10, 125),
        eta: None,
    }
}

#[test]
fn reporter_renews_the_lease() {
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(127), Priority::new(1))
        .unwrap();
    coordinator.request_assignment(&alice()).unwrap();

    let reporter = Reporter::spawn(
        Arc::new(LocalLink::new(coordinator.clone())),
        alice(),
        Exponent::new(127),
    )
    .unwrap();
    reporter.publish(report(Exponent::new(127)));

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let lease = coordinator.active_leases().unwrap().remove(0);
        if lease.progress == Progress::from_iterations(10, 125) {
            break;
        }
        assert!(Instant::now() < deadline, "progress never arrived");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!reporter.lease_lost());
}

#[test]
fn reporter_flags_a_lost_lease() {
    let mut link = ScriptedLink::new(coordinator());
    link.progress_error = Some(ErrorCode::UnknownLease);

    let reporter = Reporter::spawn(Arc::new(link), alice(), Exponent::new(127)).unwrap();
    reporter.publish(report(Exponent::new(127)));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !reporter.lease_lost() {
        assert!(Instant::now() < deadline, "lease loss never noticed");
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ============================================================================
// Errors
// ============================================================================

#[test_case(ErrorCode::NoWorkAvailable, ErrorClass::Exhausted, false ; "empty queue")]
#[test_case(ErrorCode::UnknownLease, ErrorClass::Contention, false ; "unknown lease")]
#[test_case(ErrorCode::AlreadyRecorded, ErrorClass::Data, false ; "already recorded")]
#[test_case(ErrorCode::Unavailable, ErrorClass::Durability, true ; "degraded coordinator")]
#[test_case(ErrorCode::ServerBusy, ErrorClass::Internal, true ; "busy server")]
fn server_errors_classify(code: ErrorCode, class: ErrorClass, retryable: bool) {
    let error = LinkError::from(ClientError::Server {
        code,
        message: String::new(),
        held_lease: None,
    });
    assert_eq!(error.class(), class);
    assert_eq!(error.is_retryable(), retryable);
}

#[test]
fn credentials_errors_are_not_retried() {
    let error = LinkError::from(ClientError::HandshakeFailed("bad key".into()));
    assert!(matches!(error, LinkError::Unauthorized(_)));
    assert!(!error.is_retryable());

    let error = LinkError::from(ClientError::Connection(std::io::Error::from(
        std::io::ErrorKind::ConnectionReset,
    )));
    assert!(error.is_retryable());
}

#[test]
fn local_errors_keep_their_code() {
    let error = LocalLink::new(coordinator())
        .request_assignment(&alice())
        .unwrap_err();
    assert_eq!(error.class(), ErrorClass::Exhausted);
    assert!(!error.is_lease_already_active());
}

#[test]
fn local_lease_refusal_names_the_held_candidate() {
    let coordinator = coordinator();
    coordinator
        .enqueue(Exponent::new(521), Priority::new(1))
        .unwrap();
    let link = LocalLink::new(coordinator);
    link.request_assignment(&alice()).unwrap();

    let error = link.request_assignment(&alice()).unwrap_err();
    assert!(error.is_lease_already_active());
    assert_eq!(error.held_lease(), Some(Exponent::new(521)));
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn remote_worker_completes_seeded_range() {
    let coordinator = coordinator();
    coordinator.seed(2, 20).unwrap();

    let mut server = Server::new(
        ServerConfig::new(([127, 0, 0, 1], 0)).with_sweep_interval(None),
        coordinator.clone(),
    )
    .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let thread = std::thread::spawn(move || server.run().unwrap());

    let dir = tempfile::tempdir().unwrap();
    let link = RemoteLink::new(addr.to_string(), ClientConfig::default());
    let mut worker = worker(&dir, Arc::new(link));
    let summary = worker.run().unwrap();

    shutdown.shutdown();
    thread.join().unwrap();

    assert_eq!(summary.completed, 8);
    // 2 3 5 7 13 17 19
    assert_eq!(summary.discoveries.len(), 7);
    assert_eq!(coordinator.stats().unwrap().results, 8);
}
