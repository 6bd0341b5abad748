//! The worker loop: lease, verify, checkpoint, report, submit.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use perfectnet_engine::{
    CheckpointStore, EngineConfig, EngineError, EngineEvent, Run, VerificationEngine,
    VerificationState,
};
use perfectnet_types::{
    ErrorClass, Exponent, PerfectNumber, Progress, Timestamp, Verdict, WorkerId,
};
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::{LinkError, WorkerError, WorkerResult};
use crate::link::{Accepted, CoordinatorLink};
use crate::reporter::Reporter;

/// Longest uninterrupted sleep, so a stop request is noticed promptly.
const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Driver settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub worker: WorkerId,
    pub checkpoint_dir: PathBuf,
    pub engine: EngineConfig,
    /// Wait between polls while the queue is empty.
    pub idle_wait: Duration,
    pub backoff: BackoffConfig,
    /// Stop after this many completed assignments.
    pub max_assignments: Option<u64>,
    /// Return instead of waiting when there is no work.
    pub exit_when_idle: bool,
}

impl DriverConfig {
    pub fn new(worker: WorkerId, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker,
            checkpoint_dir: checkpoint_dir.into(),
            engine: EngineConfig::default(),
            idle_wait: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            max_assignments: None,
            exit_when_idle: false,
        }
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_assignments(mut self, max: Option<u64>) -> Self {
        self.max_assignments = max;
        self
    }

    pub fn with_exit_when_idle(mut self, exit: bool) -> Self {
        self.exit_when_idle = exit;
        self
    }
}

/// What one pass through the loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Completed {
        exponent: Exponent,
        sequence: u64,
        perfect_number: Option<PerfectNumber>,
    },
    /// The coordinator no longer wanted our work on this candidate.
    Discarded {
        exponent: Exponent,
        class: ErrorClass,
    },
    /// No work was available.
    Idle,
    /// The stop flag was raised. Any checkpoint is kept for the next start.
    Stopped,
}

/// Totals for one [`Worker::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub completed: u64,
    pub discarded: u64,
    pub retries: u64,
    pub discoveries: Vec<PerfectNumber>,
}

enum Submission {
    Accepted(Accepted),
    Refused(LinkError),
    Abandoned,
}

/// Runs assignments until stopped.
pub struct Worker {
    config: DriverConfig,
    link: Arc<dyn CoordinatorLink>,
    checkpoints: CheckpointStore,
    engine: VerificationEngine,
    stop: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(config: DriverConfig, link: Arc<dyn CoordinatorLink>) -> WorkerResult<Self> {
        let checkpoints = CheckpointStore::open(&config.checkpoint_dir)?;
        let stop = Arc::new(AtomicBool::new(false));
        let engine = VerificationEngine::new(config.engine).with_cancel(Arc::clone(&stop));
        Ok(Self {
            config,
            link,
            checkpoints,
            engine,
            stop,
        })
    }

    /// Raising this flag stops the worker after the current engine event.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Loops until stopped, out of work (when configured to exit), or at the
    /// assignment limit.
    pub fn run(&mut self) -> WorkerResult<Summary> {
        let mut summary = Summary::default();
        let mut backoff = Backoff::new(self.config.backoff);
        info!(worker = %self.config.worker, "worker started");

        while !self.stopped() {
            match self.step() {
                Ok(Step::Completed { perfect_number, .. }) => {
                    backoff.reset();
                    summary.completed += 1;
                    summary.discoveries.extend(perfect_number);
                    if self
                        .config
                        .max_assignments
                        .is_some_and(|max| summary.completed >= max)
                    {
                        break;
                    }
                }
                Ok(Step::Discarded { .. }) => {
                    backoff.reset();
                    summary.discarded += 1;
                }
                Ok(Step::Idle) => {
                    backoff.reset();
                    if self.config.exit_when_idle {
                        break;
                    }
                    debug!(wait_secs = self.config.idle_wait.as_secs(), "no work available");
                    self.pause(self.config.idle_wait);
                }
                Ok(Step::Stopped) => break,
                Err(WorkerError::Link(e)) if e.is_retryable() => {
                    let delay = backoff.next_delay();
                    summary.retries += 1;
                    warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "coordinator unavailable; backing off"
                    );
                    self.pause(delay);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            completed = summary.completed,
            discarded = summary.discarded,
            discoveries = summary.discoveries.len(),
            "worker stopped"
        );
        Ok(summary)
    }

    /// Obtains one assignment and sees it through.
    pub fn step(&mut self) -> WorkerResult<Step> {
        match self.next_assignment()? {
            Some(exponent) => self.work_on(exponent),
            None => Ok(Step::Idle),
        }
    }

    /// Resumable local work first, then a fresh lease.
    fn next_assignment(&self) -> WorkerResult<Option<Exponent>> {
        if let Some(exponent) = self.reclaim_checkpoint()? {
            return Ok(Some(exponent));
        }

        match self.link.request_assignment(&self.config.worker) {
            Ok(assignment) => {
                info!(
                    exponent = %assignment.exponent,
                    lease_secs = assignment.lease_duration.as_secs(),
                    "assignment received"
                );
                Ok(Some(assignment.exponent))
            }
            Err(e) if e.class() == ErrorClass::Exhausted => Ok(None),
            Err(e) if e.is_lease_already_active() => match e.held_lease() {
                Some(exponent) => {
                    // held from a run whose checkpoints are gone
                    info!(%exponent, "resuming lease held from an earlier run");
                    Ok(Some(exponent))
                }
                None => {
                    warn!(error = %e, "coordinator holds a lease for this worker but did not name it");
                    Ok(None)
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Finds a checkpoint whose lease is still ours, renewing it on the way.
    /// Checkpoints for leases we lost are deleted.
    fn reclaim_checkpoint(&self) -> WorkerResult<Option<Exponent>> {
        for exponent in self.checkpoints.list()? {
            let progress = match self.checkpoints.load(exponent) {
                Ok(Some(state)) => Progress::from_iterations(state.iteration, state.required_iterations()),
                Ok(None) => continue,
                Err(EngineError::CorruptCheckpoint { reason, .. }) => {
                    warn!(%exponent, %reason, "discarding corrupt checkpoint");
                    self.checkpoints.remove(exponent)?;
                    Progress::ZERO
                }
                Err(e) => return Err(e.into()),
            };

            match self
                .link
                .report_progress(&self.config.worker, exponent, progress.as_percent())
            {
                Ok(_) => {
                    info!(%exponent, %progress, "resuming leased candidate");
                    return Ok(Some(exponent));
                }
                Err(e) if e.is_retryable() || matches!(e, LinkError::Unauthorized(_)) => {
                    return Err(e.into());
                }
                Err(e) => {
                    debug!(%exponent, error = %e, "dropping checkpoint for a lease we no longer hold");
                    self.checkpoints.remove(exponent)?;
                }
            }
        }
        Ok(None)
    }

    /// Resumes from the checkpoint on disk, or writes an iteration-0
    /// checkpoint first so a crash before the first interval still leaves
    /// something to pick up.
    fn start_run(&self, exponent: Exponent) -> WorkerResult<Run> {
        let resume = match self.checkpoints.load(exponent) {
            Ok(Some(state)) => state,
            Ok(None) => self.fresh_checkpoint(exponent)?,
            Err(EngineError::CorruptCheckpoint { reason, .. }) => {
                warn!(%exponent, %reason, "discarding corrupt checkpoint");
                self.fresh_checkpoint(exponent)?
            }
            Err(e) => return Err(e.into()),
        };

        match self.engine.run(exponent, Some(resume)) {
            Err(EngineError::CorruptCheckpoint { reason, .. }) => {
                warn!(%exponent, %reason, "checkpoint does not match; restarting");
                let fresh = self.fresh_checkpoint(exponent)?;
                Ok(self.engine.run(exponent, Some(fresh))?)
            }
            other => Ok(other?),
        }
    }

    fn fresh_checkpoint(&self, exponent: Exponent) -> WorkerResult<VerificationState> {
        let state = VerificationState::fresh(exponent, Timestamp::now());
        self.checkpoints.save(&state)?;
        Ok(state)
    }

    fn work_on(&self, exponent: Exponent) -> WorkerResult<Step> {
        let worker = self.config.worker.clone();
        let run = self.start_run(exponent)?;
        let reporter = Reporter::spawn(Arc::clone(&self.link), worker.clone(), exponent)
            .map_err(WorkerError::Spawn)?;
        let session = Instant::now();

        let mut outcome = None;
        for event in run {
            match event {
                EngineEvent::Checkpoint(state) => self.checkpoints.save(&state)?,
                EngineEvent::Progress(report) => {
                    info!(
                        %exponent,
                        progress = %report.progress,
                        eta_secs = report.eta.map(|eta| eta.as_secs()),
                        "verification progress"
                    );
                    reporter.publish(report);
                }
                EngineEvent::Cancelled { iteration } => {
                    info!(%exponent, iteration, "verification interrupted; checkpoint kept");
                    return Ok(Step::Stopped);
                }
                EngineEvent::Finished(done) => {
                    outcome = Some(done);
                    break;
                }
            }
            if reporter.lease_lost() {
                self.checkpoints.remove(exponent)?;
                return Ok(Step::Discarded {
                    exponent,
                    class: ErrorClass::Contention,
                });
            }
        }
        drop(reporter);

        let Some(outcome) = outcome else {
            return Ok(Step::Stopped);
        };
        info!(
            %exponent,
            witness = outcome.is_prime_witness,
            iterations = outcome.iterations,
            residue = %outcome.residue64(),
            "verification finished"
        );

        let verdict = outcome.into_verdict(worker, session.elapsed());
        match self.submit(&verdict)? {
            Submission::Accepted(accepted) => {
                self.checkpoints.remove(exponent)?;
                if let Some(perfect) = accepted.perfect_number {
                    info!(
                        %exponent,
                        digits = perfect.digit_count,
                        "discovered a perfect number"
                    );
                }
                Ok(Step::Completed {
                    exponent,
                    sequence: accepted.sequence,
                    perfect_number: accepted.perfect_number,
                })
            }
            Submission::Refused(e) => {
                warn!(%exponent, error = %e, "verdict refused; discarding");
                self.checkpoints.remove(exponent)?;
                Ok(Step::Discarded {
                    exponent,
                    class: e.class(),
                })
            }
            Submission::Abandoned => Ok(Step::Stopped),
        }
    }

    /// Submits, retrying transport and availability failures until the
    /// coordinator answers or the worker is stopped.
    fn submit(&self, verdict: &Verdict) -> WorkerResult<Submission> {
        let mut backoff = Backoff::new(self.config.backoff);
        loop {
            match self.link.submit_verdict(verdict) {
                Ok(accepted) => return Ok(Submission::Accepted(accepted)),
                Err(e @ LinkError::Unauthorized(_)) => return Err(e.into()),
                Err(e) if e.is_retryable() => {
                    if self.stopped() {
                        warn!(exponent = %verdict.exponent, "stopping with an unsubmitted verdict");
                        return Ok(Submission::Abandoned);
                    }
                    let delay = backoff.next_delay();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "submit failed; retrying");
                    self.pause(delay);
                }
                Err(e) if e.class().discards_assignment() => return Ok(Submission::Refused(e)),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }
}
