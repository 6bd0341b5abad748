use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use num_bigint::BigUint;
use num_traits::Zero;
use perfectnet_arith::{MersenneModulus, perfect_number, residue64, sieve};
use perfectnet_types::{
    Exponent, PerfectNumber, Progress, Residue64, Timestamp, Verdict, WorkerId,
};
use tracing::debug;

use crate::{Result, VerificationState};

/// How often a run stops to hand out checkpoints and progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Iterations between checkpoints. Zero disables checkpoints.
    pub checkpoint_interval: u64,
    /// Wall time between progress reports.
    pub progress_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10_000,
            progress_interval: Duration::from_secs(300),
        }
    }
}

/// Something the driver of a [`Run`] may want to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Persist this before pulling the next event.
    Checkpoint(VerificationState),
    Progress(ProgressReport),
    /// The stop flag was raised. Iterations after the last checkpoint are lost.
    Cancelled { iteration: u64 },
    Finished(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub exponent: Exponent,
    pub iteration: u64,
    pub required: u64,
    pub progress: Progress,
    /// `None` until at least one iteration ran in this session.
    pub eta: Option<Duration>,
}

/// The result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub exponent: Exponent,
    /// Total Lucas-Lehmer iterations, counting any resumed prefix.
    pub iterations: u64,
    pub is_prime_witness: bool,
    pub final_residue: BigUint,
    /// Present iff `is_prime_witness`.
    pub perfect_number: Option<PerfectNumber>,
    pub started_at: Timestamp,
}

impl Outcome {
    pub fn residue64(&self) -> Residue64 {
        residue64(&self.final_residue)
    }

    pub fn into_verdict(self, worker: WorkerId, elapsed: Duration) -> Verdict {
        Verdict {
            exponent: self.exponent,
            worker,
            is_prime_witness: self.is_prime_witness,
            residue: self.residue64(),
            elapsed,
        }
    }
}

/// Runs Lucas-Lehmer tests.
#[derive(Debug, Clone, Default)]
pub struct VerificationEngine {
    config: EngineConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl VerificationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Stops every run started by this engine once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts (or resumes) the test of `2^p - 1`.
    ///
    /// A resumed state is validated first; anything inconsistent is
    /// reported as `CorruptCheckpoint` and the caller should start over
    /// with `resume_from = None`.
    pub fn run(
        &self,
        exponent: Exponent,
        resume_from: Option<VerificationState>,
    ) -> Result<Run> {
        let modulus = MersenneModulus::new(exponent)?;
        let state = match resume_from {
            Some(state) => {
                state.validate_against(&modulus)?;
                debug!(%exponent, iteration = state.iteration, "resuming verification");
                state
            }
            None => VerificationState::fresh(exponent, Timestamp::now()),
        };

        let p = exponent.as_u64();
        let shortcut = if p == 2 {
            // M2 = 3 is prime, but the recurrence needs an odd prime p
            Some(Shortcut::Witness)
        } else if !sieve::is_prime(p) {
            Some(Shortcut::CompositeExponent)
        } else {
            None
        };

        let now = Instant::now();
        Ok(Run {
            required: exponent.required_iterations(),
            session_start_iteration: state.iteration,
            modulus,
            state,
            config: self.config,
            cancel: self.cancel.clone(),
            shortcut,
            session_start: now,
            last_progress: now,
            done: false,
        })
    }

    /// Runs to completion, ignoring checkpoints and progress.
    pub fn verify(&self, exponent: Exponent) -> Result<Outcome> {
        let run = Self::new(EngineConfig {
            checkpoint_interval: 0,
            progress_interval: Duration::MAX,
        })
        .run(exponent, None)?;
        Ok(run.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shortcut {
    Witness,
    CompositeExponent,
}

/// A lazily evaluated Lucas-Lehmer run.
#[derive(Debug)]
pub struct Run {
    modulus: MersenneModulus,
    state: VerificationState,
    required: u64,
    config: EngineConfig,
    cancel: Option<Arc<AtomicBool>>,
    shortcut: Option<Shortcut>,
    session_start: Instant,
    session_start_iteration: u64,
    last_progress: Instant,
    done: bool,
}

impl Run {
    pub fn state(&self) -> &VerificationState {
        &self.state
    }

    pub fn exponent(&self) -> Exponent {
        self.state.exponent
    }

    /// Drains the run and returns its outcome. Ignores cancellation.
    pub fn finish(mut self) -> Outcome {
        self.cancel = None;
        self.done = false;
        while let Some(event) = self.next() {
            if let EngineEvent::Finished(outcome) = event {
                return outcome;
            }
        }
        self.outcome()
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn outcome(&self) -> Outcome {
        let exponent = self.state.exponent;
        let (is_prime_witness, final_residue, iterations) = match self.shortcut {
            Some(Shortcut::Witness) => (true, BigUint::zero(), 0),
            Some(Shortcut::CompositeExponent) => (false, self.state.residue.clone(), 0),
            None => (
                self.state.residue.is_zero(),
                self.state.residue.clone(),
                self.state.iteration,
            ),
        };
        Outcome {
            exponent,
            iterations,
            is_prime_witness,
            final_residue,
            // the arithmetic cannot fail once the modulus exists
            perfect_number: if is_prime_witness {
                perfect_number(exponent).ok()
            } else {
                None
            },
            started_at: self.state.started_at,
        }
    }

    fn progress_report(&self, now: Instant) -> ProgressReport {
        let done_this_session = self.state.iteration - self.session_start_iteration;
        let elapsed = now.duration_since(self.session_start);
        let eta = remaining_time(
            elapsed,
            done_this_session,
            self.required - self.state.iteration,
        );
        ProgressReport {
            exponent: self.state.exponent,
            iteration: self.state.iteration,
            required: self.required,
            progress: Progress::from_iterations(self.state.iteration, self.required),
            eta,
        }
    }
}

/// Extrapolates this session's rate over the remaining iterations. `None`
/// before the first iteration, or when the estimate does not fit a
/// [`Duration`].
fn remaining_time(elapsed: Duration, done: u64, remaining: u64) -> Option<Duration> {
    if done == 0 {
        return None;
    }
    let per_iteration = elapsed.as_secs_f64() / done as f64;
    Duration::try_from_secs_f64(per_iteration * remaining as f64).ok()
}

impl Iterator for Run {
    type Item = EngineEvent;

    fn next(&mut self) -> Option<EngineEvent> {
        if self.done {
            return None;
        }
        if self.shortcut.is_some() {
            self.done = true;
            return Some(EngineEvent::Finished(self.outcome()));
        }

        loop {
            if self.state.iteration >= self.required {
                self.done = true;
                return Some(EngineEvent::Finished(self.outcome()));
            }
            if self.cancelled() {
                self.done = true;
                return Some(EngineEvent::Cancelled {
                    iteration: self.state.iteration,
                });
            }

            self.state.residue = self.modulus.square_minus_two(&self.state.residue);
            self.state.iteration += 1;

            let interval = self.config.checkpoint_interval;
            if interval > 0
                && self.state.iteration % interval == 0
                && self.state.iteration < self.required
            {
                return Some(EngineEvent::Checkpoint(self.state.clone()));
            }

            let now = Instant::now();
            if now.duration_since(self.last_progress) >= self.config.progress_interval {
                self.last_progress = now;
                return Some(EngineEvent::Progress(self.progress_report(now)));
            }
        }
    }
}
