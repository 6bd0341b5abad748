//! # perfectnet-types: Core types for `PerfectNet`
//!
//! This crate contains shared types used across the `PerfectNet` system:
//! - Identifiers ([`Exponent`], [`WorkerId`])
//! - Scheduling values ([`Priority`], [`Progress`], [`Assignment`])
//! - Temporal types ([`Timestamp`], [`Clock`], [`SystemClock`], [`ManualClock`])
//! - Results ([`Verdict`], [`Residue64`], [`PerfectNumber`], [`Stats`])
//! - Error taxonomy ([`ErrorClass`])

use std::{
    fmt::{Debug, Display},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// A Mersenne exponent `p`; the candidate `2^p - 1` is what gets tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Exponent(u64);

impl Exponent {
    /// Smallest exponent with a meaningful Mersenne number (`M2 = 3`).
    pub const MIN: Exponent = Exponent(2);

    /// Largest exponent anything will schedule or accept a verdict for.
    pub const MAX: Exponent = Exponent(u32::MAX as u64);

    pub fn new(p: u64) -> Self {
        Self(p)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if the exponent lies in `MIN..=MAX`.
    pub fn is_valid(self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self)
    }

    /// Number of Lucas-Lehmer squarings needed to decide `2^p - 1`.
    ///
    /// ```
    /// # use perfectnet_types::Exponent;
    /// assert_eq!(Exponent::new(127).required_iterations(), 125);
    /// assert_eq!(Exponent::new(2).required_iterations(), 0);
    /// ```
    pub fn required_iterations(self) -> u64 {
        self.0.saturating_sub(2)
    }
}

impl Display for Exponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Exponent {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Exponent> for u64 {
    fn from(p: Exponent) -> Self {
        p.0
    }
}

/// Opaque worker identity.
///
/// Between 3 and 64 characters drawn from ASCII letters, digits, `_`, `-`
/// and `.`. Validated on construction and on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerId(String);

impl WorkerId {
    pub const MIN_LEN: usize = 3;
    pub const MAX_LEN: usize = 64;

    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.len() < Self::MIN_LEN || id.len() > Self::MAX_LEN {
            return Err(ValidationError::WorkerIdLength(id.len()));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(ValidationError::WorkerIdCharacter(bad));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkerId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for WorkerId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

// ============================================================================
// Scheduling Values
// ============================================================================

/// Queue priority. Higher values are served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Priority(u32);

impl Priority {
    /// Priority given to seeded exponents below 1000.
    pub const SMALL_SEED: Priority = Priority(100);
    /// Priority given to seeded exponents at or above 1000.
    pub const LARGE_SEED: Priority = Priority(50);
    /// Default floor for candidates returned to the queue after expiry.
    pub const RECLAIM: Priority = Priority(150);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Priority {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Priority> for u32 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// Completion of a verification run in basis points (0..=10_000).
///
/// Integral so that lease state stays `Eq` and replays exactly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Progress(u16);

impl Progress {
    pub const ZERO: Progress = Progress(0);
    pub const COMPLETE: Progress = Progress(10_000);

    /// Builds a progress value from a percentage in `[0, 100]`.
    pub fn from_percent(percent: f64) -> Result<Self, ValidationError> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(ValidationError::Percent(percent));
        }
        Ok(Self((percent * 100.0).round() as u16))
    }

    /// Progress of `done` iterations out of `required`. Zero work is complete.
    pub fn from_iterations(done: u64, required: u64) -> Self {
        if required == 0 || done >= required {
            return Self::COMPLETE;
        }
        let bp = u128::from(done) * 10_000 / u128::from(required);
        Self(bp as u16)
    }

    pub fn basis_points(self) -> u16 {
        self.0
    }

    pub fn as_percent(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// A lease handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub exponent: Exponent,
    pub expires_at: Timestamp,
    pub lease_duration: Duration,
}

// ============================================================================
// Temporal Types
// ============================================================================

/// Wall-clock instant with nanosecond resolution, counted from the Unix
/// epoch. Lease deadlines and ledger entries are stamped with these.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Whole seconds; the sub-second part is dropped.
    pub fn as_secs(self) -> u64 {
        self.0 / NANOS_PER_SEC
    }

    /// Reads the system clock. A clock set before 1970 reads as [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(Self::EPOCH, |since| {
                Self(u64::try_from(since.as_nanos()).unwrap_or(u64::MAX))
            })
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// Zero when `earlier` is actually later.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Display for Timestamp {
    /// `seconds.nanoseconds` since the epoch.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let since = Duration::from_nanos(self.0);
        write!(f, "{}.{:09}", since.as_secs(), since.subsec_nanos())
    }
}

/// Source of "now" for lease deadlines and sweeps.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(start.as_nanos())),
        }
    }

    pub fn set(&self, to: Timestamp) {
        self.nanos.store(to.as_nanos(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        // fetch_add would wrap; clamp instead
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_add(by))
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.nanos.load(Ordering::SeqCst))
    }
}

// ============================================================================
// Results
// ============================================================================

/// Low 64 bits of a final Lucas-Lehmer residue. Zero for a Mersenne prime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Residue64(u64);

impl Residue64 {
    pub const ZERO: Residue64 = Residue64(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Display for Residue64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl From<u64> for Residue64 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// The perfect number `2^(p-1) * (2^p - 1)` named by a witness exponent.
///
/// Only the exponent and the decimal digit count are kept; the value itself
/// is a pure function of `p` and is rebuilt on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerfectNumber {
    pub exponent: Exponent,
    pub digit_count: u64,
}

/// The outcome of one Lucas-Lehmer run as submitted by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub exponent: Exponent,
    pub worker: WorkerId,
    pub is_prime_witness: bool,
    pub residue: Residue64,
    pub elapsed: Duration,
}

impl Verdict {
    /// Checks internal consistency: a witness always ends on residue zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.exponent.is_valid() {
            return Err(ValidationError::Exponent(self.exponent.as_u64()));
        }
        if self.is_prime_witness && !self.residue.is_zero() {
            return Err(ValidationError::WitnessResidue(self.residue));
        }
        Ok(())
    }
}

/// Coordinator-wide counters, as served to workers and dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub queued: u64,
    pub active_leases: u64,
    pub users: u64,
    pub results: u64,
    pub discoveries: u64,
    /// Sum of accepted verdicts' elapsed time.
    pub compute_time: Duration,
    /// Leases reclaimed by the sweep since the coordinator started.
    pub expired_total: u64,
    /// Verdicts refused for ownership or duplication since start.
    pub rejected_verdicts: u64,
    pub degraded: bool,
    /// Newest discoveries first.
    pub recent_discoveries: Vec<PerfectNumber>,
}

impl Stats {
    pub fn compute_hours(&self) -> f64 {
        self.compute_time.as_secs_f64() / 3600.0
    }
}

/// Converts wire-level elapsed seconds into a duration.
pub fn elapsed_from_secs(secs: f64) -> Result<Duration, ValidationError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ValidationError::Elapsed(secs))
}

// ============================================================================
// Errors
// ============================================================================

/// Rejected input values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("worker id must be 3-64 characters, got {0}")]
    WorkerIdLength(usize),

    #[error("worker id contains invalid character {0:?}")]
    WorkerIdCharacter(char),

    #[error("percent must be within 0..=100, got {0}")]
    Percent(f64),

    #[error("exponent must be within 2..=4294967295, got {0}")]
    Exponent(u64),

    #[error("a prime witness must have residue zero, got {0}")]
    WitnessResidue(Residue64),

    #[error("elapsed seconds must be finite and non-negative, got {0}")]
    Elapsed(f64),
}

/// How a caller should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Stale or conflicting lease. Discard local state and ask for new work.
    Contention,
    /// Caller mistake or benign race. State is unchanged.
    Data,
    /// Nothing to hand out. Back off and retry.
    Exhausted,
    /// Worker-local state is unusable. Restart the candidate.
    Corruption,
    /// The coordinator could not persist. Nothing was acknowledged.
    Durability,
    /// Anything else: transport, protocol, internal.
    Internal,
}

impl ErrorClass {
    /// Whether a worker should drop its current assignment.
    pub fn discards_assignment(self) -> bool {
        matches!(self, ErrorClass::Contention | ErrorClass::Data)
    }
}
