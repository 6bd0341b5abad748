//! Request and response messages.

use bytes::Bytes;
use perfectnet_kernel::{Lease, ResultRecord, User};
use perfectnet_types::{
    Assignment, ErrorClass, Exponent, PerfectNumber, Priority, Residue64, Stats, Timestamp,
    WorkerId,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::WireResult;
use crate::frame::Frame;

/// Correlates a response with its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub payload: RequestPayload,
}

impl Request {
    pub fn new(id: RequestId, payload: RequestPayload) -> Self {
        Self { id, payload }
    }

    pub fn to_frame(&self) -> WireResult<Frame> {
        let payload = postcard::to_allocvec(self)?;
        Frame::new(Bytes::from(payload))
    }

    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPayload {
    Handshake(HandshakeRequest),
    /// Lease the next candidate for `worker`.
    RequestAssignment { worker: WorkerId },
    /// Heartbeat; renews the lease.
    ReportProgress {
        worker: WorkerId,
        exponent: Exponent,
        percent: f64,
    },
    SubmitVerdict(SubmitVerdictRequest),
    Stats,
    /// Issues an API key. `rotate` replaces an existing one and needs the
    /// admin token or the worker's current key.
    Register { worker: WorkerId, rotate: bool },
    Discoveries,
    Leaderboard { limit: u32 },
    WorkerInfo { worker: WorkerId },
    Admin(AdminRequest),
}

impl RequestPayload {
    /// Short name for logs and metrics labels.
    pub fn op_name(&self) -> &'static str {
        match self {
            RequestPayload::Handshake(_) => "handshake",
            RequestPayload::RequestAssignment { .. } => "request_assignment",
            RequestPayload::ReportProgress { .. } => "report_progress",
            RequestPayload::SubmitVerdict(_) => "submit_verdict",
            RequestPayload::Stats => "stats",
            RequestPayload::Register { .. } => "register",
            RequestPayload::Discoveries => "discoveries",
            RequestPayload::Leaderboard { .. } => "leaderboard",
            RequestPayload::WorkerInfo { .. } => "worker_info",
            RequestPayload::Admin(admin) => admin.op_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub client_version: u16,
    pub worker: Option<WorkerId>,
    pub api_key: Option<String>,
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitVerdictRequest {
    pub worker: WorkerId,
    pub exponent: Exponent,
    pub is_prime_witness: bool,
    pub residue: Residue64,
    pub elapsed_seconds: f64,
}

/// Operator requests. Refused unless the handshake presented the admin
/// token, when the coordinator has one configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminRequest {
    Enqueue {
        exponent: Exponent,
        priority: Priority,
    },
    Seed { start: u64, end: u64 },
    Withdraw { exponent: Exponent },
    ReleaseWorker { worker: WorkerId },
    Sweep,
    RecentResults { limit: u32 },
    Leases,
    Users,
}

impl AdminRequest {
    pub fn op_name(&self) -> &'static str {
        match self {
            AdminRequest::Enqueue { .. } => "admin_enqueue",
            AdminRequest::Seed { .. } => "admin_seed",
            AdminRequest::Withdraw { .. } => "admin_withdraw",
            AdminRequest::ReleaseWorker { .. } => "admin_release_worker",
            AdminRequest::Sweep => "admin_sweep",
            AdminRequest::RecentResults { .. } => "admin_recent_results",
            AdminRequest::Leases => "admin_leases",
            AdminRequest::Users => "admin_users",
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn new(request_id: RequestId, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    pub fn error(request_id: RequestId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ResponsePayload::Error(ErrorResponse {
                code,
                message: message.into(),
                held_lease: None,
            }),
        )
    }

    /// Names the candidate a `LeaseAlreadyActive` refusal is about. No-op
    /// on success responses.
    pub fn with_held_lease(mut self, exponent: Option<Exponent>) -> Self {
        if let ResponsePayload::Error(err) = &mut self.payload {
            err.held_lease = exponent;
        }
        self
    }

    pub fn to_frame(&self) -> WireResult<Frame> {
        let payload = postcard::to_allocvec(self)?;
        Frame::new(Bytes::from(payload))
    }

    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    Handshake(HandshakeResponse),
    Assignment(Assignment),
    Progress(ProgressResponse),
    Verdict(VerdictResponse),
    Stats(Stats),
    Registered { api_key: String },
    Discoveries(Vec<ResultRecord>),
    Leaderboard(Vec<UserInfo>),
    WorkerInfo(Option<UserInfo>),
    Enqueued,
    Seeded { added: u64 },
    Withdrawn,
    Released { exponents: Vec<Exponent> },
    Swept { exponents: Vec<Exponent> },
    RecentResults(Vec<ResultRecord>),
    Leases(Vec<Lease>),
    Users(Vec<UserInfo>),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub server_version: u16,
    /// A worker identity was verified against its API key.
    pub authenticated: bool,
    pub admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub lease_expires_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictResponse {
    pub accepted: bool,
    pub sequence: u64,
    pub perfect_number: Option<PerfectNumber>,
}

/// A user as shown to clients. The key hash never leaves the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: WorkerId,
    pub candidates_completed: u64,
    pub discoveries: u64,
    pub compute_time: Duration,
    pub registered_at: Timestamp,
    pub last_active_at: Timestamp,
    pub has_api_key: bool,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            candidates_completed: user.candidates_completed,
            discoveries: user.discoveries,
            compute_time: user.compute_time,
            registered_at: user.registered_at,
            last_active_at: user.last_active_at,
            has_api_key: user.key_hash.is_some(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    /// The lease the worker already holds, so a restarted worker can pick
    /// its candidate back up.
    pub held_lease: Option<Exponent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidRequest,
    UnsupportedVersion,
    AuthenticationFailed,
    /// The request needs the admin token.
    Forbidden,
    NoWorkAvailable,
    LeaseAlreadyActive,
    UnknownLease,
    LeaseNotOwned,
    AlreadyRecorded,
    DuplicateCandidate,
    NotFound,
    InvalidVerdict,
    WorkerAlreadyRegistered,
    /// The coordinator could not make the write durable.
    Unavailable,
    ServerBusy,
    InternalError,
}

impl ErrorCode {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorCode::LeaseAlreadyActive | ErrorCode::UnknownLease | ErrorCode::LeaseNotOwned => {
                ErrorClass::Contention
            }
            ErrorCode::InvalidRequest
            | ErrorCode::AuthenticationFailed
            | ErrorCode::Forbidden
            | ErrorCode::AlreadyRecorded
            | ErrorCode::DuplicateCandidate
            | ErrorCode::NotFound
            | ErrorCode::InvalidVerdict
            | ErrorCode::WorkerAlreadyRegistered => ErrorClass::Data,
            ErrorCode::NoWorkAvailable => ErrorClass::Exhausted,
            ErrorCode::Unavailable => ErrorClass::Durability,
            ErrorCode::UnsupportedVersion | ErrorCode::ServerBusy | ErrorCode::InternalError => {
                ErrorClass::Internal
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::UnsupportedVersion => "unsupported_version",
            ErrorCode::AuthenticationFailed => "authentication_failed",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NoWorkAvailable => "no_work_available",
            ErrorCode::LeaseAlreadyActive => "lease_already_active",
            ErrorCode::UnknownLease => "unknown_lease",
            ErrorCode::LeaseNotOwned => "lease_not_owned",
            ErrorCode::AlreadyRecorded => "already_recorded",
            ErrorCode::DuplicateCandidate => "duplicate_candidate",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidVerdict => "invalid_verdict",
            ErrorCode::WorkerAlreadyRegistered => "worker_already_registered",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::ServerBusy => "server_busy",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
