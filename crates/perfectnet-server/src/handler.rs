//! Request handler that routes requests to the coordinator.

use perfectnet::{Coordinator, CoordinatorError, KernelError, Verdict};
use perfectnet_types::{Exponent, elapsed_from_secs};
use perfectnet_wire::{
    AdminRequest, ErrorCode, HandshakeResponse, PROTOCOL_VERSION, ProgressResponse, Request,
    RequestPayload, Response, ResponsePayload, UserInfo, VerdictResponse,
};
use tracing::{debug, instrument};

use crate::auth::{AuthPolicy, Session};
use crate::error::{ServerError, ServerResult};
use crate::metrics;

/// Handles requests by routing them to the appropriate coordinator
/// operations.
pub struct RequestHandler {
    coordinator: Coordinator,
    auth: AuthPolicy,
}

impl RequestHandler {
    pub fn new(coordinator: Coordinator, auth: AuthPolicy) -> Self {
        Self { coordinator, auth }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Handles a request and returns a response.
    #[instrument(skip_all, fields(request_id = request.id.0, op = request.payload.op_name()))]
    pub fn handle(&self, session: &mut Session, request: Request) -> Response {
        let request_id = request.id;
        metrics::record_request(request.payload.op_name());

        match self.handle_inner(session, request.payload) {
            Ok(payload) => Response::new(request_id, payload),
            Err(e) => {
                let (code, message) = error_to_wire(&e);
                metrics::record_error(code);
                debug!(%code, %message, "request failed");
                Response::error(request_id, code, message).with_held_lease(held_lease(&e))
            }
        }
    }

    fn handle_inner(
        &self,
        session: &mut Session,
        payload: RequestPayload,
    ) -> ServerResult<ResponsePayload> {
        let coordinator = &self.coordinator;
        match payload {
            RequestPayload::Handshake(req) => {
                if req.client_version != PROTOCOL_VERSION {
                    return Err(ServerError::UnsupportedVersion {
                        client: req.client_version,
                        server: PROTOCOL_VERSION,
                    });
                }
                *session = self.auth.authenticate(&req, coordinator)?;
                Ok(ResponsePayload::Handshake(HandshakeResponse {
                    server_version: PROTOCOL_VERSION,
                    authenticated: session.worker.is_some(),
                    admin: session.admin,
                }))
            }

            other if !session.handshaken => Err(ServerError::HandshakeRequired(other.op_name())),

            RequestPayload::RequestAssignment { worker } => {
                self.auth.authorize_worker(session, &worker)?;
                let assignment = coordinator.request_assignment(&worker)?;
                metrics::record_assignment();
                Ok(ResponsePayload::Assignment(assignment))
            }

            RequestPayload::ReportProgress {
                worker,
                exponent,
                percent,
            } => {
                self.auth.authorize_worker(session, &worker)?;
                let lease_expires_at = coordinator.report_progress(&worker, exponent, percent)?;
                metrics::record_progress();
                Ok(ResponsePayload::Progress(ProgressResponse { lease_expires_at }))
            }

            RequestPayload::SubmitVerdict(req) => {
                self.auth.authorize_worker(session, &req.worker)?;
                let elapsed =
                    elapsed_from_secs(req.elapsed_seconds).map_err(CoordinatorError::from)?;
                let record = coordinator.submit_verdict(Verdict {
                    exponent: req.exponent,
                    worker: req.worker,
                    is_prime_witness: req.is_prime_witness,
                    residue: req.residue,
                    elapsed,
                })?;
                metrics::record_verdict(record.is_discovery());
                Ok(ResponsePayload::Verdict(VerdictResponse {
                    accepted: true,
                    sequence: record.sequence,
                    perfect_number: record.perfect_number,
                }))
            }

            RequestPayload::Stats => Ok(ResponsePayload::Stats(coordinator.stats()?)),

            RequestPayload::Register { worker, rotate } => {
                if rotate && !session.admin && session.worker.as_ref() != Some(&worker) {
                    return Err(ServerError::Unauthorized(format!(
                        "rotating the key of {worker} needs its current key or the admin token"
                    )));
                }
                let key = coordinator.register_worker(&worker, rotate)?;
                Ok(ResponsePayload::Registered {
                    api_key: key.as_str().to_string(),
                })
            }

            RequestPayload::Discoveries => Ok(ResponsePayload::Discoveries(
                coordinator.list_discoveries()?,
            )),

            RequestPayload::Leaderboard { limit } => Ok(ResponsePayload::Leaderboard(
                coordinator
                    .leaderboard(limit as usize)?
                    .iter()
                    .map(UserInfo::from)
                    .collect(),
            )),

            RequestPayload::WorkerInfo { worker } => Ok(ResponsePayload::WorkerInfo(
                coordinator.user(&worker)?.as_ref().map(UserInfo::from),
            )),

            RequestPayload::Admin(admin) => {
                self.auth.authorize_admin(session, admin.op_name())?;
                self.handle_admin(admin)
            }
        }
    }

    fn handle_admin(&self, request: AdminRequest) -> ServerResult<ResponsePayload> {
        let coordinator = &self.coordinator;
        match request {
            AdminRequest::Enqueue { exponent, priority } => {
                coordinator.enqueue(exponent, priority)?;
                Ok(ResponsePayload::Enqueued)
            }
            AdminRequest::Seed { start, end } => {
                let added = coordinator.seed(start, end)?;
                Ok(ResponsePayload::Seeded {
                    added: added as u64,
                })
            }
            AdminRequest::Withdraw { exponent } => {
                coordinator.withdraw(exponent)?;
                Ok(ResponsePayload::Withdrawn)
            }
            AdminRequest::ReleaseWorker { worker } => Ok(ResponsePayload::Released {
                exponents: coordinator.release_worker(&worker)?,
            }),
            AdminRequest::Sweep => Ok(ResponsePayload::Swept {
                exponents: coordinator.sweep_expired()?,
            }),
            AdminRequest::RecentResults { limit } => Ok(ResponsePayload::RecentResults(
                coordinator.recent_results(limit as usize)?,
            )),
            AdminRequest::Leases => Ok(ResponsePayload::Leases(coordinator.active_leases()?)),
            AdminRequest::Users => Ok(ResponsePayload::Users(
                coordinator.users()?.iter().map(UserInfo::from).collect(),
            )),
        }
    }
}

/// Converts a server error to a wire error code and message.
pub(crate) fn error_to_wire(error: &ServerError) -> (ErrorCode, String) {
    let code = match error {
        ServerError::Coordinator(e) => coordinator_code(e),
        ServerError::HandshakeRequired(_) => ErrorCode::InvalidRequest,
        ServerError::UnsupportedVersion { .. } => ErrorCode::UnsupportedVersion,
        ServerError::Unauthorized(_) => ErrorCode::AuthenticationFailed,
        ServerError::Forbidden(_) => ErrorCode::Forbidden,
        ServerError::Io(_) | ServerError::BindFailed { .. } => ErrorCode::InternalError,
    };
    (code, error.to_string())
}

fn held_lease(error: &ServerError) -> Option<Exponent> {
    match error {
        ServerError::Coordinator(CoordinatorError::Kernel(KernelError::LeaseAlreadyActive {
            exponent,
            ..
        })) => *exponent,
        _ => None,
    }
}

fn coordinator_code(error: &CoordinatorError) -> ErrorCode {
    match error {
        CoordinatorError::Kernel(e) => match e {
            KernelError::DuplicateCandidate(_) => ErrorCode::DuplicateCandidate,
            KernelError::NotFound(_) => ErrorCode::NotFound,
            KernelError::InvalidExponent(_) | KernelError::InvalidVerdict(_) => {
                ErrorCode::InvalidVerdict
            }
            KernelError::NoWorkAvailable => ErrorCode::NoWorkAvailable,
            KernelError::LeaseAlreadyActive { .. } => ErrorCode::LeaseAlreadyActive,
            KernelError::UnknownLease { .. } => ErrorCode::UnknownLease,
            KernelError::LeaseNotOwned { .. } => ErrorCode::LeaseNotOwned,
            KernelError::AlreadyRecorded(_) => ErrorCode::AlreadyRecorded,
            KernelError::WorkerAlreadyRegistered(_) => ErrorCode::WorkerAlreadyRegistered,
            KernelError::InconsistentSnapshot(_) => ErrorCode::InternalError,
        },
        CoordinatorError::Invalid(_) | CoordinatorError::Arith(_) => ErrorCode::InvalidRequest,
        CoordinatorError::Unauthorized(_) => ErrorCode::AuthenticationFailed,
        CoordinatorError::Unavailable(_) | CoordinatorError::Storage(_) => ErrorCode::Unavailable,
        CoordinatorError::Io(_) | CoordinatorError::Internal(_) => ErrorCode::InternalError,
    }
}
