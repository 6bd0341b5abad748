//! Worker error types.

use perfectnet::CoordinatorError;
use perfectnet_client::{ClientError, ErrorCode};
use perfectnet_engine::EngineError;
use perfectnet_types::{ErrorClass, Exponent};
use thiserror::Error;

/// Result type for link calls.
pub type LinkResult<T> = Result<T, LinkError>;

/// Result type for the driver.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Why a call to the coordinator failed.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The coordinator answered and said no.
    #[error("coordinator refused ({class:?}): {message}")]
    Rejected {
        class: ErrorClass,
        code: Option<ErrorCode>,
        message: String,
        /// Set when the refusal is `LeaseAlreadyActive`.
        held_lease: Option<Exponent>,
    },

    /// The coordinator could not be reached or the stream broke.
    #[error("coordinator unreachable: {0}")]
    Transport(String),

    /// Credentials were refused. Retrying will not help.
    #[error("not authorized: {0}")]
    Unauthorized(String),
}

impl LinkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LinkError::Rejected { class, .. } => *class,
            LinkError::Transport(_) => ErrorClass::Internal,
            LinkError::Unauthorized(_) => ErrorClass::Data,
        }
    }

    /// Whether the same call may succeed later: broken transport, a
    /// degraded coordinator, or a busy server.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Transport(_) => true,
            LinkError::Rejected { class, .. } => {
                matches!(class, ErrorClass::Durability | ErrorClass::Internal)
            }
            LinkError::Unauthorized(_) => false,
        }
    }

    pub fn is_lease_already_active(&self) -> bool {
        matches!(
            self,
            LinkError::Rejected {
                code: Some(ErrorCode::LeaseAlreadyActive),
                ..
            }
        )
    }

    /// The candidate the coordinator says this worker already holds.
    pub fn held_lease(&self) -> Option<Exponent> {
        match self {
            LinkError::Rejected { held_lease, .. } => *held_lease,
            _ => None,
        }
    }
}

impl From<ClientError> for LinkError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::HandshakeFailed(message) => LinkError::Unauthorized(message),
            ClientError::Server {
                code: ErrorCode::AuthenticationFailed | ErrorCode::Forbidden,
                message,
                ..
            } => LinkError::Unauthorized(message),
            ClientError::Server {
                code,
                message,
                held_lease,
            } => LinkError::Rejected {
                class: code.class(),
                code: Some(code),
                message,
                held_lease,
            },
            other => LinkError::Transport(other.to_string()),
        }
    }
}

impl From<CoordinatorError> for LinkError {
    fn from(e: CoordinatorError) -> Self {
        let code = e.as_kernel().map(|k| match k {
            perfectnet::KernelError::LeaseAlreadyActive { .. } => ErrorCode::LeaseAlreadyActive,
            perfectnet::KernelError::UnknownLease { .. } => ErrorCode::UnknownLease,
            perfectnet::KernelError::LeaseNotOwned { .. } => ErrorCode::LeaseNotOwned,
            perfectnet::KernelError::AlreadyRecorded(_) => ErrorCode::AlreadyRecorded,
            perfectnet::KernelError::NoWorkAvailable => ErrorCode::NoWorkAvailable,
            _ => ErrorCode::InvalidRequest,
        });
        let held_lease = match e.as_kernel() {
            Some(perfectnet::KernelError::LeaseAlreadyActive { exponent, .. }) => *exponent,
            _ => None,
        };
        LinkError::Rejected {
            class: e.class(),
            code,
            message: e.to_string(),
            held_lease,
        }
    }
}

/// Errors that stop the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("failed to start reporter thread: {0}")]
    Spawn(#[source] std::io::Error),
}
