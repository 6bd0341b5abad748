//! Client error types.

use perfectnet_types::{ErrorClass, Exponent};
use perfectnet_wire::{ErrorCode, WireError};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// The coordinator answered with an error.
    #[error("server error ({code}): {message}")]
    Server {
        code: ErrorCode,
        message: String,
        held_lease: Option<Exponent>,
    },

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Response ID mismatch.
    #[error("response ID mismatch: expected {expected}, got {received}")]
    ResponseMismatch { expected: u64, received: u64 },

    /// Unexpected response type.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: &'static str, actual: String },
}

impl ClientError {
    /// The server's error code, if the server is what refused.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// For `LeaseAlreadyActive`, the candidate this worker already holds.
    pub fn held_lease(&self) -> Option<Exponent> {
        match self {
            ClientError::Server { held_lease, .. } => *held_lease,
            _ => None,
        }
    }

    /// How a caller should react. Transport and protocol trouble is
    /// `Internal`.
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Server { code, .. } => code.class(),
            _ => ErrorClass::Internal,
        }
    }

    /// True for failures where retrying on a fresh connection may help.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Wire(_))
    }
}
