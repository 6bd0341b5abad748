use std::net::SocketAddr;

use perfectnet::CoordinatorError;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// Failures of the server itself, and request failures that are reported
/// back to the client as an error response.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot listen on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("client sent {0} before completing the handshake")]
    HandshakeRequired(&'static str),

    #[error("unsupported client version {client}, server speaks {server}")]
    UnsupportedVersion { client: u16, server: u16 },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An admin operation on a session without the admin token.
    #[error("{0} requires the admin token")]
    Forbidden(&'static str),
}
