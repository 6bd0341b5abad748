//! Session authentication.
//!
//! A connection starts anonymous. Its handshake may name a worker together
//! with that worker's API key, and may present the admin token. The
//! resulting [`Session`] is checked on every later request.

use perfectnet::Coordinator;
use perfectnet_types::WorkerId;
use perfectnet_wire::HandshakeRequest;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};

/// What a connection has proven about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub handshaken: bool,
    /// Worker whose API key was verified.
    pub worker: Option<WorkerId>,
    pub admin: bool,
}

/// Server-wide authentication rules.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    admin_token_hash: Option<[u8; 32]>,
    require_api_keys: bool,
}

impl AuthPolicy {
    pub fn new(admin_token: Option<&str>, require_api_keys: bool) -> Self {
        Self {
            admin_token_hash: admin_token.map(digest),
            require_api_keys,
        }
    }

    /// No admin token, no API keys.
    pub fn open() -> Self {
        Self::new(None, false)
    }

    pub fn require_api_keys(&self) -> bool {
        self.require_api_keys
    }

    /// Validates the credentials in a handshake.
    ///
    /// Credentials that are presented must be correct even when they are
    /// not required.
    pub fn authenticate(
        &self,
        handshake: &HandshakeRequest,
        coordinator: &Coordinator,
    ) -> ServerResult<Session> {
        let worker = match (&handshake.worker, &handshake.api_key) {
            (Some(worker), Some(key)) => {
                coordinator.authenticate(worker, key).map_err(|_| {
                    warn!(%worker, "API key rejected");
                    ServerError::Unauthorized(format!("invalid API key for {worker}"))
                })?;
                Some(worker.clone())
            }
            (None, Some(_)) => {
                return Err(ServerError::Unauthorized(
                    "API key given without a worker id".into(),
                ));
            }
            (_, None) => None,
        };

        let admin = match (&self.admin_token_hash, &handshake.admin_token) {
            (None, _) => true,
            (Some(expected), Some(token)) => {
                if digest(token) != *expected {
                    warn!("admin token rejected");
                    return Err(ServerError::Unauthorized("invalid admin token".into()));
                }
                true
            }
            (Some(_), None) => false,
        };

        debug!(worker = ?worker, admin, "session authenticated");
        Ok(Session {
            handshaken: true,
            worker,
            admin,
        })
    }

    /// Checks that `session` may act as `worker`.
    pub fn authorize_worker(&self, session: &Session, worker: &WorkerId) -> ServerResult<()> {
        match &session.worker {
            Some(authenticated) if authenticated == worker => Ok(()),
            Some(authenticated) => Err(ServerError::Unauthorized(format!(
                "session is authenticated as {authenticated}, not {worker}"
            ))),
            None if self.require_api_keys => Err(ServerError::Unauthorized(format!(
                "{worker} must authenticate with an API key"
            ))),
            None => Ok(()),
        }
    }

    pub fn authorize_admin(&self, session: &Session, op: &'static str) -> ServerResult<()> {
        if session.admin {
            Ok(())
        } else {
            Err(ServerError::Forbidden(op))
        }
    }
}

/// Hashing both sides keeps the comparison independent of where the
/// strings first differ.
fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}
