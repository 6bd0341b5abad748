//! How a worker talks to its coordinator.
//!
//! The driver only needs three calls, so it is written against
//! [`CoordinatorLink`]. [`RemoteLink`] speaks the binary protocol and
//! reconnects after transport failures; [`LocalLink`] calls an in-process
//! [`Coordinator`] directly.

use std::sync::Mutex;

use perfectnet::Coordinator;
use perfectnet_client::{Client, ClientConfig, ClientError};
use perfectnet_types::{Assignment, Exponent, PerfectNumber, Timestamp, Verdict, WorkerId};
use tracing::{debug, info};

use crate::error::{LinkError, LinkResult};

/// An accepted verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub sequence: u64,
    pub perfect_number: Option<PerfectNumber>,
}

/// The coordinator calls a worker makes.
///
/// Implementations are shared between the driver and its reporter thread.
pub trait CoordinatorLink: Send + Sync {
    fn request_assignment(&self, worker: &WorkerId) -> LinkResult<Assignment>;

    /// Reports progress and renews the lease. Returns the new deadline.
    fn report_progress(
        &self,
        worker: &WorkerId,
        exponent: Exponent,
        percent: f64,
    ) -> LinkResult<Timestamp>;

    fn submit_verdict(&self, verdict: &Verdict) -> LinkResult<Accepted>;
}

// ============================================================================
// Remote
// ============================================================================

/// A link over TCP. Connects lazily and drops the connection whenever the
/// transport fails, so the next call starts fresh.
#[derive(Debug)]
pub struct RemoteLink {
    addr: String,
    config: ClientConfig,
    client: Mutex<Option<Client>>,
}

impl RemoteLink {
    pub fn new(addr: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            client: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn call<T>(&self, f: impl FnOnce(&mut Client) -> Result<T, ClientError>) -> LinkResult<T> {
        let mut slot = self
            .client
            .lock()
            .map_err(|_| LinkError::Transport("link lock poisoned".into()))?;

        let client = match slot.as_mut() {
            Some(client) => client,
            None => {
                let client = Client::connect(self.addr.as_str(), self.config.clone())?;
                info!(addr = %self.addr, "connected to coordinator");
                slot.insert(client)
            }
        };

        f(client).map_err(|e| {
            if e.is_transport() {
                debug!(error = %e, "dropping broken connection");
                *slot = None;
            }
            e.into()
        })
    }
}

impl CoordinatorLink for RemoteLink {
    fn request_assignment(&self, worker: &WorkerId) -> LinkResult<Assignment> {
        self.call(|client| client.request_assignment(worker))
    }

    fn report_progress(
        &self,
        worker: &WorkerId,
        exponent: Exponent,
        percent: f64,
    ) -> LinkResult<Timestamp> {
        self.call(|client| client.report_progress(worker, exponent, percent))
    }

    fn submit_verdict(&self, verdict: &Verdict) -> LinkResult<Accepted> {
        self.call(|client| client.submit_verdict(verdict))
            .map(|response| Accepted {
                sequence: response.sequence,
                perfect_number: response.perfect_number,
            })
    }
}

// ============================================================================
// In-process
// ============================================================================

/// A link that calls a coordinator in the same process.
#[derive(Debug, Clone)]
pub struct LocalLink {
    coordinator: Coordinator,
}

impl LocalLink {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}

impl CoordinatorLink for LocalLink {
    fn request_assignment(&self, worker: &WorkerId) -> LinkResult<Assignment> {
        Ok(self.coordinator.request_assignment(worker)?)
    }

    fn report_progress(
        &self,
        worker: &WorkerId,
        exponent: Exponent,
        percent: f64,
    ) -> LinkResult<Timestamp> {
        Ok(self.coordinator.report_progress(worker, exponent, percent)?)
    }

    fn submit_verdict(&self, verdict: &Verdict) -> LinkResult<Accepted> {
        let record = self.coordinator.submit_verdict(verdict.clone())?;
        Ok(Accepted {
            sequence: record.sequence,
            perfect_number: record.perfect_number,
        })
    }
}
