//! Effects produced by the kernel.
//!
//! Effects describe what the runtime must do after a command is applied.
//! Write/delete effects map one-to-one onto the four durable collections
//! (queue, leases, results, users); audit effects are only reported.

use perfectnet_types::{Exponent, Priority, Timestamp, WorkerId};
use serde::{Deserialize, Serialize};

use crate::{lease::Lease, ledger::ResultRecord, ledger::User, queue::QueuedCandidate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    // ========================================================================
    // Durable Effects
    // ========================================================================
    QueueWrite(QueuedCandidate),
    QueueDelete(Exponent),
    LeaseWrite(Lease),
    LeaseDelete(Exponent),
    ResultWrite(ResultRecord),
    UserWrite(User),

    // ========================================================================
    // Reporting
    // ========================================================================
    AuditLogAppend(AuditEvent),
}

impl Effect {
    /// Whether the effect must reach the durable store.
    pub fn is_durable(&self) -> bool {
        !matches!(self, Effect::AuditLogAppend(_))
    }

    pub fn as_lease_write(&self) -> Option<&Lease> {
        match self {
            Effect::LeaseWrite(lease) => Some(lease),
            _ => None,
        }
    }

    pub fn as_audit(&self) -> Option<&AuditEvent> {
        match self {
            Effect::AuditLogAppend(event) => Some(event),
            _ => None,
        }
    }
}

/// Noteworthy scheduler transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    CandidateEnqueued {
        exponent: Exponent,
        priority: Priority,
    },
    CandidateWithdrawn {
        exponent: Exponent,
    },
    LeaseGranted {
        exponent: Exponent,
        worker: WorkerId,
        expires_at: Timestamp,
    },
    LeaseRenewed {
        exponent: Exponent,
        worker: WorkerId,
        expires_at: Timestamp,
    },
    LeaseExpired {
        exponent: Exponent,
        worker: WorkerId,
        requeued_at: Priority,
    },
    LeaseReleased {
        exponent: Exponent,
        worker: WorkerId,
    },
    VerdictRecorded {
        exponent: Exponent,
        worker: WorkerId,
        is_prime_witness: bool,
        late: bool,
    },
    Discovery {
        exponent: Exponent,
        worker: WorkerId,
        digit_count: u64,
    },
    WorkerRegistered {
        worker: WorkerId,
        rotated: bool,
    },
}
