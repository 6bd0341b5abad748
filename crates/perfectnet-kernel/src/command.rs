//! Commands accepted by the kernel. Every command carries its own `now`.

use perfectnet_types::{Exponent, PerfectNumber, Priority, Progress, Timestamp, Verdict, WorkerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Queue one candidate. Fails if it is queued, leased or completed.
    Enqueue {
        exponent: Exponent,
        priority: Priority,
        now: Timestamp,
    },

    /// Queue every candidate not already known. Never fails on duplicates.
    Seed {
        candidates: Vec<(Exponent, Priority)>,
        now: Timestamp,
    },

    /// Remove a queued candidate.
    Withdraw { exponent: Exponent },

    /// Pop the next candidate and lease it to `worker`.
    RequestAssignment { worker: WorkerId, now: Timestamp },

    /// Heartbeat: record progress and renew the lease.
    ReportProgress {
        worker: WorkerId,
        exponent: Exponent,
        progress: Progress,
        now: Timestamp,
    },

    /// Accept a verdict. `perfect_number` is derived by the caller and must
    /// be present iff the verdict is a witness.
    SubmitVerdict {
        verdict: Verdict,
        perfect_number: Option<PerfectNumber>,
        now: Timestamp,
    },

    /// Expire every lease whose deadline is before `now`.
    SweepExpired { now: Timestamp },

    /// Return every lease `worker` holds to the queue.
    ReleaseWorker { worker: WorkerId, now: Timestamp },

    /// Store the hash of a newly issued API key. Without `rotate`, a worker
    /// that already has a key is rejected.
    RegisterWorker {
        worker: WorkerId,
        key_hash: [u8; 32],
        rotate: bool,
        now: Timestamp,
    },
}
