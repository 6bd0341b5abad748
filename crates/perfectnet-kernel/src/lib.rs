//! # perfectnet-kernel: Functional core of the `PerfectNet` scheduler
//!
//! The kernel owns every piece of coordinator state (the candidate queue,
//! the lease table and the result ledger) and changes it only through
//! commands. It receives a command and produces the new state plus the
//! effects the runtime must make durable.
//!
//! The kernel is deterministic. It does no I/O and reads no clock, since
//! every command carries its own `now`. It draws no random numbers either,
//! because API keys arrive already hashed. Replaying the same commands
//! always yields the same state.
//!
//! Pop-and-lease and expire-and-reinsert are each a single command, so a
//! runtime that applies commands one at a time can never hand out the same
//! candidate twice.
//!
//! [`queue`] holds priority-ordered candidates, [`lease`] the active leases
//! and duration policy, and [`ledger`] the accepted verdicts with their
//! per-worker aggregates. [`kernel::apply_committed`] folds one [`Command`]
//! into a [`State`] and reports the [`effects`] to persist.
//!
//! ## Example
//!
//! ```
//! use perfectnet_kernel::{Command, LeasePolicy, State, apply_committed};
//! use perfectnet_types::{Exponent, Priority, Timestamp, WorkerId};
//!
//! let now = Timestamp::from_secs(1_000);
//! let state = State::new(LeasePolicy::default());
//! let (state, _) = apply_committed(
//!     state,
//!     Command::Enqueue { exponent: Exponent::new(127), priority: Priority::new(1), now },
//! )
//! .unwrap();
//! let (state, effects) = apply_committed(
//!     state,
//!     Command::RequestAssignment { worker: WorkerId::new("alice").unwrap(), now },
//! )
//! .unwrap();
//! assert!(state.leases().get(Exponent::new(127)).is_some());
//! assert!(!effects.is_empty());
//! ```

pub mod command;
pub mod effects;
pub mod kernel;
pub mod lease;
pub mod ledger;
pub mod queue;
pub mod state;

#[cfg(test)]
mod tests;

pub use command::Command;
pub use effects::{AuditEvent, Effect};
pub use kernel::{KernelError, apply_committed, apply_committed_batch};
pub use lease::{Lease, LeasePolicy, LeaseStatus, LeaseTable};
pub use ledger::{ResultLedger, ResultRecord, User};
pub use queue::{CandidateQueue, QueueError, QueuedCandidate};
pub use state::{Snapshot, State};
