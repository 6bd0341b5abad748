//! # perfectnet-worker: the volunteer side of `PerfectNet`
//!
//! A [`Worker`] repeatedly leases a candidate, runs the Lucas-Lehmer test on
//! it, and submits the verdict:
//!
//! ```text
//! request_assignment ─► load checkpoint ─► engine events ─► submit_verdict
//!                          (corrupt: drop)     │    │          (then delete
//!                                              │    │           checkpoint)
//!                               save checkpoint┘    └► reporter thread
//!                                                      (lease heartbeats)
//! ```
//!
//! The engine runs on the calling thread. Progress goes through a one-slot
//! queue to a reporter thread, so a slow coordinator never stalls the
//! arithmetic. Checkpoints survive restarts: on startup the worker first
//! resumes any checkpointed candidate whose lease it still holds.
//!
//! Errors are handled by class:
//! - contention and data refusals discard the candidate and fetch new work
//! - an empty queue waits `idle_wait`
//! - transport and availability failures back off exponentially with jitter
//!
//! The coordinator is reached through a [`CoordinatorLink`]: [`RemoteLink`]
//! over TCP or [`LocalLink`] in-process.

mod backoff;
mod driver;
mod error;
mod link;
mod reporter;

#[cfg(test)]
mod tests;

pub use backoff::{Backoff, BackoffConfig};
pub use driver::{DriverConfig, Step, Summary, Worker};
pub use error::{LinkError, LinkResult, WorkerError, WorkerResult};
pub use link::{Accepted, CoordinatorLink, LocalLink, RemoteLink};
pub use reporter::Reporter;
