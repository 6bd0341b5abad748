//! # PerfectNet
//!
//! Coordinator for a distributed search for perfect numbers.
//!
//! Workers lease Mersenne exponents, run the Lucas-Lehmer test on
//! `2^p - 1`, and report verdicts. The coordinator hands each candidate to
//! at most one worker at a time, reclaims work from workers that go
//! silent, and records every accepted verdict durably.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Coordinator                        │
//! │  ┌──────────┐   ┌──────────────┐   ┌───────────────────┐  │
//! │  │  Clock   │ → │   Kernel     │ → │  Durable store    │  │
//! │  │  (now)   │   │ (pure FSM)   │   │ (journal+snapshot)│  │
//! │  └──────────┘   └──────────────┘   └───────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use perfectnet::{Coordinator, CoordinatorConfig, MemoryStore, SystemClock, WorkerId};
//!
//! let coordinator = Coordinator::open(
//!     CoordinatorConfig::default(),
//!     Box::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//! )
//! .unwrap();
//! coordinator.seed(2, 130).unwrap();
//!
//! let worker = WorkerId::new("alice").unwrap();
//! let assignment = coordinator.request_assignment(&worker).unwrap();
//! assert_eq!(assignment.exponent.as_u64(), 2);
//! ```

mod coordinator;
mod error;
mod export;
mod keys;
mod sweeper;


pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{CoordinatorError, Result};
pub use export::write_results_csv;
pub use keys::{ApiKey, hash_key};
pub use sweeper::ExpirySweeper;

// Re-export the layers callers need to name.
pub use perfectnet_kernel::{
    KernelError, Lease, LeasePolicy, LeaseStatus, ResultRecord, State, User,
};
pub use perfectnet_storage::{DurableStore, FileStore, FileStoreConfig, MemoryStore};
pub use perfectnet_types::{
    Assignment, Clock, ErrorClass, Exponent, ManualClock, PerfectNumber, Priority, Residue64,
    Stats, SystemClock, Timestamp, Verdict, WorkerId,
};
