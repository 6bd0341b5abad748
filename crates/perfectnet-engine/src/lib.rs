//! # perfectnet-engine: Lucas-Lehmer verification with checkpoint/resume
//!
//! The engine decides whether `2^p - 1` is prime by running the recurrence
//! `s <- s^2 - 2 (mod 2^p - 1)` from `s = 4` exactly `p - 2` times.
//!
//! A run is a lazy [`Iterator`] of [`EngineEvent`]s. The arithmetic only
//! advances when the consumer pulls the next event, so whoever drives the run
//! decides what to do with checkpoints and progress reports (persist them,
//! send them over the network, ignore them) without the inner loop ever
//! blocking on I/O.
//!
//! ```
//! use perfectnet_engine::{EngineConfig, EngineEvent, VerificationEngine};
//! use perfectnet_types::Exponent;
//!
//! let engine = VerificationEngine::new(EngineConfig::default());
//! let outcome = engine.verify(Exponent::new(127)).unwrap();
//! assert!(outcome.is_prime_witness);
//! assert_eq!(outcome.iterations, 125);
//! ```
//!
//! Checkpoints live in a [`CheckpointStore`]: one CRC-framed file per
//! exponent, replaced atomically. Anything that fails validation surfaces as
//! [`EngineError::CorruptCheckpoint`] and the candidate restarts from zero.

pub mod bench;
mod checkpoint;
mod run;
mod state;


pub use checkpoint::{CheckpointStore, decode_checkpoint, encode_checkpoint};
pub use run::{EngineConfig, EngineEvent, Outcome, ProgressReport, Run, VerificationEngine};
pub use state::VerificationState;

use perfectnet_arith::ArithError;
use perfectnet_types::Exponent;

/// Errors from the verification engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Arith(#[from] ArithError),

    /// Saved state cannot be trusted; restart the candidate from iteration 0.
    #[error("corrupt checkpoint for exponent {exponent}: {reason}")]
    CorruptCheckpoint { exponent: Exponent, reason: String },

    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
