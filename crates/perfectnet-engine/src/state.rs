use num_bigint::BigUint;
use perfectnet_arith::MersenneModulus;
use perfectnet_types::{Exponent, Timestamp};

use crate::{EngineError, Result};

/// Progress of one Lucas-Lehmer run.
///
/// `residue` is the exact value of the recurrence after `iteration` steps,
/// always reduced modulo `2^p - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationState {
    pub exponent: Exponent,
    pub iteration: u64,
    pub residue: BigUint,
    pub started_at: Timestamp,
}

impl VerificationState {
    /// Iteration zero: `s = 4`.
    pub fn fresh(exponent: Exponent, started_at: Timestamp) -> Self {
        Self {
            exponent,
            iteration: 0,
            residue: BigUint::from(4u32),
            started_at,
        }
    }

    pub fn required_iterations(&self) -> u64 {
        self.exponent.required_iterations()
    }

    pub fn is_complete(&self) -> bool {
        self.iteration >= self.required_iterations()
    }

    /// Rejects state that could not have come from a correct run of
    /// `modulus`: wrong exponent, iteration past the end, or an unreduced
    /// residue.
    pub(crate) fn validate_against(&self, modulus: &MersenneModulus) -> Result<()> {
        let exponent = modulus.exponent();
        let corrupt = |reason: String| EngineError::CorruptCheckpoint { exponent, reason };

        if self.exponent != exponent {
            return Err(corrupt(format!(
                "checkpoint is for exponent {}",
                self.exponent
            )));
        }
        if self.iteration > self.required_iterations() {
            return Err(corrupt(format!(
                "iteration {} exceeds required {}",
                self.iteration,
                self.required_iterations()
            )));
        }
        if self.iteration == 0 && self.residue != BigUint::from(4u32) {
            return Err(corrupt("iteration 0 must hold the seed value 4".to_string()));
        }
        // s0 = 4 is not reduced for p = 2, but p = 2 never iterates
        if self.iteration > 0 && !modulus.is_reduced(&self.residue) {
            return Err(corrupt("residue is not reduced".to_string()));
        }
        Ok(())
    }
}
