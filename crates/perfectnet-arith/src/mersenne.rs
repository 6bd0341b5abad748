//! Reduction modulo `M(p) = 2^p - 1`.
//!
//! Since `2^p ≡ 1 (mod M(p))`, a value `x = hi·2^p + lo` is congruent to
//! `hi + lo`. Folding the high bits onto the low `p` bits until the value
//! fits in `p` bits replaces a full division. The only `p`-bit value that is
//! not fully reduced is `M(p)` itself, which maps to zero.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use perfectnet_types::{Exponent, Residue64};

use crate::{ArithError, Result};

/// The modulus `2^p - 1` with its fold mask precomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MersenneModulus {
    p: u64,
    // 2^p - 1 is both the modulus and the low-bits mask.
    modulus: BigUint,
}

impl MersenneModulus {
    pub fn new(exponent: Exponent) -> Result<Self> {
        let p = exponent.as_u64();
        if p < 2 {
            return Err(ArithError::ExponentTooSmall(p));
        }
        let modulus = (BigUint::one() << p) - 1u32;
        Ok(Self { p, modulus })
    }

    pub fn exponent(&self) -> Exponent {
        Exponent::new(self.p)
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// Returns true if `x` is a canonical residue, i.e. `x < 2^p - 1`.
    pub fn is_reduced(&self, x: &BigUint) -> bool {
        x < &self.modulus
    }

    /// Reduces `x` modulo `2^p - 1` by repeated folding.
    pub fn reduce(&self, mut x: BigUint) -> BigUint {
        while x.bits() > self.p {
            let high = &x >> self.p;
            x &= &self.modulus;
            x += high;
        }
        if x == self.modulus { BigUint::zero() } else { x }
    }

    /// One Lucas-Lehmer step: `(s^2 - 2) mod (2^p - 1)`.
    ///
    /// `s` must already be reduced. The subtraction wraps through the
    /// modulus so the result is never negative.
    pub fn square_minus_two(&self, s: &BigUint) -> BigUint {
        let squared = self.reduce(s * s);
        if squared.bits() > 1 {
            squared - 2u32
        } else {
            // squared is 0 or 1: borrow one modulus
            squared + &self.modulus - 2u32
        }
    }
}

/// Low 64 bits of a residue.
pub fn residue64(x: &BigUint) -> Residue64 {
    Residue64::new(x.iter_u64_digits().next().unwrap_or(0))
}
