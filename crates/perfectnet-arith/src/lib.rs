//! # perfectnet-arith: Exact arithmetic for Mersenne trials
//!
//! Everything the verification engine needs to decide `2^p - 1` with no
//! approximation anywhere in the recurrence:
//!
//! - [`MersenneModulus`]: reduction mod `2^p - 1` by masking and folding,
//!   and the Lucas-Lehmer step `s -> s^2 - 2`.
//! - [`perfect_number`]: the perfect number `2^(p-1) * (2^p - 1)` of a
//!   witness exponent and its exact decimal digit count.
//! - [`sieve`]: primality of exponents themselves. A composite `p` can never
//!   give a Mersenne prime, so seeding and workers skip them.

mod mersenne;
mod perfect;
pub mod sieve;

pub use mersenne::{MersenneModulus, residue64};
pub use num_bigint::BigUint;
pub use perfect::{decimal_digit_count, perfect_number, perfect_number_value};

/// Errors from arithmetic helpers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArithError {
    #[error("exponent must be at least 2, got {0}")]
    ExponentTooSmall(u64),

    #[error("range {start}..={end} spans more than {max} values")]
    RangeTooLarge { start: u64, end: u64, max: u64 },
}

pub type Result<T> = std::result::Result<T, ArithError>;
