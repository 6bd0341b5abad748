//! Perfect numbers from witness exponents.

use std::f64::consts::LN_10;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use perfectnet_types::{Exponent, PerfectNumber};

use crate::{ArithError, Result};

// log10(2), enough digits that the estimate is off by at most one
const LOG10_2: f64 = 0.301_029_995_663_981_2;

// Accumulated f64 error in `(2p - 1) * log10(2)` stays below 1e-5 for any
// exponent up to `Exponent::MAX`.
const FRACTION_MARGIN: f64 = 1e-4;

/// The value `2^(p-1) * (2^p - 1)`.
///
/// Only meaningful as a perfect number when `2^p - 1` is prime; the
/// arithmetic itself does not care.
pub fn perfect_number_value(exponent: Exponent) -> Result<BigUint> {
    let p = exponent.as_u64();
    if p < 2 {
        return Err(ArithError::ExponentTooSmall(p));
    }
    let mersenne = (BigUint::one() << p) - 1u32;
    Ok(mersenne << (p - 1))
}

/// The perfect number named by `exponent`, with its exact digit count.
///
/// ```
/// # use perfectnet_arith::perfect_number;
/// # use perfectnet_types::Exponent;
/// assert_eq!(perfect_number(Exponent::new(127)).unwrap().digit_count, 77);
/// ```
pub fn perfect_number(exponent: Exponent) -> Result<PerfectNumber> {
    let digit_count = match estimated_digit_count(exponent) {
        Some(digits) => digits,
        None => decimal_digit_count(&perfect_number_value(exponent)?),
    };
    Ok(PerfectNumber {
        exponent,
        digit_count,
    })
}

/// Digit count of `2^(p-1) * (2^p - 1)` from logarithms alone.
///
/// `log10` of the value is `(2p - 1) log10(2) + log10(1 - 2^-p)`. `None`
/// when that lands too close to an integer for `f64` to settle the floor,
/// or when `p` is outside the range the error bound covers.
fn estimated_digit_count(exponent: Exponent) -> Option<u64> {
    if !exponent.is_valid() {
        return None;
    }
    let p = exponent.as_u64() as f64;
    let log10 = (2.0 * p - 1.0) * LOG10_2 + (-(-p).exp2()).ln_1p() / LN_10;
    let fraction = log10.fract();
    (FRACTION_MARGIN..1.0 - FRACTION_MARGIN)
        .contains(&fraction)
        .then(|| log10.floor() as u64 + 1)
}

/// Number of decimal digits in `n` (zero has one digit).
///
/// Starts from a `log10(2)` estimate of the bit length, then corrects
/// against exact powers of ten.
pub fn decimal_digit_count(n: &BigUint) -> u64 {
    if n.is_zero() {
        return 1;
    }
    let bits = n.bits();
    let estimate = ((bits - 1) as f64 * LOG10_2).floor() as u64 + 1;

    let mut digits = estimate.max(1);
    let mut power = BigUint::from(10u32).pow(digits as u32);
    while &power <= n {
        power *= 10u32;
        digits += 1;
    }
    while digits > 1 {
        let lower = &power / 10u32;
        if &lower > n {
            power = lower;
            digits -= 1;
        } else {
            break;
        }
    }
    digits
}
