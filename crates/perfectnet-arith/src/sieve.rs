//! Primality of exponents.
//!
//! `2^p - 1` can only be prime when `p` is prime, so both seeding and the
//! engine filter exponents first. Exponents fit in a machine word, so a
//! deterministic Miller-Rabin with `u128` intermediates decides single
//! values and a segmented sieve of Eratosthenes enumerates ranges.

use crate::{ArithError, Result};

/// Largest span [`primes_in_range`] will sieve in one call.
pub const MAX_RANGE_SPAN: u64 = 100_000_000;

// Sufficient for every n < 3.3e24, which covers u64.
const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Modular exponentiation with `u128` intermediates.
pub fn pow_mod(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let mut result: u64 = 1;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            result = (u128::from(result) * u128::from(base) % u128::from(modulus)) as u64;
        }
        exp >>= 1;
        base = (u128::from(base) * u128::from(base) % u128::from(modulus)) as u64;
    }
    result
}

/// Deterministic primality test for any `u64`.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for &small in &WITNESSES {
        if n == small {
            return true;
        }
        if n % small == 0 {
            return false;
        }
    }

    let mut d = n - 1;
    let mut r = 0;
    while d % 2 == 0 {
        d /= 2;
        r += 1;
    }

    'witness: for &a in &WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = (u128::from(x) * u128::from(x) % u128::from(n)) as u64;
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// All primes in `start..=end`, ascending.
pub fn primes_in_range(start: u64, end: u64) -> Result<Vec<u64>> {
    if end < start || end < 2 {
        return Ok(Vec::new());
    }
    let start = start.max(2);
    let span = end - start;
    if span >= MAX_RANGE_SPAN {
        return Err(ArithError::RangeTooLarge {
            start,
            end,
            max: MAX_RANGE_SPAN,
        });
    }

    let base = small_primes(isqrt(end));
    let mut composite = vec![false; (span + 1) as usize];
    for &q in &base {
        let mut multiple = (start.div_ceil(q) * q).max(q * q);
        while multiple <= end {
            composite[(multiple - start) as usize] = true;
            multiple += q;
        }
    }

    Ok(composite
        .iter()
        .enumerate()
        .filter(|(_, is_composite)| !**is_composite)
        .map(|(offset, _)| start + offset as u64)
        .collect())
}

fn small_primes(limit: u64) -> Vec<u64> {
    if limit < 2 {
        return Vec::new();
    }
    let mut composite = vec![false; (limit + 1) as usize];
    let mut primes = Vec::new();
    for n in 2..=limit {
        if composite[n as usize] {
            continue;
        }
        primes.push(n);
        let mut multiple = n * n;
        while multiple <= limit {
            composite[multiple as usize] = true;
            multiple += n;
        }
    }
    primes
}

fn isqrt(n: u64) -> u64 {
    let mut root = (n as f64).sqrt() as u64;
    while root.saturating_mul(root) > n {
        root -= 1;
    }
    while (root + 1).saturating_mul(root + 1) <= n {
        root += 1;
    }
    root
}
