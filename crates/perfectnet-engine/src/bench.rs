//! Throughput benchmark over known Mersenne prime exponents.

use std::time::{Duration, Instant};

use perfectnet_types::Exponent;

use crate::{EngineConfig, Result, VerificationEngine};

/// A fixed set of exponents to time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchSuite {
    Quick,
    Medium,
    Large,
}

impl BenchSuite {
    pub fn exponents(self) -> &'static [u64] {
        match self {
            BenchSuite::Quick => &[127, 521, 607, 1279],
            BenchSuite::Medium => &[127, 521, 607, 1279, 2203, 2281],
            BenchSuite::Large => &[127, 521, 607, 1279, 2203, 2281, 3217],
        }
    }
}

/// Timing of one exponent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchSample {
    pub exponent: Exponent,
    pub iterations: u64,
    pub elapsed: Duration,
    pub is_prime_witness: bool,
}

impl BenchSample {
    pub fn iterations_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.iterations as f64 / secs
        } else {
            f64::INFINITY
        }
    }

    /// Extrapolated wall time for `target`.
    ///
    /// Scales by `p^2.585`: `p` iterations, each a Karatsuba squaring of a
    /// `p`-bit number.
    pub fn estimate(&self, target: Exponent) -> Duration {
        let ratio = target.as_u64() as f64 / self.exponent.as_u64() as f64;
        let secs = self.elapsed.as_secs_f64() * ratio.powf(2.585);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Runs every exponent of `suite` to completion and times it.
pub fn run_suite(suite: BenchSuite) -> Result<Vec<BenchSample>> {
    let engine = VerificationEngine::new(EngineConfig::default());
    suite
        .exponents()
        .iter()
        .map(|&p| {
            let start = Instant::now();
            let outcome = engine.verify(Exponent::new(p))?;
            Ok(BenchSample {
                exponent: outcome.exponent,
                iterations: outcome.iterations,
                elapsed: start.elapsed(),
                is_prime_witness: outcome.is_prime_witness,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_suite_confirms_every_exponent() {
        let samples = run_suite(BenchSuite::Quick).unwrap();
        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.is_prime_witness));
        assert_eq!(samples[0].iterations, 125);
    }

    #[test]
    fn estimate_scales_up() {
        let sample = BenchSample {
            exponent: Exponent::new(1000),
            iterations: 998,
            elapsed: Duration::from_secs(1),
            is_prime_witness: false,
        };
        assert!(sample.estimate(Exponent::new(2000)) > Duration::from_secs(5));
        assert_eq!(sample.estimate(Exponent::new(1000)), Duration::from_secs(1));
    }
}
