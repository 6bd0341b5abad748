//! Verify command - runs one Lucas-Lehmer test locally.

use std::time::Instant;

use anyhow::{Context, Result, bail};
use perfectnet::Exponent;
use perfectnet_engine::{EngineConfig, VerificationEngine};

pub fn run(p: u64) -> Result<()> {
    let exponent = Exponent::new(p);
    if !exponent.is_valid() {
        bail!(
            "Exponent must be between {} and {}, got {p}",
            Exponent::MIN,
            Exponent::MAX
        );
    }

    let start = Instant::now();
    let outcome = VerificationEngine::new(EngineConfig::default())
        .verify(exponent)
        .with_context(|| format!("Failed to verify M{p}"))?;
    let elapsed = start.elapsed();

    println!("M{p} = 2^{p} - 1");
    match outcome.perfect_number {
        Some(perfect) => {
            println!("  Result:         prime");
            println!(
                "  Perfect number: 2^{} * (2^{p} - 1) ({} digits)",
                p - 1,
                perfect.digit_count
            );
        }
        None if outcome.iterations == 0 => {
            println!("  Result:         composite (exponent {p} is not prime)");
        }
        None => {
            println!("  Result:         composite");
            println!("  Residue:        {}", outcome.residue64());
        }
    }
    println!("  Iterations:     {}", outcome.iterations);
    println!("  Elapsed:        {}", super::format_duration(elapsed));

    Ok(())
}
