//! Bench command - measures local Lucas-Lehmer throughput.

use anyhow::{Context, Result};
use perfectnet::Exponent;
use perfectnet_engine::bench::{BenchSuite, run_suite};

pub fn run(suite: BenchSuite, target: Option<u64>) -> Result<()> {
    println!("Running {suite:?} benchmark...");
    println!();

    let samples = run_suite(suite).context("Benchmark failed")?;

    println!(
        "{:>8}  {:>10}  {:>12}  {:>14}",
        "exponent", "iterations", "elapsed", "iterations/s"
    );
    for sample in &samples {
        println!(
            "{:>8}  {:>10}  {:>12}  {:>14.0}",
            sample.exponent,
            sample.iterations,
            super::format_duration(sample.elapsed),
            sample.iterations_per_sec()
        );
    }

    if let (Some(target), Some(largest)) = (target, samples.last()) {
        let estimate = largest.estimate(Exponent::new(target));
        println!();
        println!(
            "Estimated time for M{target}: {} (extrapolated from M{})",
            super::format_duration(estimate),
            largest.exponent
        );
    }

    Ok(())
}
