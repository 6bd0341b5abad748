//! CSV export of accepted results.

use std::io::{self, Write};

use perfectnet_kernel::ResultLedger;

const HEADER: &str = "sequence,exponent,worker,is_prime_witness,residue,elapsed_seconds,digit_count,recorded_at";

/// Writes every accepted result, in acceptance order. Returns the row count.
///
/// Worker ids cannot contain commas or quotes, so no field needs escaping.
pub fn write_results_csv<W: Write>(ledger: &ResultLedger, mut out: W) -> io::Result<usize> {
    writeln!(out, "{HEADER}")?;
    let mut rows = 0;
    for record in ledger.results() {
        let verdict = &record.verdict;
        let digits = record
            .perfect_number
            .map(|perfect| perfect.digit_count.to_string())
            .unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{},{:.3},{},{}",
            record.sequence,
            verdict.exponent,
            verdict.worker,
            verdict.is_prime_witness,
            verdict.residue,
            verdict.elapsed.as_secs_f64(),
            digits,
            record.recorded_at.as_secs(),
        )?;
        rows += 1;
    }
    out.flush()?;
    Ok(rows)
}
