//! CLI command implementations.

pub mod admin;
pub mod bench;
pub mod config;
pub mod serve;
pub mod verify;
pub mod work;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use perfectnet::Timestamp;
use perfectnet_config::{ConfigLoader, PerfectNetConfig};

/// Loads the layered configuration rooted at `project`.
pub(crate) fn load_config(project: &Path) -> Result<PerfectNetConfig> {
    ConfigLoader::new()
        .with_project_dir(project)
        .load()
        .with_context(|| format!("Failed to load configuration from '{}'", project.display()))
}

/// Parses an address string into a `SocketAddr`.
///
/// Accepts:
/// - Port only: "7420" -> "127.0.0.1:7420"
/// - Full address: "0.0.0.0:7420"
/// - IPv6: `[::1]:7420`
pub(crate) fn parse_address(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(port) = address.parse::<u16>() {
        return Ok(SocketAddr::from(([127, 0, 0, 1], port)));
    }

    bail!(
        "Invalid address '{address}'. Use a port (e.g., '7420') or full address (e.g., '127.0.0.1:7420')"
    );
}

/// Parses `START:END` into an inclusive exponent range.
pub(crate) fn parse_range(range: &str) -> Result<(u64, u64)> {
    let Some((start, end)) = range.split_once(':') else {
        bail!("Invalid range '{range}'. Use START:END (e.g., '2:10000')");
    };
    let start: u64 = start
        .trim()
        .parse()
        .with_context(|| format!("Invalid range start in '{range}'"))?;
    let end: u64 = end
        .trim()
        .parse()
        .with_context(|| format!("Invalid range end in '{range}'"))?;
    if start > end {
        bail!("Range start {start} is past end {end}");
    }
    Ok((start, end))
}

pub(crate) fn format_timestamp(ts: Timestamp) -> String {
    i64::try_from(ts.as_secs())
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map_or_else(
            || ts.to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

/// `1h 02m 03s` style, dropping leading zero units.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}
