//! Admin commands - operate a running coordinator over the wire protocol.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use perfectnet::{Exponent, FileStore, LeasePolicy, Priority, State, WorkerId, write_results_csv};
use perfectnet_client::{Client, ClientConfig, UserInfo};

use super::{format_duration, format_timestamp, load_config};

/// Where admin requests go and with which token.
pub struct Target {
    server: String,
    admin_token: Option<String>,
}

impl Target {
    /// Flags win over `worker.server_addr` and `coordinator.admin_token`.
    pub fn resolve(
        project: &Path,
        server: Option<String>,
        admin_token: Option<String>,
    ) -> Result<Self> {
        let config = load_config(project)?;
        Ok(Self {
            server: server.unwrap_or(config.worker.server_addr),
            admin_token: admin_token.or(config.coordinator.admin_token),
        })
    }

    fn connect(&self) -> Result<Client> {
        Client::connect(
            self.server.as_str(),
            ClientConfig::default().with_admin_token(self.admin_token.clone()),
        )
        .with_context(|| format!("Failed to connect to coordinator at {}", self.server))
    }
}

pub fn add_work(target: &Target, exponent: u64, priority: u32) -> Result<()> {
    target
        .connect()?
        .enqueue(Exponent::new(exponent), Priority::new(priority))
        .with_context(|| format!("Failed to queue M{exponent}"))?;
    println!("Queued M{exponent} at priority {priority}");
    Ok(())
}

pub fn add_range(target: &Target, start: u64, end: u64) -> Result<()> {
    if start > end {
        bail!("Range start {start} is past end {end}");
    }
    let added = target
        .connect()?
        .seed(start, end)
        .with_context(|| format!("Failed to seed {start}:{end}"))?;
    println!("Queued {added} new prime exponents from {start}..={end}");
    Ok(())
}

pub fn withdraw(target: &Target, exponent: u64) -> Result<()> {
    target
        .connect()?
        .withdraw(Exponent::new(exponent))
        .with_context(|| format!("Failed to withdraw M{exponent}"))?;
    println!("Withdrew M{exponent}");
    Ok(())
}

pub fn sweep(target: &Target) -> Result<()> {
    let reclaimed = target.connect()?.sweep().context("Sweep failed")?;
    if reclaimed.is_empty() {
        println!("No expired leases");
    } else {
        println!("Reclaimed {} expired leases: {}", reclaimed.len(), join(&reclaimed));
    }
    Ok(())
}

pub fn clear_worker(target: &Target, worker: &str) -> Result<()> {
    let worker = parse_worker(worker)?;
    let released = target
        .connect()?
        .release_worker(&worker)
        .with_context(|| format!("Failed to release leases held by {worker}"))?;
    if released.is_empty() {
        println!("{worker} holds no leases");
    } else {
        println!("Returned {} to the queue: {}", released.len(), join(&released));
    }
    Ok(())
}

pub fn register(target: &Target, worker: &str, rotate: bool) -> Result<()> {
    let worker = parse_worker(worker)?;
    let key = target
        .connect()?
        .register(&worker, rotate)
        .with_context(|| format!("Failed to register {worker}"))?;
    println!("API key for {worker}:");
    println!();
    println!("  {key}");
    println!();
    println!("It is shown only once. Pass it to `perfectnet work --api-key`.");
    Ok(())
}

pub fn stats(target: &Target) -> Result<()> {
    let stats = target.connect()?.stats().context("Failed to fetch stats")?;

    println!("PerfectNet Statistics");
    println!("=====================");
    println!();
    println!("  Queued:             {}", stats.queued);
    println!("  Active leases:      {}", stats.active_leases);
    println!("  Results:            {}", stats.results);
    println!("  Discoveries:        {}", stats.discoveries);
    println!("  Contributors:       {}", stats.users);
    println!("  Compute time:       {:.2} h", stats.compute_hours());
    println!("  Expired leases:     {}", stats.expired_total);
    println!("  Rejected verdicts:  {}", stats.rejected_verdicts);
    if stats.degraded {
        println!("  Status:             DEGRADED (not accepting writes)");
    }
    if !stats.recent_discoveries.is_empty() {
        println!();
        println!("Recent discoveries:");
        for found in &stats.recent_discoveries {
            println!("  M{} ({} digits)", found.exponent, found.digit_count);
        }
    }
    Ok(())
}

pub fn discoveries(target: &Target) -> Result<()> {
    let records = target
        .connect()?
        .discoveries()
        .context("Failed to fetch discoveries")?;
    if records.is_empty() {
        println!("No perfect numbers recorded yet");
        return Ok(());
    }

    println!(
        "{:>4}  {:>9}  {:>10}  {:<20}  {}",
        "#", "exponent", "digits", "found by", "recorded"
    );
    for (n, record) in records.iter().enumerate() {
        let digits = record.perfect_number.map_or(0, |p| p.digit_count);
        println!(
            "{:>4}  {:>9}  {:>10}  {:<20}  {}",
            n + 1,
            record.exponent(),
            digits,
            record.verdict.worker,
            format_timestamp(record.recorded_at)
        );
    }
    Ok(())
}

pub fn leases(target: &Target) -> Result<()> {
    let leases = target.connect()?.leases().context("Failed to fetch leases")?;
    if leases.is_empty() {
        println!("No active leases");
        return Ok(());
    }

    println!(
        "{:>9}  {:<20}  {:>8}  {:<23}  {}",
        "exponent", "worker", "progress", "last progress", "expires"
    );
    for lease in &leases {
        println!(
            "{:>9}  {:<20}  {:>8}  {:<23}  {}",
            lease.exponent,
            lease.worker,
            lease.progress.to_string(),
            format_timestamp(lease.last_progress_at),
            format_timestamp(lease.expires_at)
        );
    }
    Ok(())
}

pub fn users(target: &Target, top: Option<u32>) -> Result<()> {
    let mut client = target.connect()?;
    let users = match top {
        Some(limit) => client.leaderboard(limit),
        None => client.users(),
    }
    .context("Failed to fetch contributors")?;
    print_users(&users);
    Ok(())
}

fn print_users(users: &[UserInfo]) {
    if users.is_empty() {
        println!("No contributors yet");
        return;
    }

    println!(
        "{:<20}  {:>9}  {:>11}  {:>14}  {:>4}  {}",
        "worker", "completed", "discoveries", "compute", "key", "last active"
    );
    for user in users {
        println!(
            "{:<20}  {:>9}  {:>11}  {:>14}  {:>4}  {}",
            user.id,
            user.candidates_completed,
            user.discoveries,
            format_duration(user.compute_time),
            if user.has_api_key { "yes" } else { "no" },
            format_timestamp(user.last_active_at)
        );
    }
}

pub fn recent(target: &Target, limit: u32) -> Result<()> {
    let records = target
        .connect()?
        .recent_results(limit)
        .context("Failed to fetch recent results")?;
    if records.is_empty() {
        println!("No results recorded yet");
        return Ok(());
    }

    for record in &records {
        let verdict = &record.verdict;
        println!(
            "{}  M{:<9} {:<9} {}  {:<20}  {}",
            format_timestamp(record.recorded_at),
            verdict.exponent,
            if verdict.is_prime_witness {
                "prime"
            } else {
                "composite"
            },
            verdict.residue,
            verdict.worker,
            format_duration(verdict.elapsed)
        );
    }
    Ok(())
}

/// Reads the data directory directly, so it works with the coordinator
/// stopped. A running coordinator's journal is read as-is.
pub fn export(project: &Path, data_dir: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => load_config(project)?.coordinator.data_dir,
    };
    if !data_dir.is_dir() {
        bail!("Data directory '{}' does not exist", data_dir.display());
    }

    let snapshot = FileStore::read_snapshot(&data_dir)
        .with_context(|| format!("Failed to read '{}'", data_dir.display()))?;
    let state = State::restore(LeasePolicy::default(), snapshot)
        .context("Persisted state is inconsistent")?;

    let rows = match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create '{}'", path.display()))?;
            write_results_csv(state.ledger(), BufWriter::new(file))?
        }
        None => write_results_csv(state.ledger(), io::stdout().lock())?,
    };
    if let Some(path) = output {
        eprintln!("Exported {rows} results to {}", path.display());
    }
    io::stdout().flush()?;
    Ok(())
}

fn parse_worker(name: &str) -> Result<WorkerId> {
    WorkerId::new(name).with_context(|| format!("Invalid worker name '{name}'"))
}

fn join(exponents: &[Exponent]) -> String {
    exponents
        .iter()
        .map(|p| format!("M{p}"))
        .collect::<Vec<_>>()
        .join(", ")
}
