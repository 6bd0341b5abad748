//! Work command - contributes compute to a coordinator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use perfectnet::WorkerId;
use perfectnet_client::ClientConfig;
use perfectnet_config::WorkerSection;
use perfectnet_engine::EngineConfig;
use perfectnet_worker::{BackoffConfig, DriverConfig, RemoteLink, Worker};
use tracing::info;

use super::load_config;

/// Flags that take precedence over the configuration files.
pub struct Overrides {
    pub server: Option<String>,
    pub worker: Option<String>,
    pub api_key: Option<String>,
    pub checkpoint_dir: Option<PathBuf>,
    pub once: bool,
    pub exit_when_idle: bool,
}

pub fn run(project: &Path, overrides: Overrides) -> Result<()> {
    let mut section = load_config(project)?.worker;
    if let Some(server) = overrides.server {
        section.server_addr = server;
    }
    if overrides.worker.is_some() {
        section.worker_id = overrides.worker;
    }
    if overrides.api_key.is_some() {
        section.api_key = overrides.api_key;
    }
    if let Some(dir) = overrides.checkpoint_dir {
        section.checkpoint_dir = dir;
    }

    let Some(name) = section.worker_id.clone() else {
        bail!("No worker identity. Pass --worker <NAME> or set worker.worker_id in perfectnet.toml.");
    };
    let worker_id =
        WorkerId::new(name.as_str()).with_context(|| format!("Invalid worker name '{name}'"))?;

    let config = driver_config(&section, worker_id.clone())
        .with_max_assignments(overrides.once.then_some(1))
        .with_exit_when_idle(overrides.exit_when_idle);

    println!();
    println!("PerfectNet worker");
    println!();
    println!("  Worker:         {worker_id}");
    println!("  Coordinator:    {}", section.server_addr);
    println!("  Checkpoints:    {}", section.checkpoint_dir.display());
    println!();
    println!("Press Ctrl+C to stop; progress is checkpointed and resumed on restart.");
    println!();

    let link = RemoteLink::new(
        section.server_addr.clone(),
        ClientConfig::default().with_worker(worker_id, section.api_key.clone()),
    );
    let mut worker = Worker::new(config, Arc::new(link)).context("Failed to start worker")?;

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, worker.stop_flag())
                .context("Failed to install signal handler")?;
        }
    }

    let summary = worker.run().context("Worker failed")?;
    info!(completed = summary.completed, "worker exited");

    println!();
    println!("  Completed:      {}", summary.completed);
    println!("  Discarded:      {}", summary.discarded);
    println!("  Retries:        {}", summary.retries);
    for found in &summary.discoveries {
        println!(
            "  Discovery:      2^{} * (2^{} - 1) is perfect ({} digits)",
            found.exponent.as_u64() - 1,
            found.exponent,
            found.digit_count
        );
    }

    Ok(())
}

fn driver_config(section: &WorkerSection, worker: WorkerId) -> DriverConfig {
    DriverConfig::new(worker, &section.checkpoint_dir)
        .with_engine(EngineConfig {
            checkpoint_interval: section.checkpoint_interval,
            progress_interval: section.progress_interval(),
        })
        .with_idle_wait(section.idle_wait())
        .with_backoff(BackoffConfig {
            initial: Duration::from_millis(section.backoff.initial_ms),
            multiplier: section.backoff.multiplier,
            max: Duration::from_millis(section.backoff.max_ms),
            jitter: section.backoff.jitter,
        })
}
