//! Serve command - runs the coordinator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use perfectnet::{
    Coordinator, CoordinatorConfig, Exponent, FileStore, FileStoreConfig, LeasePolicy, Priority,
    SystemClock,
};
use perfectnet_config::CoordinatorSection;
use perfectnet_server::{Server, ServerConfig};
use tracing::info;

use super::{load_config, parse_address, parse_range};

/// Flags that take precedence over the configuration files.
pub struct Overrides {
    pub bind: Option<String>,
    pub http: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub admin_token: Option<String>,
    pub seed: Option<String>,
}

pub fn run(project: &Path, overrides: Overrides) -> Result<()> {
    let mut section = load_config(project)?.coordinator;
    if let Some(data_dir) = overrides.data_dir {
        section.data_dir = data_dir;
    }
    if overrides.admin_token.is_some() {
        section.admin_token = overrides.admin_token;
    }

    let bind_addr = parse_address(overrides.bind.as_deref().unwrap_or(&section.bind_addr))?;
    let http_addr = overrides
        .http
        .as_deref()
        .or(section.http_addr.as_deref())
        .map(parse_address)
        .transpose()?;
    let seed = match overrides.seed.as_deref() {
        Some(range) => Some(parse_range(range)?),
        None => section.seed.map(|s| (s.start, s.end)),
    };

    info!("Starting PerfectNet coordinator...");
    println!();
    println!("PerfectNet - distributed search for perfect numbers");
    println!();
    println!("  Data directory: {}", section.data_dir.display());
    println!("  Bind address:   {bind_addr}");
    if let Some(http) = http_addr {
        println!("  HTTP sidecar:   http://{http}");
    }
    println!(
        "  Admin token:    {}",
        if section.admin_token.is_some() {
            "required"
        } else {
            "not set (every session is admin)"
        }
    );
    println!(
        "  API keys:       {}",
        if section.require_api_keys {
            "required"
        } else {
            "optional"
        }
    );

    let store = FileStore::new(
        FileStoreConfig::new(&section.data_dir).with_compact_every(section.compact_every),
    );
    let coordinator = Coordinator::open(
        CoordinatorConfig::default().with_policy(lease_policy(&section)),
        Box::new(store),
        Arc::new(SystemClock),
    )
    .context("Failed to open coordinator state")?;

    if let Some((start, end)) = seed {
        let added = coordinator
            .seed(start, end)
            .with_context(|| format!("Failed to seed {start}:{end}"))?;
        println!("  Seeded:         {added} new exponents from {start}..={end}");
    }

    let server_config = ServerConfig::new(bind_addr)
        .with_http_addr(http_addr)
        .with_max_connections(section.max_connections)
        .with_idle_timeout(section.idle_timeout())
        .with_sweep_interval(section.sweep_interval())
        .with_admin_token(section.admin_token.clone())
        .with_require_api_keys(section.require_api_keys);

    println!();
    println!("Coordinator is ready. Press Ctrl+C to stop.");
    println!();

    let mut server = Server::with_signal_handling(server_config, coordinator)
        .context("Failed to create server")?;
    server.run().context("Server error during operation")?;

    println!();
    println!("Coordinator stopped gracefully.");

    Ok(())
}

fn lease_policy(section: &CoordinatorSection) -> LeasePolicy {
    LeasePolicy {
        standard_duration: Duration::from_secs(section.lease.standard_secs),
        large_duration: Duration::from_secs(section.lease.large_secs),
        large_exponent_threshold: Exponent::new(section.lease.large_exponent_threshold),
        reclaim_priority: Priority::new(section.reclaim_priority),
        max_leases_per_worker: section.lease.max_per_worker,
    }
}
