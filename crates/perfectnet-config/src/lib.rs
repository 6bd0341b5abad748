//! Layered configuration for the `perfectnet` coordinator and worker.
//!
//! Values are merged from, lowest precedence first:
//!
//! | Layer | Example |
//! |---|---|
//! | built-in defaults | [`PerfectNetConfig::default`] |
//! | per-user file | `~/.config/perfectnet/config.toml` |
//! | project file | [`PROJECT_FILE`] |
//! | local overrides, not checked in | [`LOCAL_FILE`] |
//! | environment | `PERFECTNET_WORKER__SERVER_ADDR=10.0.0.5:7420` |
//!
//! Command-line flags are applied on top by the CLI. Environment keys use
//! `__` between nesting levels, so the example above sets
//! `worker.server_addr`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{LOCAL_FILE, PROJECT_FILE, Paths};

const MASK: &str = "********";

/// Everything `perfectnet serve` and `perfectnet work` read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfectNetConfig {
    pub coordinator: CoordinatorSection,
    pub worker: WorkerSection,
}

/// Settings for `perfectnet serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub bind_addr: String,
    /// HTTP sidecar address. Unset disables the sidecar.
    pub http_addr: Option<String>,
    pub data_dir: PathBuf,
    pub lease: LeaseSection,
    /// Seconds between expiry sweeps. Zero disables the sweeper.
    pub sweep_interval_secs: u64,
    pub reclaim_priority: u32,
    /// Journal records between snapshots. Zero disables compaction.
    pub compact_every: u64,
    pub max_connections: usize,
    pub idle_timeout_secs: u64,
    pub admin_token: Option<String>,
    pub require_api_keys: bool,
    /// Prime exponents in this range are queued at startup.
    pub seed: Option<SeedRange>,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7420".to_string(),
            http_addr: None,
            data_dir: PathBuf::from(".perfectnet/data"),
            lease: LeaseSection::default(),
            sweep_interval_secs: 60,
            reclaim_priority: 150,
            compact_every: 1000,
            max_connections: 1024,
            idle_timeout_secs: 300,
            admin_token: None,
            require_api_keys: false,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSection {
    pub standard_secs: u64,
    pub large_secs: u64,
    /// Exponents at or above this get `large_secs`.
    pub large_exponent_threshold: u64,
    pub max_per_worker: usize,
}

impl Default for LeaseSection {
    fn default() -> Self {
        Self {
            standard_secs: 24 * 3600,
            large_secs: 72 * 3600,
            large_exponent_threshold: 10_000,
            max_per_worker: 1,
        }
    }
}

/// Inclusive exponent range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRange {
    pub start: u64,
    pub end: u64,
}

/// Settings for `perfectnet work`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub server_addr: String,
    pub worker_id: Option<String>,
    pub api_key: Option<String>,
    pub checkpoint_dir: PathBuf,
    /// Lucas-Lehmer iterations between checkpoints.
    pub checkpoint_interval: u64,
    pub progress_interval_secs: u64,
    pub idle_wait_secs: u64,
    pub backoff: BackoffSection,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7420".to_string(),
            worker_id: None,
            api_key: None,
            checkpoint_dir: PathBuf::from(".perfectnet/checkpoints"),
            checkpoint_interval: 10_000,
            progress_interval_secs: 300,
            idle_wait_secs: 30,
            backoff: BackoffSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSection {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            initial_ms: 1000,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl CoordinatorSection {
    /// `None` when the sweeper is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl WorkerSection {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_secs(self.idle_wait_secs)
    }
}

impl PerfectNetConfig {
    /// Every layer that applies to `project_dir`.
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Anchors relative directories at `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.coordinator.data_dir.is_relative() {
            self.coordinator.data_dir = base.join(&self.coordinator.data_dir);
        }

        if self.worker.checkpoint_dir.is_relative() {
            self.worker.checkpoint_dir = base.join(&self.worker.checkpoint_dir);
        }
    }

    /// Rejects values no component could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.coordinator;
        parse_addr("coordinator.bind_addr", &c.bind_addr)?;
        if let Some(http) = &c.http_addr {
            parse_addr("coordinator.http_addr", http)?;
        }
        if c.lease.standard_secs == 0 || c.lease.large_secs == 0 {
            return Err(invalid("lease durations must be positive"));
        }
        if c.lease.max_per_worker == 0 {
            return Err(invalid("coordinator.lease.max_per_worker must be at least 1"));
        }
        if c.max_connections == 0 {
            return Err(invalid("coordinator.max_connections must be at least 1"));
        }
        if let Some(seed) = c.seed {
            if seed.start > seed.end {
                return Err(invalid(format!(
                    "coordinator.seed start {} is past end {}",
                    seed.start, seed.end
                )));
            }
        }

        let b = &self.worker.backoff;
        if b.initial_ms == 0 || b.max_ms < b.initial_ms {
            return Err(invalid("worker.backoff needs 0 < initial_ms <= max_ms"));
        }
        if b.multiplier.is_nan() || b.multiplier < 1.0 {
            return Err(invalid("worker.backoff.multiplier must be at least 1"));
        }
        if !(0.0..=1.0).contains(&b.jitter) {
            return Err(invalid("worker.backoff.jitter must be within 0..=1"));
        }
        if self.worker.progress_interval_secs == 0 {
            return Err(invalid("worker.progress_interval_secs must be positive"));
        }
        Ok(())
    }

    /// A copy safe to display: the admin token and API key are masked.
    pub fn masked(&self) -> Self {
        let mut shown = self.clone();
        if shown.coordinator.admin_token.is_some() {
            shown.coordinator.admin_token = Some(MASK.to_string());
        }
        if shown.worker.api_key.is_some() {
            shown.worker.api_key = Some(MASK.to_string());
        }
        shown
    }

    /// The effective configuration as TOML, as `perfectnet config show`
    /// prints it. Secrets are masked.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&self.masked())?)
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| invalid(format!("{field} = {value:?} is not a socket address: {e}")))
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
