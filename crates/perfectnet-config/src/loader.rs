//! Merges defaults, files, and environment into one [`PerfectNetConfig`].

use crate::{ConfigError, Paths, PerfectNetConfig};
use config::{Config, Environment, File, FileFormat, Map};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Builder over the configuration layers.
///
/// Later layers win:
/// defaults < user file < `perfectnet.toml` < `perfectnet.local.toml` < env.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
    environment: Option<Map<String, String>>,
}

impl ConfigLoader {
    /// Loads relative to the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "PERFECTNET".to_string(),
            user_config: true,
            environment: None,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Reads variables from `vars` instead of the process environment.
    pub fn with_environment(mut self, vars: Map<String, String>) -> Self {
        self.environment = Some(vars);
        self
    }

    pub fn load(self) -> Result<PerfectNetConfig, ConfigError> {
        let paths = if self.user_config {
            Paths::discover(&self.project_dir)
        } else {
            Paths::project_only(&self.project_dir)
        };

        let mut builder =
            Config::builder().add_source(Config::try_from(&PerfectNetConfig::default())?);
        for layer in paths.layers() {
            debug!(file = %layer.display(), "reading configuration layer");
            builder = builder.add_source(File::from(layer).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.environment),
        );

        let mut loaded: PerfectNetConfig = builder.build()?.try_deserialize()?;
        loaded.resolve_paths(paths.project_dir());
        loaded.validate()?;
        Ok(loaded)
    }

    /// Falls back to defaults when any layer is unreadable or invalid.
    pub fn load_or_default(self) -> PerfectNetConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
