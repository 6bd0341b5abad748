//! Where configuration files live.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Git-tracked project configuration.
pub const PROJECT_FILE: &str = "perfectnet.toml";
/// Per-checkout overrides, kept out of version control.
pub const LOCAL_FILE: &str = "perfectnet.local.toml";

/// The configuration files that apply to one project directory.
#[derive(Debug, Clone)]
pub struct Paths {
    project_dir: PathBuf,
    user_config_dir: Option<PathBuf>,
}

impl Paths {
    /// Paths for `project_dir`, with the per-user directory from the
    /// platform conventions (`~/.config/perfectnet` on Linux).
    pub fn discover(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            user_config_dir: ProjectDirs::from("org", "PerfectNet", "perfectnet")
                .map(|dirs| dirs.config_dir().to_path_buf()),
        }
    }

    /// Like [`Paths::discover`] but never reads per-user configuration.
    pub fn project_only(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            user_config_dir: None,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// `None` on platforms without a home directory.
    pub fn user_config_file(&self) -> Option<PathBuf> {
        self.user_config_dir
            .as_ref()
            .map(|dir| dir.join("config.toml"))
    }

    pub fn project_config_file(&self) -> PathBuf {
        self.project_dir.join(PROJECT_FILE)
    }

    pub fn local_config_file(&self) -> PathBuf {
        self.project_dir.join(LOCAL_FILE)
    }

    /// Existing config files, lowest precedence first.
    pub fn layers(&self) -> Vec<PathBuf> {
        self.user_config_file()
            .into_iter()
            .chain([self.project_config_file(), self.local_config_file()])
            .filter(|path| path.is_file())
            .collect()
    }
}
