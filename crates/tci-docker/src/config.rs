use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tci_core::{Config, FrameworkError};
use tci_git::GitConfig;

/// On-disk configuration for the docker+overlay runner: the framework
/// config with the git cache settings and the overlay scratch area
/// inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    #[serde(flatten)]
    pub base: Config,
    pub git: GitConfig,
    /// Where the per-run overlay scratch directories are allocated.
    pub overlay_tempdir: PathBuf,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            base: Config::default(),
            git: GitConfig::default(),
            overlay_tempdir: PathBuf::from("/tmp"),
        }
    }
}

impl DockerConfig {
    /// Load and validate the runner configuration.
    pub fn load(path: &Path) -> Result<Self, FrameworkError> {
        let mut config: Self = Config::load_file(path)?;
        config.base.resolve_hostname()?;
        config
            .git
            .validate()
            .map_err(|e| FrameworkError::Config(e.to_string()))?;

        if !config.overlay_tempdir.is_absolute() {
            return Err(FrameworkError::Config(
                "overlay_tempdir must be absolute".to_string(),
            ));
        }

        Ok(config)
    }
}
