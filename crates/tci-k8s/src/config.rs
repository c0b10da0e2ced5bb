use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use tci_core::{Config, FrameworkError};
use tci_model::Resources;

/// On-disk configuration for the kubernetes runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sConfig {
    #[serde(flatten)]
    pub base: Config,
    /// Path to a kubeconfig; when unset the client is expected to run
    /// in-cluster.
    pub kubeconfig: Option<PathBuf>,
    pub namespace: String,
    pub max_concurrency: u32,
    /// Ceiling applied to per-run resource requests.
    pub max_resources: Resources,
}

impl K8sConfig {
    /// Load and validate the runner configuration. A namespace is
    /// mandatory; provide `default` if you really wish to run in the
    /// default namespace.
    pub fn load(path: &Path) -> Result<Self, FrameworkError> {
        let mut config: Self = Config::load_file(path)?;
        config.base.resolve_hostname()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&mut self) -> Result<(), FrameworkError> {
        if self.namespace.is_empty() {
            return Err(FrameworkError::Config(
                "the k8s runner requires a namespace; provide 'default' if you really wish to run in the default namespace".to_string(),
            ));
        }

        if self.max_concurrency == 0 {
            info!("max_concurrency not set; defaulting to 1");
            self.max_concurrency = 1;
        }

        self.max_resources
            .validate()
            .map_err(|e| FrameworkError::Config(e.to_string()))
    }
}
