use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::GitError;

const DEFAULT_LOGIN_SCRIPT_PATH: &str = "/tmp/tinyci-github-login.sh";
const DEFAULT_BASE_REPO_PATH: &str = "/tmp/git";

/// Git-centric runner settings: where the login script lives and where
/// the repository cache grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub login_script_path: PathBuf,
    pub base_repo_path: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            login_script_path: PathBuf::from(DEFAULT_LOGIN_SCRIPT_PATH),
            base_repo_path: PathBuf::from(DEFAULT_BASE_REPO_PATH),
        }
    }
}

impl GitConfig {
    /// Correct or error out when the configuration doesn't match
    /// expectations: blank paths take the defaults, relative paths are
    /// refused.
    pub fn validate(&mut self) -> Result<(), GitError> {
        if self.login_script_path.as_os_str().is_empty() {
            self.login_script_path = PathBuf::from(DEFAULT_LOGIN_SCRIPT_PATH);
        }
        if !self.login_script_path.is_absolute() {
            return Err(GitError::Config(
                "login_script_path must be absolute".to_string(),
            ));
        }

        if self.base_repo_path.as_os_str().is_empty() {
            self.base_repo_path = PathBuf::from(DEFAULT_BASE_REPO_PATH);
        }
        if !self.base_repo_path.is_absolute() {
            return Err(GitError::Config(
                "base_repo_path must be absolute".to_string(),
            ));
        }

        Ok(())
    }
}
