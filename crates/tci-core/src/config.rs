use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use tci_client::CertConfig;
use tci_observe::LoggerConfig;

use crate::error::FrameworkError;

/// Framework-level portion of a runner's on-disk YAML configuration.
///
/// Executor configs wrap this with `#[serde(flatten)]` and add their
/// own keys next to it; see the docker and kubernetes runners.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier for this runner; defaults to the machine hostname.
    pub hostname: String,
    /// Name of the queue the runner listens on.
    #[serde(rename = "queue")]
    pub queue_name: String,
    pub clients: ClientConfig,
    pub log: LoggerConfig,
}

/// Addresses of the services runners typically use. These are
/// `host:port` pairs, not URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub tls: CertConfig,
    pub assetsvc: String,
    pub queuesvc: String,
    pub logsvc: String,
}

impl Config {
    /// Load a full runner configuration (this type or a wrapper around
    /// it) from a YAML file.
    pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, FrameworkError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FrameworkError::Config(format!("reading {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&raw)
            .map_err(|e| FrameworkError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Fill in the hostname from the OS when the config left it blank.
    pub fn resolve_hostname(&mut self) -> Result<(), FrameworkError> {
        if !self.hostname.is_empty() {
            return Ok(());
        }

        let name = nix::unistd::gethostname()
            .map_err(|e| FrameworkError::Config(format!("could not retrieve hostname: {e}")))?;
        self.hostname = name.to_string_lossy().into_owned();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_yaml_round_trips() {
        let yaml = r#"
hostname: runner-1
queue: default
clients:
  queuesvc: "queuesvc:6001"
  assetsvc: "assetsvc:6002"
  logsvc: "logsvc:6005"
"#;
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        file.write_all(yaml.as_bytes()).expect("write config");

        let cfg: Config = Config::load_file(file.path()).expect("config should parse");
        assert_eq!(cfg.hostname, "runner-1");
        assert_eq!(cfg.queue_name, "default");
        assert_eq!(cfg.clients.queuesvc, "queuesvc:6001");
        assert_eq!(cfg.log.level.as_str(), "info");
    }

    #[test]
    fn missing_sections_default() {
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        file.write_all(b"queue: builds\n").expect("write config");

        let cfg: Config = Config::load_file(file.path()).expect("config should parse");
        assert_eq!(cfg.queue_name, "builds");
        assert!(cfg.hostname.is_empty());
        assert!(cfg.clients.queuesvc.is_empty());
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let res: Result<Config, _> = Config::load_file(Path::new("/nonexistent/runner.yml"));
        assert!(matches!(res, Err(FrameworkError::Config(_))));
    }

    #[test]
    fn hostname_resolves_from_the_os() {
        let mut cfg = Config::default();
        cfg.resolve_hostname().expect("hostname lookup");
        assert!(!cfg.hostname.is_empty());

        let mut explicit = Config {
            hostname: "runner-9".to_string(),
            ..Default::default()
        };
        explicit.resolve_hostname().expect("noop");
        assert_eq!(explicit.hostname, "runner-9");
    }
}
