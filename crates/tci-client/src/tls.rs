use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Shared TLS client settings for all service clients.
///
/// Service addresses in the runner config are `host:port` pairs; when a
/// certificate authority is configured the clients speak HTTPS,
/// otherwise plain HTTP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CertConfig {
    /// CA bundle the service certificates are verified against.
    pub ca: Option<PathBuf>,
    /// Client certificate presented to the services.
    pub cert: Option<PathBuf>,
    /// Private key matching `cert`.
    pub key: Option<PathBuf>,
}

impl CertConfig {
    /// Whether TLS material is configured at all.
    pub fn enabled(&self) -> bool {
        self.ca.is_some()
    }

    /// Turn a configured `host:port` into a base URL, honoring an
    /// explicit scheme if the operator supplied a full URL.
    pub fn base_url(&self, addr: &str) -> String {
        let addr = addr.trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }

        if self.enabled() {
            format!("https://{addr}")
        } else {
            format!("http://{addr}")
        }
    }

    /// Build a reqwest client with the configured trust and identity.
    pub fn client(&self) -> ClientResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder().use_rustls_tls();

        if let Some(ca) = &self.ca {
            let pem = std::fs::read(ca).map_err(|e| ClientError::Tls(e.to_string()))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ClientError::Tls(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            let mut pem = std::fs::read(cert).map_err(|e| ClientError::Tls(e.to_string()))?;
            let key = std::fs::read(key).map_err(|e| ClientError::Tls(e.to_string()))?;
            pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ClientError::Tls(e.to_string()))?;
            builder = builder.identity(identity);
        }

        builder
            .build()
            .map_err(|e| ClientError::Tls(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_to_http() {
        let cfg = CertConfig::default();
        assert_eq!(cfg.base_url("queuesvc:6001"), "http://queuesvc:6001");
    }

    #[test]
    fn base_url_uses_https_when_ca_is_set() {
        let cfg = CertConfig {
            ca: Some(PathBuf::from("/etc/tinyci/ca.pem")),
            ..Default::default()
        };
        assert_eq!(cfg.base_url("queuesvc:6001"), "https://queuesvc:6001");
    }

    #[test]
    fn base_url_keeps_explicit_scheme() {
        let cfg = CertConfig::default();
        assert_eq!(
            cfg.base_url("https://queue.example.org/"),
            "https://queue.example.org"
        );
    }

    #[test]
    fn plain_client_builds_without_tls_material() {
        CertConfig::default().client().expect("plain client");
    }
}
