use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::EnvFilter;

use crate::error::LoggerError;

/// Logger configuration; the `log` section of a runner config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// Filter expression, e.g. `"info"` or `"tci_core=debug,info"`.
    pub level: LoggerLevel,
    /// Include module targets in the output.
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::default(),
            level: LoggerLevel::default(),
            with_targets: true,
            use_color: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerFormat {
    #[default]
    Text,
    Json,
}

/// A validated tracing filter expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LoggerLevel(String);

impl LoggerLevel {
    pub fn new(expr: &str) -> Result<Self, LoggerError> {
        EnvFilter::try_new(expr).map_err(|e| LoggerError::InvalidLevel(e.to_string()))?;
        Ok(Self(expr.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn to_env_filter(&self) -> EnvFilter {
        // validated at construction
        EnvFilter::new(&self.0)
    }
}

impl Default for LoggerLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

impl FromStr for LoggerLevel {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for LoggerLevel {
    type Error = LoggerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<LoggerLevel> for String {
    fn from(level: LoggerLevel) -> Self {
        level.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = LoggerConfig::default();
        assert_eq!(cfg.format, LoggerFormat::Text);
        assert_eq!(cfg.level.as_str(), "info");
        assert!(cfg.with_targets);
    }

    #[test]
    fn level_rejects_garbage_filters() {
        assert!("[[[".parse::<LoggerLevel>().is_err());
        assert!("tci_core=debug,info".parse::<LoggerLevel>().is_ok());
    }

    #[test]
    fn serde_uses_defaults_for_missing_fields() {
        let cfg: LoggerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.level.as_str(), "info");
        assert_eq!(cfg.format, LoggerFormat::Text);
    }

    #[test]
    fn partial_deserialization() {
        let cfg: LoggerConfig = serde_json::from_str(r#"{"format": "json", "level": "debug"}"#).unwrap();
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert_eq!(cfg.level.as_str(), "debug");
        assert!(cfg.with_targets);
    }
}
