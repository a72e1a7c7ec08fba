//! Aspect configuration loaded from YAML

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Per-aspect overrides
///
/// ```yaml
/// name: lobby-bus
/// debug: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Display name used in log prefixes
    #[serde(default)]
    pub name: Option<String>,

    /// Force the debug gate on or off instead of asking the subscriber
    #[serde(default)]
    pub debug: Option<bool>,
}

impl ContextConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = ContextConfig::from_yaml_str("name: lobby\ndebug: true\n").unwrap();
        assert_eq!(config.name.as_deref(), Some("lobby"));
        assert_eq!(config.debug, Some(true));
    }

    #[test]
    fn test_missing_fields_default() {
        let config = ContextConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ContextConfig::default());
    }

    #[test]
    fn test_parse_error() {
        let err = ContextConfig::from_yaml_str("debug: [not, a, bool]").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = ContextConfig::from_file("/nonexistent/tether.yml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
