//! Engine and resolver settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::DEFAULT_SEARCH_LIMIT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Timing and layout knobs of a form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period (in millis) before a form-level fetch source is re-resolved.
    pub watch_debounce_ms: u64,
    /// Quiet period (in millis) before a row's fetch sources are re-resolved.
    pub row_fetch_debounce_ms: u64,
    /// Quiet period (in millis) between the last keystroke and a link search.
    pub search_debounce_ms: u64,
    /// Quiet period (in millis) before the row editor writes back to the table.
    pub row_writeback_debounce_ms: u64,
    /// Maximum link candidates per search.
    pub search_limit: usize,
    /// Grid columns per layout block.
    pub grid_columns: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watch_debounce_ms: 50,
            row_fetch_debounce_ms: 100,
            search_debounce_ms: 300,
            row_writeback_debounce_ms: 150,
            search_limit: DEFAULT_SEARCH_LIMIT,
            grid_columns: 3,
        }
    }
}

impl EngineConfig {
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn row_fetch_debounce(&self) -> Duration {
        Duration::from_millis(self.row_fetch_debounce_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn row_writeback_debounce(&self) -> Duration {
        Duration::from_millis(self.row_writeback_debounce_ms)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Where the Doctype REST API lives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub base_url: String,
    /// Per-request timeout in millis.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ResolverConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "search_debounce_ms": 120 }"#).unwrap();
        assert_eq!(config.search_debounce(), Duration::from_millis(120));
        assert_eq!(config.watch_debounce(), Duration::from_millis(50));
        assert_eq!(config.grid_columns, 3);
        assert_eq!(config.search_limit, 20);
    }

    #[test]
    fn test_resolver_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "base_url": "https://erp.example.org" }}"#).unwrap();

        let config = ResolverConfig::from_file(file.path()).unwrap();
        assert_eq!(config.base_url, "https://erp.example.org");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
