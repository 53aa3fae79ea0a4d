//! Index store connection settings.
//!
//! Loaded from environment variables:
//! - `ES_URL`: engine base URL (default: `http://127.0.0.1:9200`)
//! - `ES_REFRESH`: read-after-write stabilisation delay in ms (default: 1000)
//! - `ES_REQUEST_TIMEOUT`: per-request timeout in ms (default: 30000)

use crate::config::{duration_millis, env_millis};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_URL: &str = "http://127.0.0.1:9200";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the engine
    pub url: String,
    /// Delay awaited after writes before dependent reads
    #[serde(with = "duration_millis")]
    pub refresh_interval: Duration,
    /// Timeout applied to each HTTP request
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            url: DEFAULT_URL.to_string(),
            refresh_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(30_000),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        StoreConfig {
            url: std::env::var("ES_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.url),
            refresh_interval: env_millis("ES_REFRESH").unwrap_or(defaults.refresh_interval),
            request_timeout: env_millis("ES_REQUEST_TIMEOUT").unwrap_or(defaults.request_timeout),
        }
    }

    /// Configuration for tests (no refresh delay)
    pub fn test() -> Self {
        StoreConfig {
            url: DEFAULT_URL.to_string(),
            refresh_interval: Duration::ZERO,
            request_timeout: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.url, "http://127.0.0.1:9200");
        assert_eq!(config.refresh_interval, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StoreConfig = toml::from_str("refresh_interval = 250").unwrap();
        assert_eq!(config.refresh_interval, Duration::from_millis(250));
        assert_eq!(config.url, DEFAULT_URL);
    }
}
