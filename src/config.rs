//! Manager configuration.
//!
//! Sources, in order of precedence: explicit construction, a TOML document
//! (`from_toml_str` / `from_toml_file`), environment variables (`from_env`).
//!
//! Environment variables:
//! - `INDEX_LIFECYCLE_CREATION_TIMEOUT_MS` (default: 600000)
//! - `INDEX_LIFECYCLE_UPDATE_TIMEOUT_MS` (default: 172800000)
//! - `INDEX_LIFECYCLE_DELETION_TIMEOUT_MS` (default: 600000)
//! - `INDEX_LIFECYCLE_TIMEOUT_POLICY`: `cancel` or `detach` (default: cancel)
//! - store variables, see [`StoreConfig`]

use crate::lock::OperationKind;
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What happens to a workflow that outlives its lease
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Cancel in-flight store calls, run compensations, then release
    #[default]
    Cancel,
    /// Release and report the timeout; the workflow keeps running
    Detach,
}

impl std::str::FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cancel" => Ok(TimeoutPolicy::Cancel),
            "detach" => Ok(TimeoutPolicy::Detach),
            other => Err(format!("unknown timeout policy: {}", other)),
        }
    }
}

/// Maximum expected duration per operation kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationTimeouts {
    #[serde(with = "duration_millis")]
    pub creation: Duration,
    #[serde(with = "duration_millis")]
    pub update: Duration,
    #[serde(with = "duration_millis")]
    pub deletion: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        OperationTimeouts {
            creation: Duration::from_secs(10 * 60),
            update: Duration::from_secs(48 * 60 * 60),
            deletion: Duration::from_secs(10 * 60),
        }
    }
}

impl OperationTimeouts {
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Creation => self.creation,
            OperationKind::Update => self.update,
            OperationKind::Deletion => self.deletion,
        }
    }

    /// Same timeout for every kind
    pub fn uniform(timeout: Duration) -> Self {
        OperationTimeouts {
            creation: timeout,
            update: timeout,
            deletion: timeout,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub timeout_policy: TimeoutPolicy,
    pub timeouts: OperationTimeouts,
    pub store: StoreConfig,
}

impl ManagerConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = OperationTimeouts::default();
        let timeouts = OperationTimeouts {
            creation: env_millis("INDEX_LIFECYCLE_CREATION_TIMEOUT_MS")
                .unwrap_or(defaults.creation),
            update: env_millis("INDEX_LIFECYCLE_UPDATE_TIMEOUT_MS").unwrap_or(defaults.update),
            deletion: env_millis("INDEX_LIFECYCLE_DELETION_TIMEOUT_MS")
                .unwrap_or(defaults.deletion),
        };
        let timeout_policy = std::env::var("INDEX_LIFECYCLE_TIMEOUT_POLICY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        ManagerConfig {
            timeout_policy,
            timeouts,
            store: StoreConfig::from_env(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Configuration for tests (short timeouts, no refresh delay)
    pub fn test() -> Self {
        ManagerConfig {
            timeout_policy: TimeoutPolicy::Cancel,
            timeouts: OperationTimeouts::uniform(Duration::from_secs(5)),
            store: StoreConfig::test(),
        }
    }
}

/// Milliseconds from an environment variable; `None` when unset or invalid
pub(crate) fn env_millis(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
