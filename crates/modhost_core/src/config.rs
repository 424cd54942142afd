//! Host configuration resolved from the environment.
//!
//! # Responsibility
//! - Resolve database path, log settings and error retention.
//!
//! # Invariants
//! - Blank variables are treated as unset.
//! - Invalid values are rejected, never silently replaced by defaults.

use crate::logging::default_log_level;
use crate::repo::error_repo::DEFAULT_ERROR_RETENTION;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const DB_PATH_ENV: &str = "MODHOST_DB_PATH";
pub const LOG_LEVEL_ENV: &str = "MODHOST_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "MODHOST_LOG_DIR";
pub const ERROR_RETENTION_ENV: &str = "MODHOST_ERROR_RETENTION_SECS";

const DEFAULT_DB_FILE_NAME: &str = "modhost.sqlite3";

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key} `{value}`: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Resolved host settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// File logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    pub error_retention: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            db_path: std::env::temp_dir().join(DEFAULT_DB_FILE_NAME),
            log_level: default_log_level().to_string(),
            log_dir: None,
            error_retention: DEFAULT_ERROR_RETENTION,
        }
    }
}

impl HostConfig {
    /// Reads the `MODHOST_*` process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(path) = read(DB_PATH_ENV) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(level) = read(LOG_LEVEL_ENV) {
            config.log_level = level;
        }
        if let Some(dir) = read(LOG_DIR_ENV) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = read(ERROR_RETENTION_ENV) {
            config.error_retention = parse_retention(&raw)?;
        }
        Ok(config)
    }
}

fn parse_retention(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &'static str| ConfigError::InvalidValue {
        key: ERROR_RETENTION_ENV,
        value: raw.to_string(),
        reason,
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(invalid("retention must be at least one second")),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => Err(invalid("expected whole seconds")),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, HostConfig, DB_PATH_ENV, ERROR_RETENTION_ENV, LOG_DIR_ENV};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| values.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = HostConfig::from_lookup(lookup(&[])).expect("defaults resolve");
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.error_retention, Duration::from_secs(3600));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn overrides_are_trimmed_and_blank_values_ignored() {
        let config = HostConfig::from_lookup(lookup(&[
            (DB_PATH_ENV, " /tmp/modhost-test.sqlite3 "),
            (LOG_DIR_ENV, "   "),
            (ERROR_RETENTION_ENV, "120"),
        ]))
        .expect("overrides resolve");
        assert_eq!(config.db_path, PathBuf::from("/tmp/modhost-test.sqlite3"));
        assert!(config.log_dir.is_none());
        assert_eq!(config.error_retention, Duration::from_secs(120));
    }

    #[test]
    fn zero_or_garbage_retention_is_rejected() {
        for raw in ["0", "an hour"] {
            let err = HostConfig::from_lookup(lookup(&[(ERROR_RETENTION_ENV, raw)]))
                .expect_err("invalid retention must fail");
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
        }
    }
}
