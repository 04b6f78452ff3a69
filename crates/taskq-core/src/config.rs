//! Scheduler configuration, loadable from TOML.
//!
//! ```toml
//! database_path = "/var/lib/taskq/taskq.db"
//!
//! [retry]
//! base_delay_secs = 30
//! multiplier = 2.0
//! max_delay_secs = 3600
//! max_retries = 10
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("could not write config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// SQLite database file used when no store is injected.
    pub database_path: PathBuf,

    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a TOML file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// `<data dir>/taskq/taskq.db`, or `./taskq.db` when no data dir is known.
    pub fn default_database_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join("taskq").join("taskq.db"))
            .unwrap_or_else(|| PathBuf::from("taskq.db"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }
}

/// Backoff applied when a task requeues itself without picking a delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub multiplier: f64,
    pub max_delay_secs: u64,

    /// Requeues beyond this mark the task Failed ("Retry limit exceeded").
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 30,
            multiplier: 2.0,
            max_delay_secs: 3600,
            max_retries: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = SchedulerConfig::from_toml("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert!(config.database_path.ends_with("taskq.db"));
    }

    #[test]
    fn partial_retry_table_keeps_other_defaults() {
        let config = SchedulerConfig::from_toml(
            r#"
            database_path = "/tmp/q.db"

            [retry]
            max_retries = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/q.db"));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_secs, 30);
        assert_eq!(config.retry_policy().max_retries, 3);
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nbase_delay_secs = 5").unwrap();

        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.retry.base_delay_secs, 5);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = SchedulerConfig::from_file(Path::new("/nonexistent/taskq.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let result = SchedulerConfig::from_toml("retry = [not valid");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn config_survives_toml() {
        let config = SchedulerConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(SchedulerConfig::from_toml(&text).unwrap(), config);
    }
}
