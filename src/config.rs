use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::storage::retry;
use crate::storage::{DatabaseOptions, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReqlogConfig {
    pub database: Option<String>,
    pub format: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub flush_every: Option<usize>,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub interval_ms: u64,
    /// 0 retries forever at a fixed interval
    pub max_attempts: u32,
    pub backoff: f64,
    pub max_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: retry::DEFAULT_INTERVAL.as_millis() as u64,
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            backoff: retry::DEFAULT_BACKOFF,
            max_interval_ms: retry::DEFAULT_MAX_INTERVAL.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let interval = Duration::from_millis(self.interval_ms);
        if self.max_attempts == 0 {
            return RetryPolicy::unbounded(interval);
        }
        RetryPolicy::bounded(interval, self.max_attempts)
            .with_backoff(self.backoff)
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
    }
}

impl ReqlogConfig {
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            retry: self.retry.policy(),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("reqlog.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("reqlog.db")
}

pub fn load_config(path: Option<&Path>) -> crate::Result<Option<ReqlogConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: ReqlogConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let config: ReqlogConfig = toml::from_str("").unwrap();
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.interval, Duration::from_millis(300));
        assert_eq!(config.database_options().busy_timeout, Duration::ZERO);
    }

    #[test]
    fn test_zero_attempts_is_unbounded() {
        let config: ReqlogConfig = toml::from_str(
            r#"
            database = "logs.db"
            verbose = true

            [retry]
            max_attempts = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.database.as_deref(), Some("logs.db"));
        assert!(config.verbose);
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts, 0);
        assert_eq!(policy.delay_for(7), Duration::from_millis(300));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).unwrap().is_none());
    }
}
