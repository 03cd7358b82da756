//! Startup configuration for the shard router.
//!
//! Everything the router reads from the process environment is collected
//! here once, validated, and then passed explicitly to the registry, the
//! migration state, the access guard and the poller.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::sharding::{RuntimeMode, MAIN_SHARD};

/// Default endpoint list when nothing is configured.
const DEFAULT_SHARDS: &str = "main=redis://localhost:6379";

/// Named backend endpoint of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEndpoint {
    /// Shard name ("main" or a named shard).
    pub name: String,
    /// Backend URL (`redis://`, `rediss://` or `memory://`).
    pub url: String,
}

impl ShardEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Layout of the YAML shard file.
#[derive(Debug, Deserialize)]
struct ShardFile {
    shards: Vec<ShardEndpoint>,
}

/// Configuration for the shard router.
#[derive(Debug, Clone)]
pub struct ShardingConfig {
    /// Shard endpoints; must include `main`.
    pub shards: Vec<ShardEndpoint>,
    /// Raw JSON-array declaration of migrated shards.
    pub migrated_shards: Option<String>,
    /// Runtime classification used by the access guard.
    pub runtime_mode: RuntimeMode,
    /// How often the schedule poller runs.
    pub poll_interval: Duration,
    /// Maximum due entries claimed per fetch.
    pub poll_batch_size: usize,
    /// Flags enabled at startup in the in-process flag store.
    pub enabled_flags: Vec<String>,
    /// YAML file of worker class definitions.
    pub workers_file: Option<PathBuf>,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shards: vec![ShardEndpoint::new(MAIN_SHARD, "redis://localhost:6379")],
            migrated_shards: None,
            runtime_mode: RuntimeMode::Production,
            poll_interval: Duration::from_secs(5),
            poll_batch_size: 100,
            enabled_flags: Vec::new(),
            workers_file: None,
        }
    }
}

impl ShardingConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QUEUE_SHARDS`: comma-separated `name=url` list (default: `main=redis://localhost:6379`)
    /// - `QUEUE_SHARDS_FILE`: YAML file with a `shards` list; overrides `QUEUE_SHARDS`
    /// - `QUEUE_MIGRATED_SHARDS`: JSON array of migrated shard names
    /// - `QUEUE_RUNTIME_MODE`: production, staging, development or test (default: production)
    /// - `QUEUE_POLL_INTERVAL_SECS`: schedule poll interval (default: 5)
    /// - `QUEUE_POLL_BATCH_SIZE`: due entries per fetch (default: 100)
    /// - `QUEUE_ENABLED_FLAGS`: comma-separated flag names enabled at startup
    /// - `QUEUE_WORKERS_FILE`: YAML map of worker class to queue and store
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value is invalid or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable source.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = var("QUEUE_SHARDS_FILE") {
            config.shards = load_shard_file(Path::new(&path))?;
        } else {
            let list = var("QUEUE_SHARDS").unwrap_or_else(|| DEFAULT_SHARDS.to_string());
            config.shards = parse_shard_list(&list)?;
        }

        // Malformed declarations are tolerated here; MigrationState treats them as empty.
        config.migrated_shards = var("QUEUE_MIGRATED_SHARDS");

        if let Some(val) = var("QUEUE_RUNTIME_MODE") {
            config.runtime_mode = RuntimeMode::from_str(&val).unwrap_or_else(|e| {
                warn!(error = %e, "Unrecognized runtime mode, using production");
                RuntimeMode::Production
            });
        }

        if let Some(val) = var("QUEUE_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "QUEUE_POLL_INTERVAL_SECS")?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(val) = var("QUEUE_POLL_BATCH_SIZE") {
            config.poll_batch_size = parse_env_value(&val, "QUEUE_POLL_BATCH_SIZE")?;
        }

        if let Some(val) = var("QUEUE_ENABLED_FLAGS") {
            config.enabled_flags = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.workers_file = var("QUEUE_WORKERS_FILE").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for shard in &self.shards {
            if shard.name.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "shard names cannot be blank".to_string(),
                ));
            }
            if shard.url.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "shard '{}' has an empty url",
                    shard.name
                )));
            }
            if !seen.insert(shard.name.as_str()) {
                return Err(ConfigError::DuplicateShard(shard.name.clone()));
            }
        }

        if !seen.contains(MAIN_SHARD) {
            return Err(ConfigError::MissingMainShard);
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.poll_batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "poll_batch_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set shard endpoints.
    pub fn with_shards(mut self, shards: Vec<ShardEndpoint>) -> Self {
        self.shards = shards;
        self
    }

    /// Builder method to set the migrated shard declaration.
    pub fn with_migrated_shards(mut self, declaration: impl Into<String>) -> Self {
        self.migrated_shards = Some(declaration.into());
        self
    }

    /// Builder method to set the runtime mode.
    pub fn with_runtime_mode(mut self, mode: RuntimeMode) -> Self {
        self.runtime_mode = mode;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the poll batch size.
    pub fn with_poll_batch_size(mut self, size: usize) -> Self {
        self.poll_batch_size = size;
        self
    }

    /// Builder method to set the flags enabled at startup.
    pub fn with_enabled_flags(mut self, flags: Vec<String>) -> Self {
        self.enabled_flags = flags;
        self
    }

    /// Builder method to set the worker definitions file.
    pub fn with_workers_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.workers_file = Some(path.into());
        self
    }
}

/// Parses a `name=url,name=url` endpoint list.
pub fn parse_shard_list(list: &str) -> Result<Vec<ShardEndpoint>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, url) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: "QUEUE_SHARDS".to_string(),
                message: format!("expected name=url, got '{}'", entry),
            })?;
            Ok(ShardEndpoint::new(name.trim(), url.trim()))
        })
        .collect()
}

/// Loads shard endpoints from a YAML file.
pub fn load_shard_file(path: &Path) -> Result<Vec<ShardEndpoint>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ShardFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let file: ShardFile = serde_yaml::from_str(&content)?;
    Ok(file.shards)
}

/// Parse an environment variable value.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ShardingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runtime_mode, RuntimeMode::Production);
        assert_eq!(config.poll_batch_size, 100);
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = ShardingConfig::from_vars(vars(&[])).expect("defaults are valid");
        assert_eq!(config.shards.len(), 1);
        assert_eq!(config.shards[0].name, "main");
        assert!(config.migrated_shards.is_none());
    }

    #[test]
    fn test_from_vars_full() {
        let config = ShardingConfig::from_vars(vars(&[
            ("QUEUE_SHARDS", "main=memory://main, queues_shard_a=redis://a:6379"),
            ("QUEUE_MIGRATED_SHARDS", r#"["queues_shard_a"]"#),
            ("QUEUE_RUNTIME_MODE", "test"),
            ("QUEUE_POLL_INTERVAL_SECS", "2"),
            ("QUEUE_POLL_BATCH_SIZE", "50"),
            ("QUEUE_ENABLED_FLAGS", "route_to_queues_shard_a, ,other"),
            ("QUEUE_WORKERS_FILE", "/etc/queue/workers.yml"),
        ]))
        .expect("valid config");

        assert_eq!(
            config.shards,
            vec![
                ShardEndpoint::new("main", "memory://main"),
                ShardEndpoint::new("queues_shard_a", "redis://a:6379"),
            ]
        );
        assert_eq!(
            config.migrated_shards.as_deref(),
            Some(r#"["queues_shard_a"]"#)
        );
        assert_eq!(config.runtime_mode, RuntimeMode::Test);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.poll_batch_size, 50);
        assert_eq!(config.enabled_flags, vec!["route_to_queues_shard_a", "other"]);
        assert_eq!(
            config.workers_file.as_deref(),
            Some(Path::new("/etc/queue/workers.yml"))
        );
    }

    #[test]
    fn test_unknown_runtime_mode_is_production() {
        let config = ShardingConfig::from_vars(vars(&[("QUEUE_RUNTIME_MODE", "qa")])).unwrap();
        assert_eq!(config.runtime_mode, RuntimeMode::Production);
    }

    #[test]
    fn test_malformed_migration_declaration_is_kept_raw() {
        let config =
            ShardingConfig::from_vars(vars(&[("QUEUE_MIGRATED_SHARDS", "[oops")])).unwrap();
        assert_eq!(config.migrated_shards.as_deref(), Some("[oops"));
    }

    #[test]
    fn test_missing_main_rejected() {
        let err = ShardingConfig::from_vars(vars(&[("QUEUE_SHARDS", "a=memory://a")])).err();
        assert!(matches!(err, Some(ConfigError::MissingMainShard)));
    }

    #[test]
    fn test_duplicate_shard_rejected() {
        let err = ShardingConfig::from_vars(vars(&[(
            "QUEUE_SHARDS",
            "main=memory://1,main=memory://2",
        )]))
        .err();
        assert!(matches!(err, Some(ConfigError::DuplicateShard(_))));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let err =
            ShardingConfig::from_vars(vars(&[("QUEUE_POLL_BATCH_SIZE", "lots")])).err();
        assert!(matches!(err, Some(ConfigError::InvalidValue { .. })));

        let err = ShardingConfig::from_vars(vars(&[("QUEUE_POLL_INTERVAL_SECS", "0")])).err();
        assert!(matches!(err, Some(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_parse_shard_list_rejects_missing_url() {
        let err = parse_shard_list("main").err();
        assert!(matches!(err, Some(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_shard_file_overrides_list() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "shards:\n  - name: main\n    url: memory://main\n  - name: queues_shard_b\n    url: memory://b"
        )
        .expect("write shard file");

        let path = file.path().display().to_string();
        let config = ShardingConfig::from_vars(vars(&[
            ("QUEUE_SHARDS_FILE", path.as_str()),
            ("QUEUE_SHARDS", "main=redis://ignored"),
        ]))
        .expect("valid shard file");

        assert_eq!(config.shards.len(), 2);
        assert_eq!(config.shards[1], ShardEndpoint::new("queues_shard_b", "memory://b"));
    }

    #[test]
    fn test_missing_shard_file() {
        let err = ShardingConfig::from_vars(vars(&[(
            "QUEUE_SHARDS_FILE",
            "/nonexistent/shards.yml",
        )]))
        .err();
        assert!(matches!(err, Some(ConfigError::ShardFile { .. })));
    }
}
