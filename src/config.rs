//! Pipeline configuration
//!
//! A `Config` is an immutable snapshot. The running pipeline swaps the whole
//! snapshot on reload, so readers always see a consistent set of values.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, WatchError};
use crate::watcher::types::PriorityMap;

/// Configuration for a driftwatch pipeline, loaded from `driftwatch.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch_paths: Vec<PathBuf>,
    pub recursive: bool,
    pub include_hidden: bool,
    /// Extension allow-list (".txt" or "txt"). Empty means every extension passes.
    pub extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub debounce_ms: u64,
    pub batch_enabled: bool,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub priorities: PriorityMap,
    pub recovery_enabled: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub hot_reload: bool,
    pub queue_capacity: usize,
    /// Upper bound on remembered (path, operation) debounce keys
    pub debounce_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_paths: Vec::new(),
            recursive: true,
            include_hidden: false,
            extensions: Vec::new(),
            exclude_patterns: Vec::new(),
            debounce_ms: 100,
            batch_enabled: false,
            batch_size: 50,
            batch_timeout_ms: 500,
            priorities: PriorityMap::default(),
            recovery_enabled: true,
            max_retries: 3,
            retry_delay_ms: 1000,
            config_file: None,
            hot_reload: false,
            queue_capacity: 1000,
            debounce_capacity: 10_000,
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        if config.config_file.is_none() {
            config.config_file = Some(path.to_path_buf());
        }
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.extensions = config
            .extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect();
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WatchError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(WatchError::Config("batch_size must be greater than 0".into()));
        }
        if self.batch_timeout_ms == 0 {
            return Err(WatchError::Config(
                "batch_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(WatchError::Config("max_retries must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(WatchError::Config(
                "queue_capacity must be greater than 0".into(),
            ));
        }
        if self.debounce_capacity == 0 {
            return Err(WatchError::Config(
                "debounce_capacity must be greater than 0".into(),
            ));
        }
        for pattern in &self.exclude_patterns {
            globset::Glob::new(pattern).map_err(|source| WatchError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Hot reload only runs when both a file and the flag are set
    pub fn hot_reload_path(&self) -> Option<&Path> {
        match (&self.config_file, self.hot_reload) {
            (Some(path), true) => Some(path.as_path()),
            _ => None,
        }
    }
}

/// Lowercase an extension and give it a leading dot
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
