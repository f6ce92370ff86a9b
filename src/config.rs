//! Configuration for logscope

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logs::{
    SearchDirection, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_HANDLES, DEFAULT_REFRESH_INTERVAL,
};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub logs: LogsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("logscope").join("config.toml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogsConfig {
    /// Glob patterns of logs to make available, e.g. `/var/log/**/*.log`
    pub patterns: Vec<String>,
    pub refresh_interval_secs: u64,
    pub chunk_size: usize,
    pub direction: SearchDirection,
    /// Open handles kept across all sessions before idle ones are closed
    pub max_handles: usize,
}

impl LogsConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            direction: SearchDirection::Reverse,
            max_handles: DEFAULT_MAX_HANDLES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Write a daily rolling log file here in addition to stderr
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            directory: None,
        }
    }
}
