//! Store configuration with precedence and validation
//!
//! Precedence, lowest first: defaults, JSON config file, `STRAND_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strand_core::{Error, Result};

pub const DEFAULT_ENGINE_NAME: &str = "memory";

/// Snapshot compression settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// zstd level
    pub level: i32,
    /// Payloads smaller than this are stored raw
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 3,
            min_size: 4 * 1024,
        }
    }
}

/// Configuration for the reference engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name reported in memory usage and metric labels
    pub engine_name: String,
    /// Where checkpoints live; `None` keeps the store purely in memory
    pub data_dir: Option<PathBuf>,
    pub max_key_size: usize,
    pub max_value_size: usize,
    /// Number of change records retained for replicas
    pub change_log_capacity: usize,
    pub snapshot_compression: CompressionConfig,
    /// Active expiry sweep period; `None` leaves expiry purely lazy
    pub sweep_interval_ms: Option<u64>,
    /// Prefix for staging directories created during backup and restore
    pub temp_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            engine_name: DEFAULT_ENGINE_NAME.to_string(),
            data_dir: None,
            max_key_size: 64 * 1024,
            max_value_size: 16 * 1024 * 1024,
            change_log_capacity: 100_000,
            snapshot_compression: CompressionConfig::default(),
            sweep_interval_ms: None,
            temp_prefix: ".strand-stage-".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine_name.trim().is_empty() {
            return Err(Error::configuration("engine_name must not be empty"));
        }
        if self.max_key_size == 0 {
            return Err(Error::configuration("max_key_size must be greater than zero"));
        }
        if self.max_value_size == 0 {
            return Err(Error::configuration(
                "max_value_size must be greater than zero",
            ));
        }
        if self.change_log_capacity == 0 {
            return Err(Error::configuration(
                "change_log_capacity must be greater than zero",
            ));
        }
        let level = self.snapshot_compression.level;
        if !(1..=22).contains(&level) {
            return Err(Error::configuration(format!(
                "snapshot_compression.level must be within 1..=22, got {level}"
            )));
        }
        if self.sweep_interval_ms == Some(0) {
            return Err(Error::configuration(
                "sweep_interval_ms must be greater than zero when set",
            ));
        }
        if self.temp_prefix.is_empty() || self.temp_prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(Error::configuration(
                "temp_prefix must be a non-empty file name prefix",
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }
}

/// Builder for creating store configurations
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine_name(mut self, name: impl Into<String>) -> Self {
        self.config.engine_name = name.into();
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = Some(dir.into());
        self
    }

    pub fn max_key_size(mut self, size: usize) -> Self {
        self.config.max_key_size = size;
        self
    }

    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    pub fn change_log_capacity(mut self, capacity: usize) -> Self {
        self.config.change_log_capacity = capacity;
        self
    }

    pub fn compression(mut self, compression: CompressionConfig) -> Self {
        self.config.snapshot_compression = compression;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.temp_prefix = prefix.into();
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<StoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    ConfigFile(PathBuf),
    EnvironmentVariable(String),
}

/// Configuration loader that handles precedence
pub struct StoreConfigLoader;

impl StoreConfigLoader {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<(StoreConfig, Vec<ConfigSource>)> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Like [`StoreConfigLoader::load`] with an explicit environment lookup
    pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<(StoreConfig, Vec<ConfigSource>)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = StoreConfig::default();
        let mut sources = vec![ConfigSource::Default];

        if let Some(path) = path {
            config = Self::load_from_file(path)?;
            sources.push(ConfigSource::ConfigFile(path.to_path_buf()));
        }

        let applied = Self::apply_env(&mut config, env)?;
        sources.extend(applied.into_iter().map(ConfigSource::EnvironmentVariable));

        config.validate()?;
        Ok((config, sources))
    }

    fn load_from_file(path: &Path) -> Result<StoreConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_system(path, "read config file", e))?;

        serde_json::from_str(&content).map_err(|e| {
            Error::configuration(format!("invalid config file '{}': {e}", path.display()))
        })
    }

    fn apply_env<F>(config: &mut StoreConfig, env: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(name) = env("STRAND_ENGINE_NAME") {
            config.engine_name = name;
            applied.push("STRAND_ENGINE_NAME".to_string());
        }

        if let Some(dir) = env("STRAND_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
            applied.push("STRAND_DATA_DIR".to_string());
        }

        if let Some(raw) = env("STRAND_CHANGE_LOG_CAPACITY") {
            config.change_log_capacity = parse_number("STRAND_CHANGE_LOG_CAPACITY", &raw)?;
            applied.push("STRAND_CHANGE_LOG_CAPACITY".to_string());
        }

        if let Some(raw) = env("STRAND_SWEEP_INTERVAL_MS") {
            config.sweep_interval_ms = Some(parse_number("STRAND_SWEEP_INTERVAL_MS", &raw)?);
            applied.push("STRAND_SWEEP_INTERVAL_MS".to_string());
        }

        if let Some(raw) = env("STRAND_SNAPSHOT_COMPRESSION") {
            config.snapshot_compression.enabled = parse_flag("STRAND_SNAPSHOT_COMPRESSION", &raw)?;
            applied.push("STRAND_SNAPSHOT_COMPRESSION".to_string());
        }

        Ok(applied)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::configuration(format!("{name} must be a number, got '{raw}'")))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{name} must be 'true' or 'false', got '{raw}'"
        ))),
    }
}
