use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::buffer::OverflowPolicy;
use crate::cache::MIN_RETENTION;
use crate::id::BlockHeight;
use crate::sink::DeliveryMode;

/// Largest supported cache window.
pub const MAX_RETENTION: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagwalkConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SourceConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Capacity bound of the causal-order buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_bytes: default_max_bytes(),
            overflow: OverflowPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub mode: DeliveryMode,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            queue_capacity: default_queue_capacity(),
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

impl SinkConfig {
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// First block ever crawled; earlier heights are never requested.
    #[serde(default = "default_dag_start")]
    pub dag_start: BlockHeight,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub output_capacity: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            dag_start: default_dag_start(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            output_capacity: default_queue_capacity(),
        }
    }
}

impl CrawlerConfig {
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of epochs kept resident, the current one included.
    #[serde(default = "default_retention")]
    pub retention: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
        }
    }
}

impl DagwalkConfig {
    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_RETENTION..=MAX_RETENTION).contains(&self.cache.retention) {
            anyhow::bail!(
                "cache.retention must be between {MIN_RETENTION} and {MAX_RETENTION}, got {}",
                self.cache.retention
            );
        }
        if self.buffer.max_events == 0 || self.buffer.max_bytes == 0 {
            anyhow::bail!("buffer.max_events and buffer.max_bytes must be positive");
        }
        if self.sink.queue_capacity == 0 || self.crawler.output_capacity == 0 {
            anyhow::bail!("sink.queue_capacity and crawler.output_capacity must be positive");
        }
        Ok(())
    }
}

/// Path of the per-user config file, if the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dagwalk/config.toml"))
}

/// Parse and validate one config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML for
/// [`DagwalkConfig`], or fails [`DagwalkConfig::validate`].
pub fn load_config_file(path: &Path) -> Result<DagwalkConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<DagwalkConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Load the effective config: `explicit` if given, else the user config
/// file when it exists, else defaults.
///
/// # Errors
///
/// Returns an error if the chosen file cannot be loaded. A missing
/// `explicit` path is an error; a missing user config file is not.
pub fn load_config(explicit: Option<&Path>) -> Result<DagwalkConfig> {
    if let Some(path) = explicit {
        return load_config_file(path);
    }
    match user_config_path() {
        Some(path) if path.exists() => load_config_file(&path),
        _ => Ok(DagwalkConfig::default()),
    }
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:18545".to_string()
}

const fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("dagwalk.sqlite3")
}

const fn default_max_events() -> usize {
    3_000
}

const fn default_max_bytes() -> usize {
    10 * 1024 * 1024
}

const fn default_queue_capacity() -> usize {
    10
}

const fn default_progress_interval_secs() -> u64 {
    8
}

const fn default_dag_start() -> BlockHeight {
    1
}

const fn default_retry_delay_ms() -> u64 {
    2_000
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_retention() -> u32 {
    2
}
