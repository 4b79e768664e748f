//! Configuration loading for layerkv.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! Settings are read once at open time; there is no runtime reconfiguration.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::SettingsError;

pub const KB: usize = 1024;
pub const MB: usize = KB * 1024;

/// Block compression applied by the storage engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    #[default]
    Snappy,
    Lz4,
    Zstd,
}

/// Tuning knobs handed to the storage engine at open time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Shared block cache capacity in MiB
    #[serde(default = "default_block_cache_mb")]
    pub block_cache_mb: usize,

    /// Memtable size in MiB before it is flushed to L0
    #[serde(default = "default_write_buffer_mb")]
    pub write_buffer_mb: usize,

    /// Data block size in KiB
    #[serde(default = "default_block_size_kb")]
    pub block_size_kb: usize,

    #[serde(default)]
    pub compression: Compression,

    /// Bloom filter bits per key; 0 disables the filter
    #[serde(default = "default_bloom_bits")]
    pub bloom_bits_per_key: u32,

    #[serde(default = "default_max_open_files")]
    pub max_open_files: i32,

    /// Target SST file size in MiB
    #[serde(default = "default_target_file_size_mb")]
    pub target_file_size_mb: u64,

    /// Number of L0 files that starts slowing writes
    #[serde(default = "default_l0_slowdown_trigger")]
    pub l0_slowdown_trigger: i32,

    /// Number of L0 files that stops writes until compaction catches up
    #[serde(default = "default_l0_stop_trigger")]
    pub l0_stop_trigger: i32,
}

fn default_block_cache_mb() -> usize {
    4
}

fn default_write_buffer_mb() -> usize {
    4
}

fn default_block_size_kb() -> usize {
    4
}

fn default_bloom_bits() -> u32 {
    10
}

fn default_max_open_files() -> i32 {
    1024
}

fn default_target_file_size_mb() -> u64 {
    32
}

fn default_l0_slowdown_trigger() -> i32 {
    16
}

fn default_l0_stop_trigger() -> i32 {
    64
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            block_cache_mb: default_block_cache_mb(),
            write_buffer_mb: default_write_buffer_mb(),
            block_size_kb: default_block_size_kb(),
            compression: Compression::default(),
            bloom_bits_per_key: default_bloom_bits(),
            max_open_files: default_max_open_files(),
            target_file_size_mb: default_target_file_size_mb(),
            l0_slowdown_trigger: default_l0_slowdown_trigger(),
            l0_stop_trigger: default_l0_stop_trigger(),
        }
    }
}

/// Main store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the engine's on-disk state
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Enable per-key expiration and the background sweeper
    #[serde(default = "default_ttl_enabled")]
    pub ttl_enabled: bool,

    /// Upper bound, in bytes, for any key or value
    #[serde(default = "default_max_kv_len")]
    pub max_kv_len: usize,

    /// Interval between expiration sweeps
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Capacity of the queue feeding expiration listeners.
    /// Notifications beyond this are dropped rather than stalling the sweep.
    #[serde(default = "default_listener_queue_capacity")]
    pub listener_queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub engine: EngineSettings,
}

fn default_data_dir() -> String {
    ProjectDirs::from("", "", "layerkv")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_ttl_enabled() -> bool {
    true
}

fn default_max_kv_len() -> usize {
    256 * MB
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_listener_queue_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ttl_enabled: default_ttl_enabled(),
            max_kv_len: default_max_kv_len(),
            sweep_interval_ms: default_sweep_interval_ms(),
            listener_queue_capacity: default_listener_queue_capacity(),
            log_level: default_log_level(),
            engine: EngineSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (e.g. ~/.config/layerkv/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (LAYERKV_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SettingsError> {
        let config_dir = ProjectDirs::from("", "", "layerkv")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("data_dir", default_data_dir())?
            .set_default("ttl_enabled", default_ttl_enabled())?
            .set_default("max_kv_len", default_max_kv_len() as u64)?
            .set_default("sweep_interval_ms", default_sweep_interval_ms())?
            .set_default(
                "listener_queue_capacity",
                default_listener_queue_capacity() as u64,
            )?
            .set_default("log_level", default_log_level())?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // LAYERKV_DATA_DIR, LAYERKV_ENGINE__BLOCK_CACHE_MB, ...
        builder = builder.add_source(
            Environment::with_prefix("LAYERKV")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_kv_len == 0 {
            return Err(SettingsError::Invalid("max_kv_len must be > 0".to_string()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(SettingsError::Invalid(
                "sweep_interval_ms must be > 0".to_string(),
            ));
        }
        if self.listener_queue_capacity == 0 {
            return Err(SettingsError::Invalid(
                "listener_queue_capacity must be > 0".to_string(),
            ));
        }
        if self.engine.l0_stop_trigger < self.engine.l0_slowdown_trigger {
            return Err(SettingsError::Invalid(format!(
                "engine.l0_stop_trigger ({}) must be >= engine.l0_slowdown_trigger ({})",
                self.engine.l0_stop_trigger, self.engine.l0_slowdown_trigger
            )));
        }
        Ok(())
    }

    /// Settings rooted at `data_dir`, everything else default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into().to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    /// Expand ~ in data_dir to the actual home directory
    pub fn expanded_data_dir(&self) -> PathBuf {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new() {
                return home.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.data_dir)
    }
}
