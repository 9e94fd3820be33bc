//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/perfalign/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/perfalign/` (~/.config/perfalign/)
//! - Data: `$XDG_DATA_HOME/perfalign/` (~/.local/share/perfalign/)
//! - State/Logs: `$XDG_STATE_HOME/perfalign/` (~/.local/state/perfalign/)
//!
//! All reader knobs are read once at start-up; nothing here is reloaded
//! while the reader runs.

use crate::error::{Error, Result};
use crate::types::Millis;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Reader engine knobs
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Aggregated metrics database
    #[serde(default)]
    pub sink: SinkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reader engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReaderConfig {
    /// Directory the writer flushes bucket directories into
    #[serde(default = "default_event_root")]
    pub event_root: PathBuf,

    /// Width of one window in milliseconds
    #[serde(default = "default_sampling_interval_ms")]
    pub sampling_interval_ms: u64,

    /// How many intervals behind wall-clock time the reader picks its bucket
    #[serde(default = "default_writer_lag_windows")]
    pub writer_lag_windows: u32,

    /// Snapshots retained per category after each cycle
    #[serde(default = "default_retain_depth")]
    pub retain_depth: usize,

    /// Snapshots required before alignment is attempted
    #[serde(default = "default_min_alignment_depth")]
    pub min_alignment_depth: usize,

    /// Unfinished operations older than this many windows are not carried forward
    #[serde(default = "default_max_in_flight_age_windows")]
    pub max_in_flight_age_windows: u32,

    /// Buffered rows per processor before a batch is committed
    #[serde(default = "default_batch_flush_rows")]
    pub batch_flush_rows: usize,

    /// How far the right-hand snapshot may end before the reader window end
    #[serde(default)]
    pub stale_tolerance_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            event_root: default_event_root(),
            sampling_interval_ms: default_sampling_interval_ms(),
            writer_lag_windows: default_writer_lag_windows(),
            retain_depth: default_retain_depth(),
            min_alignment_depth: default_min_alignment_depth(),
            max_in_flight_age_windows: default_max_in_flight_age_windows(),
            batch_flush_rows: default_batch_flush_rows(),
            stale_tolerance_ms: 0,
        }
    }
}

impl ReaderConfig {
    /// Sampling interval in epoch-millis arithmetic.
    pub fn interval(&self) -> Millis {
        self.sampling_interval_ms as Millis
    }

    /// Maximum age of an in-flight row that is still carried forward.
    pub fn max_in_flight_age(&self) -> Millis {
        self.interval() * self.max_in_flight_age_windows as Millis
    }

    /// Safety margin behind wall-clock time.
    pub fn writer_lag(&self) -> Millis {
        self.interval() * self.writer_lag_windows as Millis
    }

    pub fn stale_tolerance(&self) -> Millis {
        self.stale_tolerance_ms as Millis
    }

    /// Validate knob combinations, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.sampling_interval_ms == 0 {
            return Err(Error::Config(
                "reader.sampling_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.min_alignment_depth < 2 {
            return Err(Error::Config(
                "reader.min_alignment_depth must be at least 2".to_string(),
            ));
        }
        if self.retain_depth < self.min_alignment_depth {
            return Err(Error::Config(format!(
                "reader.retain_depth ({}) must be >= reader.min_alignment_depth ({})",
                self.retain_depth, self.min_alignment_depth
            )));
        }
        if self.batch_flush_rows == 0 {
            return Err(Error::Config(
                "reader.batch_flush_rows must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_event_root() -> PathBuf {
    PathBuf::from("/dev/shm/perfalign")
}

fn default_sampling_interval_ms() -> u64 {
    5000
}

fn default_writer_lag_windows() -> u32 {
    3
}

fn default_retain_depth() -> usize {
    4
}

fn default_min_alignment_depth() -> usize {
    2
}

fn default_max_in_flight_age_windows() -> u32 {
    3
}

fn default_batch_flush_rows() -> usize {
    500
}

/// Aggregated metrics database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// Override path for the metrics database
    pub database_path: Option<PathBuf>,

    /// Windows kept in the metrics database before purging
    #[serde(default = "default_retention_windows")]
    pub retention_windows: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retention_windows: default_retention_windows(),
        }
    }
}

fn default_retention_windows() -> u64 {
    720
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.reader.validate()?;
        if self.sink.retention_windows == 0 {
            return Err(Error::Config(
                "sink.retention_windows must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Metrics database path: the configured override or the XDG default
    pub fn metrics_database_path(&self) -> PathBuf {
        self.sink
            .database_path
            .clone()
            .unwrap_or_else(Self::database_path)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/perfalign/config.toml` (~/.config/perfalign/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("perfalign").join("config.toml")
    }

    /// Returns the data directory path (for the metrics database)
    ///
    /// `$XDG_DATA_HOME/perfalign/` (~/.local/share/perfalign/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("perfalign")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/perfalign/` (~/.local/state/perfalign/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("perfalign")
    }

    /// Returns the default metrics database path
    ///
    /// `$XDG_DATA_HOME/perfalign/metrics.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("metrics.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/perfalign/perfalign.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("perfalign.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// For CLI binaries that want stable path behavior before invoking
    /// other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
