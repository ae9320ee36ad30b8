//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use cwatch_exposure::matcher::DEFAULT_CHUNK_SIZE;
use cwatch_proximity::accumulator::AccumulatorConfig;
use cwatch_proximity::calibration::CalibrationTable;
use cwatch_tcn::window::DisclosureWindow;
use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Contact detection settings.
    #[serde(default)]
    pub proximity: ProximityConfig,
    /// Key rotation and disclosure settings.
    #[serde(default)]
    pub keys: KeysConfig,
    /// Exposure matching settings.
    #[serde(default)]
    pub exposure: ExposureConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Contact detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityConfig {
    /// How long a contact must last before it is recorded.
    #[serde(default = "default_time_till_record")]
    pub contact_time_till_record_secs: u64,
    /// Silence after which unrecorded encounters restart.
    #[serde(default = "default_quiet_timeout")]
    pub contact_quiet_timeout_secs: u64,
    /// Meters beyond the danger threshold needed to leave range.
    #[serde(default = "default_exit_margin")]
    pub exit_margin: f64,
    /// Sightings right after startup are stored but not accumulated.
    #[serde(default = "default_sampling_warmup")]
    pub sampling_warmup_secs: u64,
    /// Path-loss exponent for distance estimation.
    #[serde(default = "default_path_loss_exponent")]
    pub path_loss_exponent: f64,
    /// Calibration JSON. Empty = built-in default profile.
    #[serde(default)]
    pub calibration_file: String,
    /// Minimum time between "contact in range" alerts.
    #[serde(default = "default_min_secs_between_alerts")]
    pub min_secs_between_alerts: u64,
    /// Model id this device advertises.
    #[serde(default)]
    pub local_model_id: u16,
}

/// Key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// How often the broadcast number changes.
    #[serde(default = "default_rotation_period")]
    pub rotation_period_minutes: u64,
    /// How many days a disclosure report covers.
    #[serde(default = "default_disclosure_window")]
    pub disclosure_window_days: u32,
}

/// Exposure matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Identifiers matched per batch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How often the quiet timer is checked during silence.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

// Default value functions

fn default_time_till_record() -> u64 {
    60
}

fn default_quiet_timeout() -> u64 {
    28
}

fn default_exit_margin() -> f64 {
    5.0
}

fn default_sampling_warmup() -> u64 {
    30
}

fn default_path_loss_exponent() -> f64 {
    cwatch_proximity::distance::DEFAULT_PATH_LOSS_EXPONENT
}

fn default_min_secs_between_alerts() -> u64 {
    180
}

fn default_rotation_period() -> u64 {
    15
}

fn default_disclosure_window() -> u32 {
    14
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_interval() -> u64 {
    1
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            contact_time_till_record_secs: default_time_till_record(),
            contact_quiet_timeout_secs: default_quiet_timeout(),
            exit_margin: default_exit_margin(),
            sampling_warmup_secs: default_sampling_warmup(),
            path_loss_exponent: default_path_loss_exponent(),
            calibration_file: String::new(),
            min_secs_between_alerts: default_min_secs_between_alerts(),
            local_model_id: 0,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            rotation_period_minutes: default_rotation_period(),
            disclosure_window_days: default_disclosure_window(),
        }
    }
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tick_interval_secs: default_tick_interval(),
        }
    }
}

impl ProximityConfig {
    /// Accumulator parameters.
    pub fn accumulator(&self) -> AccumulatorConfig {
        AccumulatorConfig {
            time_till_record: Duration::from_secs(self.contact_time_till_record_secs),
            quiet_timeout: Duration::from_secs(self.contact_quiet_timeout_secs),
            exit_margin: self.exit_margin,
            ..AccumulatorConfig::default()
        }
    }

    /// Load the calibration table, or the built-in default when unset.
    pub fn calibration(&self) -> anyhow::Result<CalibrationTable> {
        if self.calibration_file.is_empty() {
            return Ok(CalibrationTable::default());
        }
        let json = std::fs::read_to_string(&self.calibration_file)?;
        Ok(CalibrationTable::from_json(&json)?)
    }
}

impl KeysConfig {
    /// Rotation and disclosure policy.
    pub fn window(&self) -> DisclosureWindow {
        DisclosureWindow {
            rotation_period: Duration::from_secs(self.rotation_period_minutes.saturating_mul(60)),
            disclosure_days: self.disclosure_window_days,
        }
    }

    pub fn rotation_period(&self) -> Duration {
        self.window().rotation_period
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("CWATCH_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/CovidWatch")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".cwatch")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/cwatch"))
}
