//! Settings management
//!
//! Loads tunables from a TOML file at startup. A missing file means
//! defaults; a malformed one is an error.

use crate::reactor::DEFAULT_BUSY_WAIT_FLOOR;
use crate::store::{ConfigStore, SetValue, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the settings file
pub const SETTINGS_PATH_ENV: &str = "TICKLOOP_CONFIG";

/// Settings file used when the environment variable is unset
pub const DEFAULT_SETTINGS_PATH: &str = "tickloop.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub reactor: ReactorSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub driver: DriverSettings,
}

/// Reactor tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReactorSettings {
    /// Minimum finite wait per tick, in microseconds
    #[serde(default = "default_busy_wait_floor_us")]
    pub busy_wait_floor_us: u64,

    /// Descriptor groups parked on the spare list at startup
    #[serde(default = "default_prealloc_groups")]
    pub prealloc_groups: usize,

    /// Notifications parked on the spare list at startup
    #[serde(default = "default_prealloc_notifications")]
    pub prealloc_notifications: usize,
}

/// Config store tuning and initial contents
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSettings {
    /// Entries parked on the spare list at startup
    #[serde(default = "default_prealloc_entries")]
    pub prealloc_entries: usize,

    /// Entries installed into the store at startup
    #[serde(default)]
    pub seed: BTreeMap<String, toml::Value>,
}

/// Logging output
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling JSON log files, console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Driver loop behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverSettings {
    /// Heartbeat timer period in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Stop after this many ticks, run until told otherwise when unset
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

impl Default for ReactorSettings {
    fn default() -> Self {
        Self {
            busy_wait_floor_us: default_busy_wait_floor_us(),
            prealloc_groups: default_prealloc_groups(),
            prealloc_notifications: default_prealloc_notifications(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            prealloc_entries: default_prealloc_entries(),
            seed: BTreeMap::new(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            max_ticks: None,
        }
    }
}

fn default_busy_wait_floor_us() -> u64 {
    DEFAULT_BUSY_WAIT_FLOOR.as_micros() as u64
}

fn default_prealloc_groups() -> usize {
    8
}

fn default_prealloc_notifications() -> usize {
    16
}

fn default_prealloc_entries() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat_secs() -> u64 {
    5
}

impl ReactorSettings {
    #[inline]
    pub fn busy_wait_floor(&self) -> Duration {
        Duration::from_micros(self.busy_wait_floor_us)
    }
}

impl Settings {
    /// Load settings from `$TICKLOOP_CONFIG` or `tickloop.toml`
    ///
    /// If the file doesn't exist, returns default settings.
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var(SETTINGS_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
        Self::load_from(path)
    }

    /// Load settings from an explicit path, defaults if it is missing
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(e) => Err(SettingsError::Io(e)),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        toml::from_str(contents).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Install `[store.seed]` into `store`, returning how many entries were set
    ///
    /// Integers become longs, floats doubles, booleans ints (0/1) and strings
    /// strings. Arrays, tables and datetimes have no tagged-value form and
    /// are skipped.
    pub fn seed_store(&self, store: &mut ConfigStore) -> Result<usize, StoreError> {
        let mut applied = 0;
        for (key, value) in &self.store.seed {
            let value = match value {
                toml::Value::Integer(v) => SetValue::Long(*v),
                toml::Value::Float(v) => SetValue::Double(*v),
                toml::Value::Boolean(v) => SetValue::Int(i32::from(*v)),
                toml::Value::String(v) => SetValue::Str(v.as_str()),
                other => {
                    tracing::warn!(
                        target: "store",
                        "Skipping seed entry {}: unsupported {} value",
                        key,
                        other.type_str()
                    );
                    continue;
                }
            };
            store.set(Some(key.as_str()), value)?;
            applied += 1;
        }
        Ok(applied)
    }
}

/// Settings loading errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(String),
}
