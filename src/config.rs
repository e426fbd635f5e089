use std::path::Path;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use crate::error::{LedgerError, Result};
use crate::telemetry::TelemetryConfig;

/// Default settings file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Env override prefix: `RUSTYLEDGER__DATABASE__PATH=/data/ledger`
pub const ENV_PREFIX: &str = "RUSTYLEDGER";

static GLOBAL_CONFIG: OnceCell<Settings> = OnceCell::new();

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// RocksDB directory
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    /// "daily", "hourly" or "never"
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            rotation: default_rotation(),
        }
    }
}

impl From<&LogSettings> for TelemetryConfig {
    fn from(log: &LogSettings) -> Self {
        TelemetryConfig {
            log_level: log.level.clone(),
            log_format: log.format.clone(),
            log_file: log.file.clone(),
            rotation: log.rotation.clone(),
        }
    }
}

fn default_db_path() -> String {
    "./ledger-db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Settings {
    /// Load `file` (if it exists) and apply `RUSTYLEDGER__*` env overrides.
    pub fn load_from(file: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::from(file.as_ref()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig::from(&self.log)
    }
}

pub fn init_global_config() -> Result<()> {
    let settings = Settings::load()?;
    GLOBAL_CONFIG
        .set(settings)
        .map_err(|_| LedgerError::Config(ConfigError::Message("Config already set".to_string())))?;
    Ok(())
}

/// Settings installed by `init_global_config`, if any.
pub fn get_global_config() -> Option<&'static Settings> {
    GLOBAL_CONFIG.get()
}
