//! Process configuration
//!
//! One TOML file, looked up at `$CARWINGS_MQTT_CONFIG` or
//! `<config dir>/carwings-mqtt/config.toml`:
//!
//! ```toml
//! units = "km"
//!
//! [carwings]
//! username = "leaf@example.com"
//! password = "secret"
//! region = "NE"
//!
//! [mqtt]
//! host = "localhost"
//! port = 1883
//! topic = "carwings"
//! ```
//!
//! Credentials may also come from the environment so they can stay out of the
//! file; environment values win over file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::carwings::CarwingsConfig;
use crate::mqtt::config::MqttConfig;
use crate::telemetry::units::UnitSystem;

pub const CONFIG_PATH_ENV: &str = "CARWINGS_MQTT_CONFIG";
const CONFIG_DIR: &str = "carwings-mqtt";
const CONFIG_FILE: &str = "config.toml";

const ENV_OVERRIDES: [&str; 4] = [
    "CARWINGS_USERNAME",
    "CARWINGS_PASSWORD",
    "MQTT_USERNAME",
    "MQTT_PASSWORD",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("No configuration directory available, set {}", CONFIG_PATH_ENV)]
    NoConfigDir,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub units: UnitSystem,
    #[serde(default)]
    pub carwings: CarwingsConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl Config {
    /// Location of the configuration file
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Reads, overrides from the environment and validates
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config: Config = toml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies credential overrides from a key lookup (the environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for key in ENV_OVERRIDES {
            let Some(value) = lookup(key).filter(|v| !v.is_empty()) else {
                continue;
            };
            debug!("Overriding configuration value from {}", key);
            match key {
                "CARWINGS_USERNAME" => self.carwings.username = value,
                "CARWINGS_PASSWORD" => self.carwings.password = value,
                "MQTT_USERNAME" => self.mqtt.username = Some(value),
                "MQTT_PASSWORD" => self.mqtt.password = Some(value),
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.carwings.username.trim().is_empty() {
            return Err(ConfigError::Missing("carwings.username"));
        }
        if self.carwings.password.is_empty() {
            return Err(ConfigError::Missing("carwings.password"));
        }
        if self.mqtt.topic.trim().trim_matches('/').is_empty() {
            return Err(ConfigError::Missing("mqtt.topic"));
        }
        if self.mqtt.url.is_none() && self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Missing("mqtt.host"));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid {
                field: "mqtt.port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "mqtt.keep_alive_secs",
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}
