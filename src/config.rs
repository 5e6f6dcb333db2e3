//! Configuration management for the wallbox bridge
//!
//! This module handles loading and validation of the application
//! configuration from YAML files. The register map, poll cadence and serial
//! line parameters are fixed by the wallbox and are not configurable.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod defaults;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "WALLBOX_BRIDGE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line to the wallbox
    pub serial: SerialConfig,

    /// MQTT broker connection
    pub mqtt: MqttConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Serial line parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path of the RS485 adapter
    pub device: String,
}

/// MQTT broker connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name or IP address
    pub host: String,

    /// Broker TCP port (typically 1883)
    pub port: u16,

    /// Username; empty disables credentials
    pub username: String,

    /// Password passed through to the broker
    pub password: String,

    /// Client identifier; empty generates a random one
    pub client_id: String,

    /// Keepalive interval in seconds
    pub keepalive_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Directory holding the daily log files
    pub directory: String,

    /// Base file name of the log, e.g. `wallbox.log`
    pub file_name: String,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,

    /// Number of rotated files to keep
    pub backup_count: u32,
}

impl MqttConfig {
    /// Credentials to present to the broker, if any
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }

    /// Configured client id, or a fresh random one
    pub fn effective_client_id(&self) -> String {
        if self.client_id.trim().is_empty() {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("wallbox-bridge-{}", &id[..8])
        } else {
            self.client_id.clone()
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first location that exists
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(BridgeError::config(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            return Self::from_file(path);
        }

        let default_paths = [
            "wallbox_bridge.yaml",
            "/data/wallbox_bridge.yaml",
            "/etc/wallbox-bridge/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.serial.device.trim().is_empty() {
            return Err(BridgeError::validation(
                "serial.device",
                "Serial device path cannot be empty",
            ));
        }

        if self.mqtt.host.trim().is_empty() {
            return Err(BridgeError::validation(
                "mqtt.host",
                "Broker address cannot be empty",
            ));
        }

        if self.mqtt.port == 0 {
            return Err(BridgeError::validation(
                "mqtt.port",
                "Port must be greater than 0",
            ));
        }

        // rumqttc rejects keepalives below five seconds
        if self.mqtt.keepalive_seconds < 5 {
            return Err(BridgeError::validation(
                "mqtt.keepalive_seconds",
                "Must be at least 5",
            ));
        }

        if self.logging.file_name.trim().is_empty() {
            return Err(BridgeError::validation(
                "logging.file_name",
                "Log file name cannot be empty",
            ));
        }

        crate::logging::parse_log_level(&self.logging.level)
            .map_err(|_| BridgeError::validation("logging.level", "Unknown log level"))?;

        Ok(())
    }
}
