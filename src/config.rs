//! Configuration for the signal service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::inference::InferenceConfig;

/// Main configuration for the signal service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database location
    pub database_path: PathBuf,

    /// Port the HTTP server binds to
    pub server_port: u16,

    /// Inference boundary settings
    pub inference: InferenceSettings,
}

/// Settings for the external inference service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Base URL of the inference service
    pub url: String,
    /// Pre-shared API key sent with every predict call
    pub api_key: String,
    /// Overall deadline per predict call, in seconds
    pub timeout_secs: u64,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Backoff before the first retry, in milliseconds
    pub retry_backoff_ms: u64,
}

impl InferenceSettings {
    /// Convert to the client-side configuration.
    pub fn to_client_config(&self) -> InferenceConfig {
        InferenceConfig {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl Default for InferenceSettings {
    fn default() -> Self {
        let defaults = InferenceConfig::default();
        Self {
            url: defaults.url,
            api_key: defaults.api_key,
            timeout_secs: defaults.timeout.as_secs(),
            max_retries: defaults.max_retries,
            retry_backoff_ms: defaults.retry_backoff.as_millis() as u64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("biotensor-signal");

        Self {
            database_path: data_dir.join("signals.db"),
            server_port: 8080,
            inference: InferenceSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("biotensor-signal")
            .join("config.json")
    }

    /// Ensure the data directory for the database exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
