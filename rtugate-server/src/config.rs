//! Gateway configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if one is given)
//! 3. Environment variables

use crate::registry::EvictionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Per-session behaviour.
    pub session: SessionConfig,
}

impl Config {
    /// Loads configuration from `path` (or defaults), then applies environment
    /// variable overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.session.apply_env_overrides();
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.bind_addr.trim().is_empty() {
            return Err(ConfigError::Validation("bind_addr is empty".to_string()));
        }
        if self.network.max_bytes == 0 {
            return Err(ConfigError::Validation(
                "max_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address as `host:port`.
    pub bind_addr: String,
    /// Maximum bytes returned by a single read.
    pub max_bytes: usize,
    /// Read and write deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:6500".to_string(),
            max_bytes: 500,
            timeout_secs: 180,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RTUGATE_BIND") {
            if !addr.is_empty() {
                self.bind_addr = addr;
            }
        }

        if let Ok(max) = std::env::var("RTUGATE_MAX_BYTES") {
            if let Ok(n) = max.parse() {
                self.max_bytes = n;
            }
        }

        if let Ok(timeout) = std::env::var("RTUGATE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.timeout_secs = secs;
            }
        }
    }

    /// Returns the read/write deadline as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the write gate stays held after a write, in milliseconds.
    pub write_quiescence_ms: u64,
    /// Send/receive deadline in milliseconds.
    pub bridge_timeout_ms: u64,
    /// Which sessions an identity assignment evicts.
    pub eviction: EvictionPolicy,
    /// Log every raw read and write as hex.
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_quiescence_ms: 1000,
            bridge_timeout_ms: 5000,
            eviction: EvictionPolicy::default(),
            debug: false,
        }
    }
}

impl SessionConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(ms) = std::env::var("RTUGATE_WRITE_QUIESCENCE_MS") {
            if let Ok(ms) = ms.parse() {
                self.write_quiescence_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("RTUGATE_BRIDGE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.bridge_timeout_ms = ms;
            }
        }

        if let Ok(policy) = std::env::var("RTUGATE_EVICTION") {
            match policy.to_lowercase().as_str() {
                "all_matching" | "allmatching" => self.eviction = EvictionPolicy::AllMatching,
                "first_inspected" | "firstinspected" => {
                    self.eviction = EvictionPolicy::FirstInspected
                }
                other => tracing::warn!("ignoring unknown eviction policy '{}'", other),
            }
        }

        if let Ok(debug) = std::env::var("RTUGATE_DEBUG") {
            self.debug = debug == "1" || debug.to_lowercase() == "true";
        }
    }

    /// Returns the write quiescence interval as Duration.
    pub fn write_quiescence(&self) -> Duration {
        Duration::from_millis(self.write_quiescence_ms)
    }

    /// Returns the bridge timeout as Duration.
    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::Parse(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Validation(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}
