//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of bounds
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Worker threads running task actions, 0 to run them inline
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Largest read answered inline with the acknowledgement
    #[serde(default = "default_eager_max_read")]
    pub eager_max_read: usize,
    /// Largest number of segments moved by a single RDMA operation
    #[serde(default = "default_max_rdma_segments")]
    pub max_rdma_segments: usize,
    /// Boundary new segments are allocated on, 0 for none
    #[serde(default)]
    pub segment_alignment: usize,
    /// Default log filter
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_workers() -> usize {
    4
}

fn default_eager_max_read() -> usize {
    32 * 1024
}

fn default_max_rdma_segments() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            eager_max_read: default_eager_max_read(),
            max_rdma_segments: default_max_rdma_segments(),
            segment_alignment: 0,
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate a TOML document. Missing keys take their default.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize as TOML.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Check value bounds.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_rdma_segments == 0 {
            return Err(ConfigError::Invalid {
                field: "max_rdma_segments",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.segment_alignment != 0 && !self.segment_alignment.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "segment_alignment",
                reason: format!("{} is not a power of two", self.segment_alignment),
            });
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_level",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
