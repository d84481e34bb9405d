//! Configuration loader

use std::path::Path;

use seneca_utils::{config_file, Result, SenecaError};

use super::ObserverConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<ObserverConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(ObserverConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<ObserverConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| SenecaError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<ObserverConfig> {
        toml::from_str(content).map_err(|e| SenecaError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &ObserverConfig) -> Result<()> {
        config.link.validate()?;

        if config.bus.queue_capacity == 0 {
            return Err(SenecaError::config("bus queue_capacity must be at least 1"));
        }

        if config.bus.stall_timeout_ms == 0 {
            return Err(SenecaError::config(
                "bus stall_timeout_ms must be greater than zero",
            ));
        }

        Ok(())
    }
}
