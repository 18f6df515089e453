//! BitChat identity CLI configuration
//!
//! Loaded from a TOML file when `--config` is given, otherwise defaults.
//! The `[core]` table maps onto [`BitchatConfig`]; `[storage]` says where the
//! identity key and cache live.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use bitchat_identity::BitchatConfig;

use crate::error::{CliError, Result};

/// Complete configuration for the CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identity core configuration
    pub core: BitchatConfig,
    /// Storage location
    pub storage: StorageSettings,
}

/// Where persistent identity data is kept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Data directory; falls back to the platform data dir
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.core.validate()?;
        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("bitchat"))
            .ok_or_else(|| CliError::Config("no platform data directory; pass --data-dir".into()))
    }
}
