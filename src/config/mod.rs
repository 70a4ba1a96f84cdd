//! Configuration module
//!
//! Handles loading and saving spotnet configuration for the CLI binary.
//! The library itself only needs [`SpotOptions`]; the file layer adds the
//! port choices and identity overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::{PointKind, BROADCAST_PORT, DATA_PORT};
use crate::spot::SpotOptions;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Who this point is
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Port and transport settings
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Stable uuid (generated per process if not set)
    pub uuid: Option<String>,
    /// Human-readable name for this point
    pub name: Option<String>,
    /// Point kind: host or controller
    #[serde(default)]
    pub kind: PointKind,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Shared control/broadcast port
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    /// Addressed data port
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    /// Hop limit for outgoing datagrams (system default if not set)
    pub ttl: Option<u32>,
}

fn default_broadcast_port() -> u16 {
    BROADCAST_PORT
}

fn default_data_port() -> u16 {
    DATA_PORT
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            broadcast_port: default_broadcast_port(),
            data_port: default_data_port(),
            ttl: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("spotnet/config.toml")),
            Some(PathBuf::from("./spotnet.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Engine options from this configuration, with generated defaults for
    /// anything unset.
    pub fn spot_options(&self) -> SpotOptions {
        let mut options = SpotOptions {
            kind: self.identity.kind,
            port: self.network.data_port,
            ..SpotOptions::default()
        };
        if let Some(uuid) = &self.identity.uuid {
            options.uuid = uuid.clone();
        }
        if let Some(name) = &self.identity.name {
            options.name = name.clone();
        }
        options
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> String {
    let config = Config {
        identity: IdentityConfig {
            uuid: None,
            name: Some("living-room-pc".to_string()),
            kind: PointKind::Host,
        },
        ..Default::default()
    };

    toml::to_string_pretty(&config).unwrap()
}
