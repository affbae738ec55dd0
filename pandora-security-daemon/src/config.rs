//! Daemon Configuration
//!
//! Configuration management for the Pandora security daemon.

use anyhow::{Context, Result};
use pandora_security_protocol::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// RPC server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Bluetooth adapter configuration
    #[serde(default)]
    pub adapter: AdapterConfig,
}

/// RPC server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the RPC listener binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Bluetooth adapter configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// HCI index of the Floss adapter
    #[serde(default)]
    pub hci_index: u32,
}

fn default_listen_address() -> String {
    "127.0.0.1:8999".to_string()
}

fn default_max_frame_size() -> usize {
    MAX_FRAME_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl ServerConfig {
    /// Parse the listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_address
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", self.listen_address))
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("pandora-security")
            .join("daemon.toml")
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, creating a default file if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_address, "127.0.0.1:8999");
        assert_eq!(config.server.max_frame_size, 1024 * 1024);
        assert_eq!(config.adapter.hci_index, 0);
        assert_eq!(
            config.server.listen_addr().unwrap(),
            "127.0.0.1:8999".parse().unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("daemon.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.toml");
        fs::write(&path, "[adapter]\nhci_index = 1\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.adapter.hci_index, 1);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.toml");
        fs::write(&path, "[server\nlisten_address = ").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_invalid_listen_address() {
        let server = ServerConfig {
            listen_address: "not an address".to_string(),
            ..Default::default()
        };
        assert!(server.listen_addr().is_err());
    }
}
