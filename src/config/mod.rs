//! Configuration module
//!
//! Handles loading and saving PathNet configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::{ReliabilityConfig, Transport};
use crate::protocol::DEFAULT_PORT;

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

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Datagram retry settings
    #[serde(default)]
    pub reliability: ReliabilityFileConfig,

    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on / connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface the server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_transport")]
    pub transport: Transport,
    /// TCP connect timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_transport() -> Transport {
    Transport::Tcp
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            transport: default_transport(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Reliable datagram channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityFileConfig {
    /// Wait for the ack, and then for the answer, in ms
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
    /// Transmissions per request, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_ack_timeout() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for ReliabilityFileConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Datagram requests processed concurrently
    #[serde(default = "default_udp_workers")]
    pub udp_workers: usize,
}

fn default_udp_workers() -> usize {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp_workers: default_udp_workers(),
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
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pathnet/config.toml")),
            Some(PathBuf::from("./pathnet.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        // Return default config if no file found
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

    /// Reject values the network layer cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.reliability.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reliability.ack_timeout_ms",
                message: "must be positive".to_string(),
            });
        }
        if self.reliability.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "reliability.max_attempts",
                message: "at least one attempt is required".to_string(),
            });
        }
        if self.server.udp_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "server.udp_workers",
                message: "at least one worker is required".to_string(),
            });
        }
        self.bind_addr().map(|_| ())
    }

    /// Socket address the server binds to
    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        let ip: IpAddr = self
            .network
            .bind_address
            .parse()
            .map_err(|e| ConfigError::Invalid {
                field: "network.bind_address",
                message: format!("'{}': {}", self.network.bind_address, e),
            })?;
        Ok(SocketAddr::new(ip, self.network.port))
    }

    pub fn reliability(&self) -> ReliabilityConfig {
        ReliabilityConfig {
            ack_timeout: Duration::from_millis(self.reliability.ack_timeout_ms),
            max_attempts: self.reliability.max_attempts,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        network: NetworkConfig {
            transport: Transport::Udp,
            ..Default::default()
        },
        reliability: ReliabilityFileConfig {
            ack_timeout_ms: 1500,
            max_attempts: 5,
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.network.transport, Transport::Tcp);
        assert_eq!(config.reliability(), ReliabilityConfig::default());
        assert_eq!(config.server.udp_workers, 8);
        assert_eq!(
            config.bind_addr().unwrap(),
            SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
        );
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.network.port = 7000;
        config.reliability.max_attempts = 4;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\ntransport = \"udp\"\n\n[reliability]\nack_timeout_ms = 250").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network.transport, Transport::Udp);
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.reliability().ack_timeout, Duration::from_millis(250));
        assert_eq!(config.reliability().max_attempts, 3);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[reliability]\nmax_attempts = 0").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid { field: "reliability.max_attempts", .. })
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nbind_address = \"not-an-ip\"").unwrap();
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Invalid { .. })));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\ntransport = \"sctp\"").unwrap();
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.network.transport, Transport::Udp);
        assert_eq!(parsed.reliability.max_attempts, 5);
    }
}
