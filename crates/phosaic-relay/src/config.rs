//! Configuration management

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;

/// 120 bits is the floor for session identifiers.
pub const MIN_ID_BYTES: usize = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Largest accepted WebSocket frame, in bytes.
    pub max_message_size: usize,
    /// Frames buffered per connection before further sends count as a miss.
    pub outbound_queue_len: usize,
    /// Random bytes per session identifier.
    pub id_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_message_size: 64 * 1024, // 64KB
            outbound_queue_len: 64,
            id_bytes: 16,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the TOML file named by `PHOSAIC_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("PHOSAIC_CONFIG") {
            Ok(path) => Self::from_toml(path)?,
            Err(_) => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// `PORT` replaces only the port of `bind_addr`, so it composes with
    /// `PHOSAIC_BIND_ADDR` no matter which one is set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("PHOSAIC_BIND_ADDR") {
            self.bind_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid bind_addr: {}", e)))?;
        }

        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid PORT: {}", e)))?;
            self.bind_addr.set_port(port);
        }

        if let Some(size) = lookup("PHOSAIC_MAX_MESSAGE_SIZE") {
            self.max_message_size = size
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid max_message_size: {}", e)))?;
        }

        if let Some(len) = lookup("PHOSAIC_OUTBOUND_QUEUE_LEN") {
            self.outbound_queue_len = len
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid outbound_queue_len: {}", e)))?;
        }

        if let Some(bytes) = lookup("PHOSAIC_ID_BYTES") {
            self.id_bytes = bytes
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid id_bytes: {}", e)))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be > 0".to_string()));
        }

        if self.outbound_queue_len == 0 {
            return Err(ConfigError::Invalid("outbound_queue_len must be > 0".to_string()));
        }

        if self.id_bytes < MIN_ID_BYTES {
            return Err(ConfigError::Invalid(format!(
                "id_bytes must be >= {} (got {})",
                MIN_ID_BYTES, self.id_bytes
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_listens_on_3000() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3000);
        config.validate().unwrap();
    }

    #[test]
    fn port_env_overrides_only_the_port() {
        let mut config = ServerConfig::default();
        config
            .apply_env(env(&[("PHOSAIC_BIND_ADDR", "127.0.0.1:9000"), ("PORT", "4000")]))
            .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut config = ServerConfig::default();
        let err = config.apply_env(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn short_identifiers_fail_validation() {
        let config = ServerConfig {
            id_bytes: 8,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_addr = \"127.0.0.1:3100\"\noutbound_queue_len = 8").unwrap();

        let config = ServerConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.bind_addr.port(), 3100);
        assert_eq!(config.outbound_queue_len, 8);
        assert_eq!(config.id_bytes, 16);
    }
}
