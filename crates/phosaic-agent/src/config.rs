use std::path::Path;
use std::time::Duration;

use phosaic_core::SettleConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub relay_url: String,

    // ICE configuration
    pub stun_servers: Vec<String>,

    pub settle: SettleSettings,
    pub display: DisplaySettings,

    pub log_level: String,
}

/// How long to wait for display geometry to stop changing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleSettings {
    pub poll_interval_ms: u64,
    pub stable_samples: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
    /// Already in full-display mode; skip the prompt.
    pub fullscreen: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:3000".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            settle: SettleSettings::default(),
            display: DisplaySettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SettleSettings {
    fn default() -> Self {
        let settle = SettleConfig::default();
        Self {
            poll_interval_ms: settle.poll_interval.as_millis() as u64,
            stable_samples: settle.stable_samples,
            timeout_ms: settle.timeout.as_millis() as u64,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fullscreen: true,
        }
    }
}

impl SettleSettings {
    pub fn to_settle_config(&self) -> SettleConfig {
        SettleConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stable_samples: self.stable_samples,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

impl AgentConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileNotFound(e.to_string()))?;

        let mut config: AgentConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PHOSAIC_RELAY_URL") {
            self.relay_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "relay_url must be a ws:// or wss:// URL, got {}",
                self.relay_url
            )));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::ValidationError(
                "display width and height must be positive".to_string(),
            ));
        }
        if self.settle.stable_samples == 0 {
            return Err(ConfigError::ValidationError(
                "settle.stable_samples must be at least 1".to_string(),
            ));
        }
        if self.settle.poll_interval_ms == 0 || self.settle.timeout_ms < self.settle.poll_interval_ms {
            return Err(ConfigError::ValidationError(
                "settle.timeout_ms must be at least one poll interval".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settle.to_settle_config(), SettleConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
relay_url = "ws://relay.local:3000"

[display]
width = 1280
height = 720
fullscreen = false
"#
        )
        .unwrap();

        let config = AgentConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.display.width, 1280);
        assert!(!config.display.fullscreen);
        assert_eq!(config.settle.stable_samples, 3);
        assert_eq!(config.stun_servers.len(), 1);
    }

    #[test]
    fn rejects_http_relay() {
        let config = AgentConfig {
            relay_url: "http://localhost:3000".to_string(),
            ..AgentConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn rejects_zero_samples() {
        let mut config = AgentConfig::default();
        config.settle.stable_samples = 0;
        assert!(config.validate().is_err());
    }
}
