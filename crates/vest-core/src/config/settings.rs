use crate::effects::EffectLibrary;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vest_types::EffectPattern;

/// Smallest accepted inbound line limit
pub const MIN_FRAME_BYTES: usize = 64;

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Device re-enumeration period; 0 disables polling
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_ms: u64,

    /// Per-client outbound queue length before the client is evicted
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Simulated units exposed by the mock backend
    #[serde(default = "default_mock_devices")]
    pub mock_devices: u8,

    /// User patterns merged into the built-in library
    #[serde(default)]
    pub effects: Vec<EffectPattern>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            discovery_interval_ms: default_discovery_interval(),
            outbound_queue_capacity: default_queue_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            mock_devices: default_mock_devices(),
            effects: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load config from file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_required(path)
    }

    /// Load config from a file that must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid JSON, or
    /// fails validation.
    pub fn load_required(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map_or_else(|| "config".into(), |n| n.to_string_lossy());
        super::validation::warn_unknown_fields(&content, &name);

        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits and user effects.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.outbound_queue_capacity == 0 {
            return Err(Error::Config(
                "outboundQueueCapacity must be greater than 0".to_string(),
            ));
        }
        if self.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(Error::Config(format!(
                "maxFrameBytes must be at least {MIN_FRAME_BYTES}"
            )));
        }
        self.effect_library().map(|_| ())
    }

    /// Built-in library plus this config's effects.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a user effect is invalid or shadows another.
    pub fn effect_library(&self) -> Result<EffectLibrary> {
        EffectLibrary::with_custom(&self.effects)
    }

    #[must_use]
    pub fn discovery_interval(&self) -> Option<Duration> {
        (self.discovery_interval_ms > 0).then(|| Duration::from_millis(self.discovery_interval_ms))
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5050
}
fn default_discovery_interval() -> u64 {
    2000
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}
fn default_mock_devices() -> u8 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig::load(&dir.path().join("config.json")).unwrap();

        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.port, 5050);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.discovery_interval(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_missing_required_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result = DaemonConfig::load_required(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 6100, "discoveryIntervalMs": 0}"#).unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.port, 6100);
        assert_eq!(config.discovery_interval(), None);
        assert_eq!(config.outbound_queue_capacity, 1024);
        assert_eq!(config.max_frame_bytes, 64 * 1024);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ port: ").unwrap();

        assert!(matches!(DaemonConfig::load(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let config = DaemonConfig {
            outbound_queue_capacity: 0,
            ..DaemonConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_tiny_frame_limit_rejected() {
        let config = DaemonConfig {
            max_frame_bytes: MIN_FRAME_BYTES - 1,
            ..DaemonConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_custom_effects_join_library() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"effects": [{"name": "thud", "category": "custom",
                "steps": [{"cells": [0, 7], "speed": 4, "duration_ms": 60}]}]}"#,
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        let library = config.effect_library().unwrap();
        let thud = library.get("thud").unwrap();
        assert_eq!(thud.steps.len(), 1);
        assert_eq!(thud.total_duration_ms(), 60);
        assert!(library.get("machinegun_front").is_some());
        assert_eq!(library.len(), crate::builtin_effects().len() + 1);
    }

    #[test]
    fn test_custom_effect_shadowing_builtin_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"effects": [{"name": "heartbeat",
                "steps": [{"cells": [0], "speed": 4, "duration_ms": 60}]}]}"#,
        )
        .unwrap();

        assert!(matches!(DaemonConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = DaemonConfig {
            port: 7070,
            mock_devices: 3,
            ..DaemonConfig::default()
        };

        config.save(&path).unwrap();
        assert_eq!(DaemonConfig::load(&path).unwrap(), config);
    }
}
