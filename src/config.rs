//! Configuration for the device hub
//!
//! Loaded from YAML; every field has a default so an empty file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::backend::BackendKind;
use crate::keys::{VelocityCurve, DEFAULT_HISTORY_CAPACITY};
use crate::pipeline::PipelineSettings;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HubConfig {
    /// Ingestion queue capacity
    pub buffer_size: usize,
    /// Advisory latency ceiling (ms); crossing it is logged
    pub target_latency_ms: f64,
    /// Velocity remap table, empty = disabled
    pub velocity_curve: Vec<u8>,
    pub worker_interval_ms: u64,
    pub history_capacity: usize,
    pub backend: BackendKind,
    /// Client name announced to the OS MIDI layer
    pub client_name: String,
    /// Send controller init sequences on connect
    pub auto_configure_controllers: bool,
    pub max_sysex_len: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            target_latency_ms: default_target_latency_ms(),
            velocity_curve: Vec::new(),
            worker_interval_ms: default_worker_interval_ms(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            backend: BackendKind::default(),
            client_name: default_client_name(),
            auto_configure_controllers: true,
            max_sysex_len: default_max_sysex_len(),
        }
    }
}

impl HubConfig {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty document parses as null, not as an empty mapping
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: HubConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            anyhow::bail!("buffer_size must be at least 1");
        }
        if !self.target_latency_ms.is_finite() || self.target_latency_ms <= 0.0 {
            anyhow::bail!(
                "target_latency_ms must be a positive number (got {})",
                self.target_latency_ms
            );
        }
        if self.worker_interval_ms == 0 {
            anyhow::bail!("worker_interval_ms must be at least 1");
        }
        if self.history_capacity == 0 {
            anyhow::bail!("history_capacity must be at least 1");
        }
        if self.client_name.trim().is_empty() {
            anyhow::bail!("client_name cannot be empty");
        }
        if self.max_sysex_len < 2 {
            anyhow::bail!("max_sysex_len must allow at least F0 F7");
        }
        if !self.velocity_curve.is_empty() && VelocityCurve::new(self.velocity_curve.clone()).is_none() {
            anyhow::bail!(
                "velocity_curve must have 1-128 non-decreasing entries in 0-127 (got {} entries)",
                self.velocity_curve.len()
            );
        }
        Ok(())
    }

    /// The configured curve, `None` when disabled
    pub fn velocity_curve(&self) -> Option<VelocityCurve> {
        if self.velocity_curve.is_empty() {
            None
        } else {
            VelocityCurve::new(self.velocity_curve.clone())
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            capacity: self.buffer_size.max(1),
            wake_interval: Duration::from_millis(self.worker_interval_ms.max(1)),
            target_latency_ms: self.target_latency_ms,
            history_capacity: self.history_capacity.max(1),
            velocity_curve: self.velocity_curve(),
        }
    }
}

// Default value functions
fn default_buffer_size() -> usize { 1024 }
fn default_target_latency_ms() -> f64 { 10.0 }
fn default_worker_interval_ms() -> u64 { 1 }
fn default_client_name() -> String { "midi-keyhub".to_string() }
fn default_max_sysex_len() -> usize { 4096 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.target_latency_ms, 10.0);
        assert!(config.velocity_curve.is_empty());
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.backend, BackendKind::System);
        assert!(config.auto_configure_controllers);
        assert!(config.validate().is_ok());
        assert!(config.velocity_curve().is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = HubConfig::from_yaml("buffer_size: 64\nbackend: mock\n").unwrap();
        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.backend, BackendKind::Mock);
        assert_eq!(config.client_name, "midi-keyhub");
        assert_eq!(config.max_sysex_len, 4096);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(HubConfig::from_yaml("").unwrap(), HubConfig::default());
    }

    #[test]
    fn test_validation_failures() {
        assert!(HubConfig::from_yaml("buffer_size: 0").is_err());
        assert!(HubConfig::from_yaml("target_latency_ms: -1.0").is_err());
        assert!(HubConfig::from_yaml("velocity_curve: [10, 5]").is_err());
        assert!(HubConfig::from_yaml("client_name: '  '").is_err());
        assert!(HubConfig::from_yaml("backend: alsa").is_err());
    }

    #[test]
    fn test_pipeline_settings() {
        let config = HubConfig::from_yaml(
            "buffer_size: 16\nworker_interval_ms: 5\nvelocity_curve: [0, 64, 127]\n",
        )
        .unwrap();
        let settings = config.pipeline_settings();
        assert_eq!(settings.capacity, 16);
        assert_eq!(settings.wake_interval, Duration::from_millis(5));
        assert_eq!(settings.velocity_curve.unwrap().points(), &[0, 64, 127]);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "buffer_size: 256").unwrap();
        writeln!(file, "target_latency_ms: 5.5").unwrap();
        writeln!(file, "auto_configure_controllers: false").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = HubConfig::load(&path).await.unwrap();
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.target_latency_ms, 5.5);
        assert!(!config.auto_configure_controllers);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyhub.yaml");
        let path = path.to_str().unwrap().to_string();

        let config = HubConfig {
            buffer_size: 32,
            velocity_curve: vec![0, 127],
            ..HubConfig::default()
        };
        config.save(&path).await.unwrap();
        assert_eq!(HubConfig::load(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = HubConfig::load("/definitely/not/here.yaml").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
