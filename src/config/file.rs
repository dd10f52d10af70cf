//! Configuration file handling

use super::{
    BlacklistConfig, ConcurrencyConfig, NetworkConfig, ProbeConfig, ProviderClassRule,
    QuotaConfig, ScoringConfig,
};
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete sentinel configuration, as stored in `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub blacklist: BlacklistConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    /// URL substring table for provider classes
    #[serde(default = "crate::rpc::default_provider_classes")]
    pub provider_classes: Vec<ProviderClassRule>,

    /// Networks registered on startup
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            blacklist: BlacklistConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            probe: ProbeConfig::default(),
            quota: QuotaConfig::default(),
            provider_classes: crate::rpc::default_provider_classes(),
            networks: Vec::new(),
        }
    }
}

impl SentinelConfig {
    /// Default configuration with the built-in public networks
    pub fn with_default_networks() -> Self {
        Self {
            networks: crate::rpc::default_networks(),
            ..Default::default()
        }
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rpc-sentinel")
            .join("config.toml")
    }

    /// Load from default path
    pub fn load_default() -> Result<Option<Self>> {
        let path = Self::default_path();
        if path.exists() {
            Ok(Some(Self::load(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Load from a specific path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidFile(format!("{}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse and validate TOML content
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a specific path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::InvalidFile(format!("Failed to create directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidFile(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::InvalidFile(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Check every section for values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        self.blacklist.validate()?;
        Ok(())
    }

    /// Look up a configured network by key
    pub fn network(&self, key: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.key == key)
    }
}
