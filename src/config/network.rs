//! Network configuration

use serde::{Deserialize, Serialize};

/// Configuration for a single network and its candidate endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Unique key (e.g. "ethereum")
    pub key: String,
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expected chain ID returned by every endpoint
    pub chain_id: u64,
    /// Candidate RPC URLs, in preference order
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Whether this network is registered on startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NetworkConfig {
    /// Create a new network config with defaults
    pub fn new(key: impl Into<String>, chain_id: u64) -> Self {
        Self {
            key: key.into(),
            name: None,
            chain_id,
            endpoints: Vec::new(),
            enabled: true,
        }
    }

    /// Builder-style setter for name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder-style setter appending one endpoint
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoints.push(url.into());
        self
    }

    /// Builder-style setter replacing all endpoints
    pub fn with_endpoints<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Display name, falling back to the key
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }
}
