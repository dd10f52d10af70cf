//! Endpoint identity and provider classification

use crate::config::ProviderClassRule;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use url::Url;

/// How an endpoint is spoken to, derived from its URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// http / https request-response
    Http,
    /// ws / wss streaming
    WebSocket,
}

impl TransportKind {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" | "https" => Some(TransportKind::Http),
            "ws" | "wss" => Some(TransportKind::WebSocket),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::WebSocket => write!(f, "ws"),
        }
    }
}

/// Parse a URL and check that it uses a supported scheme
pub fn parse_endpoint_url(url: &str) -> Result<(Url, TransportKind), ValidationError> {
    let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let kind = TransportKind::from_scheme(parsed.scheme()).ok_or_else(|| {
        ValidationError::UnsupportedScheme {
            url: url.to_string(),
            scheme: parsed.scheme().to_string(),
        }
    })?;

    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok((parsed, kind))
}

/// A candidate RPC URL registered under exactly one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    url: String,
    network: String,
    kind: TransportKind,
    provider_class: String,
    /// Registration order inside the network, used to break ranking ties
    index: usize,
}

impl Endpoint {
    pub(crate) fn new(
        url: impl Into<String>,
        network: impl Into<String>,
        kind: TransportKind,
        provider_class: impl Into<String>,
        index: usize,
    ) -> Self {
        Self {
            url: url.into(),
            network: network.into(),
            kind,
            provider_class: provider_class.into(),
            index,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Quota bucket this endpoint counts against
    pub fn provider_class(&self) -> &str {
        &self.provider_class
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Data-driven URL substring table mapping endpoints to provider classes.
///
/// Rules are checked in order; the first rule with a matching indicator wins.
/// Unmatched URLs fall into the fallback class.
#[derive(Debug, Clone)]
pub struct ProviderClassifier {
    rules: Vec<ProviderClassRule>,
    fallback: String,
}

impl ProviderClassifier {
    pub const DEFAULT_CLASS: &'static str = "public";

    pub fn new(rules: Vec<ProviderClassRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| ProviderClassRule {
                class: r.class,
                indicators: r.indicators.iter().map(|i| i.to_lowercase()).collect(),
            })
            .collect();
        Self {
            rules,
            fallback: Self::DEFAULT_CLASS.to_string(),
        }
    }

    /// Builder-style setter for the class of unmatched URLs
    pub fn with_fallback(mut self, class: impl Into<String>) -> Self {
        self.fallback = class.into();
        self
    }

    pub fn classify(&self, url: &str) -> &str {
        let url = url.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.indicators.iter().any(|i| url.contains(i.as_str())))
            .map(|rule| rule.class.as_str())
            .unwrap_or(&self.fallback)
    }
}

impl Default for ProviderClassifier {
    fn default() -> Self {
        Self::new(super::default_provider_classes())
    }
}
