//! Networks and their candidate endpoints

use crate::error::{ConfigError, Result, ValidationError};
use crate::rpc::{parse_endpoint_url, Endpoint, ProviderClassifier};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A logical chain and its candidate endpoints
#[derive(Debug, Clone, Serialize)]
pub struct Network {
    pub key: String,
    pub name: String,
    /// Chain ID every endpoint must report
    pub identifier: u64,
    endpoints: Vec<Endpoint>,
    #[serde(skip)]
    next_index: usize,
}

impl Network {
    /// Endpoints in registration order
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// What an upsert changed, so callers can purge derived state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// The network did not exist before
    pub created: bool,
    /// The chain ID differs from the previous registration
    pub identifier_changed: bool,
    /// URLs that were registered before but not anymore
    pub dropped: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    networks: BTreeMap<String, Network>,
    /// url -> network key
    owners: HashMap<String, String>,
}

#[derive(Debug)]
pub struct EndpointRegistry {
    classifier: ProviderClassifier,
    inner: RwLock<Inner>,
}

impl EndpointRegistry {
    pub fn new(classifier: ProviderClassifier) -> Self {
        Self {
            classifier,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn classifier(&self) -> &ProviderClassifier {
        &self.classifier
    }

    /// Insert or replace a network. The endpoint list replaces the previous
    /// one; registration order follows `endpoint_urls`.
    pub fn register_network(
        &self,
        key: &str,
        name: &str,
        identifier: u64,
        endpoint_urls: &[String],
    ) -> Result<Registration> {
        if identifier == 0 {
            return Err(ConfigError::InvalidIdentifier {
                network: key.to_string(),
                identifier,
            }
            .into());
        }
        if endpoint_urls.is_empty() {
            return Err(ConfigError::EmptyEndpoints(key.to_string()).into());
        }

        let mut inner = self.inner.write();

        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(endpoint_urls.len());
        for url in endpoint_urls {
            if !seen.insert(url.as_str()) {
                continue;
            }
            let (_, kind) = parse_endpoint_url(url)?;
            if let Some(owner) = inner.owners.get(url) {
                if owner != key {
                    return Err(ValidationError::OwnedByOtherNetwork {
                        url: url.clone(),
                        network: owner.clone(),
                    }
                    .into());
                }
            }
            let class = self.classifier.classify(url);
            endpoints.push(Endpoint::new(url, key, kind, class, endpoints.len()));
        }

        let previous = inner.networks.remove(key);
        let registration = match &previous {
            Some(prev) => Registration {
                created: false,
                identifier_changed: prev.identifier != identifier,
                dropped: prev
                    .endpoints
                    .iter()
                    .filter(|e| !seen.contains(e.url()))
                    .map(|e| e.url().to_string())
                    .collect(),
            },
            None => Registration {
                created: true,
                ..Default::default()
            },
        };

        for url in &registration.dropped {
            inner.owners.remove(url);
        }
        for e in &endpoints {
            inner.owners.insert(e.url().to_string(), key.to_string());
        }

        let next_index = endpoints.len();
        inner.networks.insert(
            key.to_string(),
            Network {
                key: key.to_string(),
                name: name.to_string(),
                identifier,
                endpoints,
                next_index,
            },
        );

        tracing::debug!(
            "Upserted network {} (chain {}) with {} endpoints",
            key,
            identifier,
            endpoint_urls.len()
        );
        Ok(registration)
    }

    /// Append an endpoint; returns false if it was already present
    pub fn add_endpoint(&self, network_key: &str, url: &str) -> Result<bool> {
        let (_, kind) = parse_endpoint_url(url)?;

        let mut inner = self.inner.write();
        if let Some(owner) = inner.owners.get(url) {
            if owner == network_key {
                return Ok(false);
            }
            return Err(ValidationError::OwnedByOtherNetwork {
                url: url.to_string(),
                network: owner.clone(),
            }
            .into());
        }

        let class = self.classifier.classify(url).to_string();
        let network = inner
            .networks
            .get_mut(network_key)
            .ok_or_else(|| ValidationError::UnknownNetwork(network_key.to_string()))?;

        let index = network.next_index;
        network.next_index += 1;
        network
            .endpoints
            .push(Endpoint::new(url, network_key, kind, class, index));
        inner
            .owners
            .insert(url.to_string(), network_key.to_string());
        Ok(true)
    }

    /// Remove an endpoint; returns false if it was not registered
    pub fn remove_endpoint(&self, network_key: &str, url: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(network) = inner.networks.get_mut(network_key) else {
            return false;
        };
        let before = network.endpoints.len();
        network.endpoints.retain(|e| e.url() != url);
        let removed = network.endpoints.len() != before;
        if removed {
            inner.owners.remove(url);
        }
        removed
    }

    pub fn remove_network(&self, key: &str) -> Option<Network> {
        let mut inner = self.inner.write();
        let network = inner.networks.remove(key)?;
        for e in &network.endpoints {
            inner.owners.remove(e.url());
        }
        Some(network)
    }

    pub fn network(&self, key: &str) -> Option<Network> {
        self.inner.read().networks.get(key).cloned()
    }

    /// All networks, ordered by key
    pub fn networks(&self) -> Vec<Network> {
        self.inner.read().networks.values().cloned().collect()
    }

    /// Endpoints of a network in registration order
    pub fn candidates(&self, key: &str) -> Result<Vec<Endpoint>> {
        self.inner
            .read()
            .networks
            .get(key)
            .map(|n| n.endpoints.clone())
            .ok_or_else(|| ConfigError::UnknownNetwork(key.to_string()).into())
    }

    pub fn network_size(&self, key: &str) -> usize {
        self.inner.read().networks.get(key).map_or(0, |n| n.len())
    }

    pub fn endpoint(&self, url: &str) -> Option<Endpoint> {
        let inner = self.inner.read();
        let key = inner.owners.get(url)?;
        inner
            .networks
            .get(key)?
            .endpoints
            .iter()
            .find(|e| e.url() == url)
            .cloned()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(ProviderClassifier::default())
    }
}
