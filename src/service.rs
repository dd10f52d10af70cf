//! The sentinel facade
//!
//! [`RegistryService`] owns every component and is the only thing callers
//! talk to: configure networks, ask for ranked endpoints, report call
//! outcomes, run health sweeps and inspect or override the blacklist.

use crate::blacklist::{BlacklistEntry, BlacklistManager, BlacklistReason, Demotion};
use crate::concurrency::{AggregateStats, ConcurrencyController};
use crate::config::{BlacklistConfig, ProbeConfig, SentinelConfig};
use crate::error::{Result, ValidationError};
use crate::health::{EndpointSnapshot, Outcome, ScoreTracker};
use crate::prober::{HealthProber, ProbeErrorKind, ProbeMode, ProbeResult};
use crate::quota::QuotaGate;
use crate::registry::EndpointRegistry;
use crate::rpc::{Endpoint, ProviderClassifier, Transport};
use futures::{stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Summary of one health sweep over a network
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub network: String,
    pub name: String,
    pub identifier: u64,
    /// Per-endpoint results, in registration order
    pub results: Vec<ProbeResult>,
    /// Endpoints not probed because they are blacklisted or rate limited
    pub skipped: Vec<String>,
    pub reachable: usize,
    pub mismatched: usize,
    pub failed: usize,
    /// No endpoint answered correctly
    pub degraded: bool,
    pub workers: usize,
}

/// Current view of one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub endpoint: Endpoint,
    pub stats: Option<EndpointSnapshot>,
    pub blacklisted: Option<BlacklistReason>,
    pub callable: bool,
}

pub struct RegistryService {
    registry: EndpointRegistry,
    tracker: ScoreTracker,
    blacklist: BlacklistManager,
    quota: QuotaGate,
    concurrency: Arc<ConcurrencyController>,
    prober: HealthProber,
    probe_config: ProbeConfig,
}

impl RegistryService {
    /// Build every component from `config` and register its enabled networks
    pub fn from_config(config: &SentinelConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let concurrency = Arc::new(ConcurrencyController::new(config.concurrency.clone())?);
        let service = Self {
            registry: EndpointRegistry::new(ProviderClassifier::new(
                config.provider_classes.clone(),
            )),
            tracker: ScoreTracker::new(config.scoring.clone()),
            blacklist: BlacklistManager::new(config.blacklist.clone()),
            quota: QuotaGate::new(&config.quota, config.scoring.score_floor),
            prober: HealthProber::new(transport, concurrency.clone()),
            concurrency,
            probe_config: config.probe.clone(),
        };

        for network in config.networks.iter().filter(|n| n.enabled) {
            service.register_network(
                &network.key,
                network.display_name(),
                network.chain_id,
                &network.endpoints,
            )?;
        }

        Ok(service)
    }

    fn thresholds(&self) -> &BlacklistConfig {
        self.blacklist.config()
    }

    // ==================== Configuration ====================

    /// Insert or replace a network. Endpoints dropped by the upsert lose their
    /// state; a changed identifier resets the state of every endpoint.
    pub fn register_network(
        &self,
        key: &str,
        name: &str,
        identifier: u64,
        endpoint_urls: &[String],
    ) -> Result<()> {
        let registration = self
            .registry
            .register_network(key, name, identifier, endpoint_urls)?;

        if registration.created {
            tracing::info!(
                "Registered network {} (chain {}) with {} endpoints",
                key,
                identifier,
                self.registry.network_size(key)
            );
        }
        for url in &registration.dropped {
            self.purge(url);
        }
        if registration.identifier_changed {
            tracing::info!("Chain ID of {} changed to {}; resetting scores", key, identifier);
            for endpoint in self.registry.candidates(key)? {
                self.purge(endpoint.url());
            }
        }
        Ok(())
    }

    /// Add one endpoint; duplicates are accepted without change
    pub fn add_endpoint(&self, network_key: &str, url: &str) -> Result<bool> {
        self.registry.add_endpoint(network_key, url)
    }

    /// Remove one endpoint and everything known about it
    pub fn remove_endpoint(&self, network_key: &str, url: &str) -> bool {
        let removed = self.registry.remove_endpoint(network_key, url);
        if removed {
            self.purge(url);
        }
        removed
    }

    pub fn remove_network(&self, key: &str) -> bool {
        match self.registry.remove_network(key) {
            Some(network) => {
                for endpoint in network.endpoints() {
                    self.purge(endpoint.url());
                }
                true
            }
            None => false,
        }
    }

    fn purge(&self, url: &str) {
        self.tracker.remove(url);
        self.blacklist.remove(url);
        self.quota.forget(url);
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &ScoreTracker {
        &self.tracker
    }

    pub fn blacklist_manager(&self) -> &BlacklistManager {
        &self.blacklist
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    pub fn concurrency(&self) -> &ConcurrencyController {
        &self.concurrency
    }

    // ==================== Selection ====================

    /// Endpoints of a network in registration order
    pub fn list_candidates(&self, network_key: &str, exclude_blacklisted: bool) -> Result<Vec<Endpoint>> {
        let mut candidates = self.registry.candidates(network_key)?;
        if exclude_blacklisted {
            candidates.retain(|e| !self.blacklist.is_blacklisted(e.url()));
        }
        Ok(candidates)
    }

    /// Usable endpoints of a network, best first.
    ///
    /// Unknown networks and networks without usable endpoints yield an empty
    /// list; the caller decides how to handle a degraded network.
    pub fn rank(&self, network_key: &str, count: usize) -> Vec<Endpoint> {
        self.quota.reset_if_due();

        let candidates = match self.list_candidates(network_key, true) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("Nothing to rank for {}: {}", network_key, e);
                return Vec::new();
            }
        };

        let now = Instant::now();
        let usable: Vec<&Endpoint> = candidates
            .iter()
            .filter(|e| self.quota.can_call_at(e, self.known_score(e.url()), now))
            .collect();

        if usable.is_empty() {
            tracing::debug!("Network {} has no usable endpoints", network_key);
        }
        self.tracker.rank(usable, count)
    }

    fn known_score(&self, url: &str) -> Option<f64> {
        self.tracker
            .has_samples(url)
            .then(|| self.tracker.score(url))
    }

    /// Whether a real call may go to `url` right now
    pub fn can_call(&self, url: &str) -> bool {
        self.quota.reset_if_due();
        match self.registry.endpoint(url) {
            Some(endpoint) => {
                !self.blacklist.is_blacklisted(url)
                    && self.quota.can_call(&endpoint, self.known_score(url))
            }
            None => false,
        }
    }

    // ==================== Feedback ====================

    /// Record the outcome of a real (non-probe) call through `url`
    pub fn record_call_outcome(
        &self,
        url: &str,
        success: bool,
        latency: Duration,
        error: Option<ProbeErrorKind>,
    ) -> Result<()> {
        let endpoint = self
            .registry
            .endpoint(url)
            .ok_or_else(|| ValidationError::UnknownEndpoint(url.to_string()))?;

        self.quota.record_call(&endpoint);
        if let Some(kind) = error.filter(|k| k.is_misconfiguration()) {
            tracing::warn!("Call through {} failed with {}", url, kind);
        }
        self.observe(&endpoint, success, latency);
        Ok(())
    }

    fn observe(&self, endpoint: &Endpoint, success: bool, latency: Duration) {
        let outcome = Outcome { success, latency };
        self.tracker.record(endpoint.url(), outcome);

        let size = self.registry.network_size(endpoint.network());
        let thresholds = self.thresholds();
        if success {
            self.blacklist.observe_success(endpoint.url());
            self.blacklist.observe_latency(
                endpoint,
                latency,
                thresholds.latency_ceiling,
                thresholds.latency_violation_threshold,
                size,
            );
        } else {
            self.blacklist
                .observe_failure(endpoint, thresholds.failure_threshold, size);
        }
    }

    fn apply_probe(&self, result: &ProbeResult) {
        self.observe(&result.endpoint, result.success, result.latency);
    }

    // ==================== Probing ====================

    /// Health-check every usable endpoint of a network
    pub async fn probe_network(&self, network_key: &str, mode: ProbeMode) -> Result<ProbeReport> {
        self.probe_network_with_cancel(network_key, mode, &CancellationToken::new())
            .await
    }

    /// Like [`probe_network`](Self::probe_network), stopping early when
    /// `cancel` fires
    pub async fn probe_network_with_cancel(
        &self,
        network_key: &str,
        mode: ProbeMode,
        cancel: &CancellationToken,
    ) -> Result<ProbeReport> {
        let network = self
            .registry
            .network(network_key)
            .ok_or_else(|| ValidationError::UnknownNetwork(network_key.to_string()))?;

        self.quota.reset_if_due();
        let now = Instant::now();
        let (targets, skipped): (Vec<Endpoint>, Vec<Endpoint>) =
            network.endpoints().iter().cloned().partition(|e| {
                !self.blacklist.is_blacklisted(e.url()) && !self.quota.is_rate_limited_at(e, now)
            });

        let workers = self.concurrency.workers();
        let mut results = self
            .prober
            .probe_batch(&targets, network.identifier, mode.limits(&self.probe_config), cancel)
            .await;
        for result in &results {
            self.apply_probe(result);
        }
        results.sort_by_key(|r| r.endpoint.index());

        let reachable = results.iter().filter(|r| r.success).count();
        let mismatched = results
            .iter()
            .filter(|r| r.error == Some(ProbeErrorKind::IdentifierMismatch))
            .count();
        let report = ProbeReport {
            network: network.key.clone(),
            name: network.name.clone(),
            identifier: network.identifier,
            failed: results.len() - reachable,
            degraded: reachable == 0,
            skipped: skipped.iter().map(|e| e.url().to_string()).collect(),
            results,
            reachable,
            mismatched,
            workers,
        };

        if report.degraded {
            tracing::warn!("Network {} is degraded: no endpoint answered", network.key);
        } else {
            tracing::info!(
                "Probed {}: {}/{} reachable, {} mismatched, {} skipped",
                network.key,
                report.reachable,
                report.results.len(),
                report.mismatched,
                report.skipped.len()
            );
        }
        Ok(report)
    }

    // ==================== Blacklist ====================

    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.blacklist.is_blacklisted(url)
    }

    pub fn blacklist_status(&self, network_key: &str) -> Vec<BlacklistEntry> {
        self.blacklist.entries(network_key)
    }

    /// Operator blacklisting; refused for a network's last usable endpoint
    pub fn blacklist(&self, url: &str) -> Result<Demotion> {
        let endpoint = self
            .registry
            .endpoint(url)
            .ok_or_else(|| ValidationError::UnknownEndpoint(url.to_string()))?;
        let size = self.registry.network_size(endpoint.network());
        Ok(self.blacklist.blacklist_manual(&endpoint, size))
    }

    /// Operator override: reinstate without cooldown or probe
    pub fn force_reinstate(&self, url: &str) -> bool {
        let reinstated = self.blacklist.reinstate(url).is_some();
        if reinstated {
            self.tracker.reset_failures(url);
            tracing::info!("Force-reinstated {}", url);
        }
        reinstated
    }

    /// Re-probe a blacklisted endpoint whose cooldown has elapsed and
    /// reinstate it on success
    pub async fn try_reinstate(&self, url: &str) -> bool {
        let Some(endpoint) = self.registry.endpoint(url) else {
            return false;
        };
        let Some(network) = self.registry.network(endpoint.network()) else {
            return false;
        };
        let timeout = ProbeMode::Thorough.limits(&self.probe_config).per_probe;

        let probe = async {
            let result = self.prober.probe(&endpoint, timeout, network.identifier).await;
            self.tracker.record(
                url,
                Outcome {
                    success: result.success,
                    latency: result.latency,
                },
            );
            result.success
        };

        let reinstated = self.blacklist.try_reinstate(url, probe).await;
        if reinstated {
            self.tracker.reset_failures(url);
        }
        reinstated
    }

    /// Attempt reinstatement of every entry whose cooldown has elapsed, at
    /// most `workers` re-probes at a time; returns the reinstated URLs
    pub async fn reinstate_due(&self) -> Vec<String> {
        let due = self.blacklist.due(Instant::now());
        let workers = self.concurrency.workers().max(1);
        let mut reinstated: Vec<String> = stream::iter(due)
            .map(|url| async move { self.try_reinstate(&url).await.then_some(url) })
            .buffer_unordered(workers)
            .filter_map(|url| async move { url })
            .collect()
            .await;
        reinstated.sort();
        reinstated
    }

    // ==================== Introspection & control ====================

    pub fn endpoint_status(&self, network_key: &str) -> Result<Vec<EndpointStatus>> {
        Ok(self
            .registry
            .candidates(network_key)?
            .into_iter()
            .map(|endpoint| {
                let url = endpoint.url().to_string();
                EndpointStatus {
                    stats: self.tracker.snapshot(&url),
                    blacklisted: self.blacklist.get(&url).map(|e| e.reason),
                    callable: self.can_call(&url),
                    endpoint,
                }
            })
            .collect())
    }

    pub fn aggregate_stats(&self) -> AggregateStats {
        self.tracker.aggregate()
    }

    pub fn workers(&self) -> usize {
        self.concurrency.workers()
    }

    /// Feed aggregate stats to the concurrency controller
    pub fn adjust_concurrency(&self) -> usize {
        self.concurrency.maybe_adjust(&self.aggregate_stats())
    }

    /// Spawn the periodic upkeep task: concurrency adjustment, quota resets
    /// and due reinstatements every `tick`, until `cancel` fires.
    pub fn spawn_maintenance(
        self: Arc<Self>,
        tick: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Maintenance task stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.adjust_concurrency();
                        self.quota.reset_if_due();
                        let reinstated = self.reinstate_due().await;
                        if !reinstated.is_empty() {
                            tracing::info!("Reinstated {} endpoints", reinstated.len());
                        }
                    }
                }
            }
        })
    }
}
