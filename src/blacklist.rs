//! Temporary exclusion of misbehaving endpoints
//!
//! Endpoints are demoted after a run of failures or slow responses and come
//! back only after a cooldown AND a successful re-probe. A failed re-probe
//! restarts the cooldown from the time of that attempt.
//!
//! The manager never blacklists the last usable endpoint of a network.

use crate::config::BlacklistConfig;
use crate::rpc::Endpoint;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Why an endpoint was blacklisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlacklistReason {
    ConsecutiveLatencyViolations,
    ConsecutiveFailures,
    Manual,
}

impl std::fmt::Display for BlacklistReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlacklistReason::ConsecutiveLatencyViolations => {
                write!(f, "consecutive-latency-violations")
            }
            BlacklistReason::ConsecutiveFailures => write!(f, "consecutive-failures"),
            BlacklistReason::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub url: String,
    pub network: String,
    pub reason: BlacklistReason,
    pub blacklisted_at: Instant,
    /// Earliest time a re-probe may be attempted
    pub eligible_at: Instant,
    /// Re-probes that failed since the endpoint was blacklisted
    pub failed_attempts: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct Streaks {
    failures: u32,
    slow: u32,
}

/// Outcome of an attempt to blacklist an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demotion {
    /// Threshold not reached
    Below,
    /// Endpoint is now blacklisted
    Blacklisted(BlacklistReason),
    /// Already blacklisted
    AlreadyListed,
    /// Threshold reached but the endpoint is the network's last usable one
    Guarded,
}

#[derive(Debug)]
pub struct BlacklistManager {
    config: BlacklistConfig,
    entries: Mutex<HashMap<String, BlacklistEntry>>,
    streaks: Mutex<HashMap<String, Streaks>>,
}

impl BlacklistManager {
    pub fn new(config: BlacklistConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            streaks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BlacklistConfig {
        &self.config
    }

    pub fn cooldown(&self) -> Duration {
        self.config.cooldown
    }

    /// Count a failure; blacklists after `required_consecutive` in a row.
    ///
    /// `network_size` is the number of endpoints registered in the endpoint's
    /// network and drives the last-endpoint guard.
    pub fn observe_failure(
        &self,
        endpoint: &Endpoint,
        required_consecutive: u32,
        network_size: usize,
    ) -> Demotion {
        let streak = {
            let mut streaks = self.streaks.lock();
            let s = streaks.entry(endpoint.url().to_string()).or_default();
            s.failures = s.failures.saturating_add(1);
            s.failures
        };

        if streak < required_consecutive {
            return Demotion::Below;
        }
        self.demote(
            endpoint,
            BlacklistReason::ConsecutiveFailures,
            network_size,
            streak == required_consecutive,
            Instant::now(),
        )
    }

    /// A success breaks the failure streak
    pub fn observe_success(&self, url: &str) {
        if let Some(s) = self.streaks.lock().get_mut(url) {
            s.failures = 0;
        }
    }

    /// Count a latency observation; blacklists after `required_consecutive`
    /// observations above `ceiling` in a row.
    pub fn observe_latency(
        &self,
        endpoint: &Endpoint,
        latency: Duration,
        ceiling: Duration,
        required_consecutive: u32,
        network_size: usize,
    ) -> Demotion {
        let streak = {
            let mut streaks = self.streaks.lock();
            let s = streaks.entry(endpoint.url().to_string()).or_default();
            if latency > ceiling {
                s.slow = s.slow.saturating_add(1);
            } else {
                s.slow = 0;
            }
            s.slow
        };

        if streak == 0 || streak < required_consecutive {
            return Demotion::Below;
        }
        self.demote(
            endpoint,
            BlacklistReason::ConsecutiveLatencyViolations,
            network_size,
            streak == required_consecutive,
            Instant::now(),
        )
    }

    /// Operator-requested blacklisting, subject to the same guard
    pub fn blacklist_manual(&self, endpoint: &Endpoint, network_size: usize) -> Demotion {
        self.demote(
            endpoint,
            BlacklistReason::Manual,
            network_size,
            true,
            Instant::now(),
        )
    }

    fn demote(
        &self,
        endpoint: &Endpoint,
        reason: BlacklistReason,
        network_size: usize,
        first_crossing: bool,
        now: Instant,
    ) -> Demotion {
        let mut entries = self.entries.lock();
        if entries.contains_key(endpoint.url()) {
            return Demotion::AlreadyListed;
        }

        let listed = entries
            .values()
            .filter(|e| e.network == endpoint.network())
            .count();
        if network_size.saturating_sub(listed) <= 1 {
            if first_crossing {
                tracing::warn!(
                    "Not blacklisting {} ({}): last usable endpoint of {}",
                    endpoint.url(),
                    reason,
                    endpoint.network()
                );
            } else {
                tracing::debug!("{} still degraded but kept as last endpoint", endpoint.url());
            }
            return Demotion::Guarded;
        }

        tracing::info!(
            "Blacklisted {} on {} ({})",
            endpoint.url(),
            endpoint.network(),
            reason
        );
        entries.insert(
            endpoint.url().to_string(),
            BlacklistEntry {
                url: endpoint.url().to_string(),
                network: endpoint.network().to_string(),
                reason,
                blacklisted_at: now,
                eligible_at: now + self.config.cooldown,
                failed_attempts: 0,
            },
        );
        Demotion::Blacklisted(reason)
    }

    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.entries.lock().contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<BlacklistEntry> {
        self.entries.lock().get(url).cloned()
    }

    /// Entries of one network, oldest first
    pub fn entries(&self, network: &str) -> Vec<BlacklistEntry> {
        let mut list: Vec<_> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.network == network)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.blacklisted_at.cmp(&b.blacklisted_at).then(a.url.cmp(&b.url)));
        list
    }

    pub fn count(&self, network: &str) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.network == network)
            .count()
    }

    /// Whether the cooldown of a blacklisted endpoint has elapsed
    pub fn reinstatement_due(&self, url: &str, now: Instant) -> bool {
        self.entries
            .lock()
            .get(url)
            .is_some_and(|e| now >= e.eligible_at)
    }

    /// URLs whose cooldown has elapsed
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut urls: Vec<_> = self
            .entries
            .lock()
            .values()
            .filter(|e| now >= e.eligible_at)
            .map(|e| e.url.clone())
            .collect();
        urls.sort();
        urls
    }

    /// Run `probe` and reinstate on success.
    ///
    /// Returns false without probing if the endpoint is not blacklisted or its
    /// cooldown has not elapsed. A failed probe pushes the next eligible time
    /// one full cooldown past the attempt.
    pub async fn try_reinstate<Fut>(&self, url: &str, probe: Fut) -> bool
    where
        Fut: Future<Output = bool>,
    {
        if !self.reinstatement_due(url, Instant::now()) {
            return false;
        }

        if probe.await {
            if self.reinstate(url).is_some() {
                tracing::info!("Reinstated {} after successful re-probe", url);
            }
            true
        } else {
            let now = Instant::now();
            if let Some(entry) = self.entries.lock().get_mut(url) {
                entry.failed_attempts = entry.failed_attempts.saturating_add(1);
                entry.eligible_at = now + self.config.cooldown;
                tracing::debug!(
                    "Re-probe of {} failed ({} attempts), next try in {:?}",
                    url,
                    entry.failed_attempts,
                    self.config.cooldown
                );
            }
            false
        }
    }

    /// Remove the entry unconditionally and clear streaks
    pub fn reinstate(&self, url: &str) -> Option<BlacklistEntry> {
        let entry = self.entries.lock().remove(url);
        self.streaks.lock().remove(url);
        entry
    }

    /// Forget an endpoint entirely (it left its network)
    pub fn remove(&self, url: &str) {
        self.entries.lock().remove(url);
        self.streaks.lock().remove(url);
    }
}
