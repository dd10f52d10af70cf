//! Per provider-class call budgets and spacing

use crate::config::{ClassQuota, QuotaConfig};
use crate::rpc::Endpoint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Budget state of one provider class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaBucket {
    pub class: String,
    /// Calls allowed per period; `None` is unlimited
    pub daily_budget: Option<u64>,
    pub used: u64,
    pub reset_at: Instant,
    pub min_spacing: Duration,
}

impl QuotaBucket {
    pub fn exhausted(&self) -> bool {
        self.daily_budget.is_some_and(|budget| self.used >= budget)
    }

    pub fn remaining(&self) -> Option<u64> {
        self.daily_budget.map(|b| b.saturating_sub(self.used))
    }
}

/// Decides whether an endpoint may be called right now
#[derive(Debug)]
pub struct QuotaGate {
    period: Duration,
    limits: HashMap<String, ClassQuota>,
    score_floor: f64,
    buckets: Mutex<HashMap<String, QuotaBucket>>,
    last_call: Mutex<HashMap<String, Instant>>,
}

impl QuotaGate {
    pub fn new(config: &QuotaConfig, score_floor: f64) -> Self {
        let limits = config
            .classes
            .iter()
            .map(|q| (q.class.clone(), q.clone()))
            .collect();
        Self {
            period: config.period,
            limits,
            score_floor,
            buckets: Mutex::new(HashMap::new()),
            last_call: Mutex::new(HashMap::new()),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn new_bucket(&self, class: &str, now: Instant) -> QuotaBucket {
        let limit = self.limits.get(class);
        QuotaBucket {
            class: class.to_string(),
            daily_budget: limit.and_then(|l| l.daily_budget),
            used: 0,
            reset_at: now + self.period,
            min_spacing: limit.map_or(Duration::ZERO, |l| l.min_spacing),
        }
    }

    fn spacing(&self, class: &str) -> Duration {
        self.limits
            .get(class)
            .map_or(Duration::ZERO, |l| l.min_spacing)
    }

    /// Whether `endpoint` may take a real call.
    ///
    /// `score` is the endpoint's composite score, or `None` when it has no
    /// samples yet; unknown endpoints are not held to the score floor.
    pub fn can_call(&self, endpoint: &Endpoint, score: Option<f64>) -> bool {
        self.can_call_at(endpoint, score, Instant::now())
    }

    pub fn can_call_at(&self, endpoint: &Endpoint, score: Option<f64>, now: Instant) -> bool {
        if score.is_some_and(|s| s < self.score_floor) {
            return false;
        }
        !self.is_rate_limited_at(endpoint, now)
    }

    /// Budget exhausted or called too recently; ignores the score floor
    pub fn is_rate_limited_at(&self, endpoint: &Endpoint, now: Instant) -> bool {
        let class = endpoint.provider_class();
        // A bucket past its reset time counts as fresh even before the reset runs
        if self
            .buckets
            .lock()
            .get(class)
            .is_some_and(|b| now < b.reset_at && b.exhausted())
        {
            return true;
        }

        let spacing = self.spacing(class);
        if spacing.is_zero() {
            return false;
        }
        self.last_call
            .lock()
            .get(endpoint.url())
            .is_some_and(|last| now.saturating_duration_since(*last) < spacing)
    }

    /// Count one real call against the endpoint's class
    pub fn record_call(&self, endpoint: &Endpoint) {
        self.record_call_at(endpoint, Instant::now());
    }

    pub fn record_call_at(&self, endpoint: &Endpoint, now: Instant) {
        let class = endpoint.provider_class();
        {
            let mut buckets = self.buckets.lock();
            let bucket = buckets
                .entry(class.to_string())
                .or_insert_with(|| self.new_bucket(class, now));
            if now >= bucket.reset_at {
                bucket.used = 0;
                bucket.reset_at += self.period;
            }
            bucket.used = bucket.used.saturating_add(1);
            if bucket.exhausted() && bucket.daily_budget == Some(bucket.used) {
                tracing::info!("Quota for {} exhausted until next reset", class);
            }
        }
        self.last_call
            .lock()
            .insert(endpoint.url().to_string(), now);
    }

    /// Reset every bucket whose period has ended; returns how many were reset
    pub fn reset_if_due(&self) -> usize {
        self.reset_if_due_at(Instant::now())
    }

    pub fn reset_if_due_at(&self, now: Instant) -> usize {
        let mut reset = 0;
        for bucket in self.buckets.lock().values_mut() {
            if now >= bucket.reset_at {
                tracing::debug!("Resetting quota for {} ({} calls used)", bucket.class, bucket.used);
                bucket.used = 0;
                bucket.reset_at += self.period;
                reset += 1;
            }
        }
        reset
    }

    pub fn bucket(&self, class: &str) -> Option<QuotaBucket> {
        self.buckets.lock().get(class).cloned()
    }

    pub fn used(&self, class: &str) -> u64 {
        self.buckets.lock().get(class).map_or(0, |b| b.used)
    }

    /// Drop per-endpoint spacing state
    pub fn forget(&self, url: &str) {
        self.last_call.lock().remove(url);
    }
}
