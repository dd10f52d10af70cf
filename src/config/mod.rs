//! Configuration types
//!
//! Every tunable of the sentinel lives here. All sections have defaults, so an
//! empty TOML file is a valid configuration.

mod file;
mod network;

pub use file::SentinelConfig;
pub use network::NetworkConfig;

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Composite score settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Number of outcomes kept per endpoint
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Weight of the success rate
    #[serde(default = "default_success_weight")]
    pub success_weight: f64,
    /// Weight of the latency score
    #[serde(default = "default_latency_weight")]
    pub latency_weight: f64,
    /// p95 latency at which the latency score reaches 0.5
    #[serde(default = "default_score_latency_ceiling", with = "humantime_serde")]
    pub latency_ceiling: Duration,
    /// Endpoints with samples and a score below this are not callable
    #[serde(default = "default_score_floor")]
    pub score_floor: f64,
}

fn default_window_size() -> usize {
    50
}

fn default_success_weight() -> f64 {
    0.6
}

fn default_latency_weight() -> f64 {
    0.4
}

fn default_score_latency_ceiling() -> Duration {
    Duration::from_secs(1)
}

fn default_score_floor() -> f64 {
    0.3
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            success_weight: default_success_weight(),
            latency_weight: default_latency_weight(),
            latency_ceiling: default_score_latency_ceiling(),
            score_floor: default_score_floor(),
        }
    }
}

impl ScoringConfig {
    /// Builder-style setter for the score weights
    pub fn with_weights(mut self, success: f64, latency: f64) -> Self {
        self.success_weight = success;
        self.latency_weight = latency;
        self
    }

    /// Builder-style setter for window_size
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    /// Builder-style setter for latency_ceiling
    pub fn with_latency_ceiling(mut self, ceiling: Duration) -> Self {
        self.latency_ceiling = ceiling;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let (s, l) = (self.success_weight, self.latency_weight);
        if s < 0.0 || l < 0.0 || ((s + l) - 1.0).abs() > 1e-6 {
            return Err(ConfigError::InvalidWeights {
                success: s,
                latency: l,
            }
            .into());
        }
        if self.window_size == 0 {
            return Err(invalid("scoring.window_size", "must be at least 1"));
        }
        if self.latency_ceiling.is_zero() {
            return Err(invalid("scoring.latency_ceiling", "must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.score_floor) {
            return Err(invalid("scoring.score_floor", "must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Blacklist thresholds and recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistConfig {
    /// Consecutive failures before an endpoint is blacklisted
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive slow observations before an endpoint is blacklisted
    #[serde(default = "default_latency_violations")]
    pub latency_violation_threshold: u32,
    /// Latency above which an observation counts as a violation
    #[serde(default = "default_blacklist_latency_ceiling", with = "humantime_serde")]
    pub latency_ceiling: Duration,
    /// Time before a blacklisted endpoint may be re-probed
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_latency_violations() -> u32 {
    3
}

fn default_blacklist_latency_ceiling() -> Duration {
    Duration::from_secs(3)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(300)
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            latency_violation_threshold: default_latency_violations(),
            latency_ceiling: default_blacklist_latency_ceiling(),
            cooldown: default_cooldown(),
        }
    }
}

impl BlacklistConfig {
    /// Builder-style setter for cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Builder-style setter for failure_threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(invalid("blacklist.failure_threshold", "must be at least 1"));
        }
        if self.latency_violation_threshold == 0 {
            return Err(invalid(
                "blacklist.latency_violation_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Adaptive concurrency bounds and decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,
    /// Minimum time between two adjustments
    #[serde(default = "default_adjust_interval", with = "humantime_serde")]
    pub adjust_interval: Duration,
    /// Error rate above which workers are cut by two
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Aggregate p95 latency above which workers are cut by one
    #[serde(default = "default_latency_threshold", with = "humantime_serde")]
    pub latency_threshold: Duration,
    /// Average score above which workers may grow
    #[serde(default = "default_healthy_score")]
    pub healthy_score: f64,
    /// Error rate below which workers may grow
    #[serde(default = "default_healthy_error_rate")]
    pub healthy_error_rate: f64,
}

fn default_min_workers() -> usize {
    5
}

fn default_max_workers() -> usize {
    50
}

fn default_initial_workers() -> usize {
    10
}

fn default_adjust_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_error_rate_threshold() -> f64 {
    0.1
}

fn default_latency_threshold() -> Duration {
    Duration::from_secs(2)
}

fn default_healthy_score() -> f64 {
    0.8
}

fn default_healthy_error_rate() -> f64 {
    0.05
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            initial_workers: default_initial_workers(),
            adjust_interval: default_adjust_interval(),
            error_rate_threshold: default_error_rate_threshold(),
            latency_threshold: default_latency_threshold(),
            healthy_score: default_healthy_score(),
            healthy_error_rate: default_healthy_error_rate(),
        }
    }
}

impl ConcurrencyConfig {
    /// Builder-style setter for worker bounds and the starting count
    pub fn with_workers(mut self, min: usize, initial: usize, max: usize) -> Self {
        self.min_workers = min;
        self.initial_workers = initial;
        self.max_workers = max;
        self
    }
}

/// Probe timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Per-probe timeout in quick mode
    #[serde(default = "default_quick_timeout", with = "humantime_serde")]
    pub quick_timeout: Duration,
    /// Per-probe timeout in thorough mode
    #[serde(default = "default_thorough_timeout", with = "humantime_serde")]
    pub thorough_timeout: Duration,
    /// Whole-batch deadline in quick mode
    #[serde(default = "default_quick_batch_timeout", with = "humantime_serde")]
    pub quick_batch_timeout: Duration,
    /// Whole-batch deadline in thorough mode
    #[serde(default = "default_thorough_batch_timeout", with = "humantime_serde")]
    pub thorough_batch_timeout: Duration,
}

fn default_quick_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_thorough_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_quick_batch_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_thorough_batch_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            quick_timeout: default_quick_timeout(),
            thorough_timeout: default_thorough_timeout(),
            quick_batch_timeout: default_quick_batch_timeout(),
            thorough_batch_timeout: default_thorough_batch_timeout(),
        }
    }
}

/// Maps URL substrings to a provider class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderClassRule {
    /// Class name used as quota bucket key
    pub class: String,
    /// Substrings that identify the class (case-insensitive)
    pub indicators: Vec<String>,
}

impl ProviderClassRule {
    pub fn new<I, S>(class: impl Into<String>, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            class: class.into(),
            indicators: indicators.into_iter().map(Into::into).collect(),
        }
    }
}

/// Daily budget and spacing for one provider class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassQuota {
    pub class: String,
    /// Calls allowed per period (unlimited when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_budget: Option<u64>,
    /// Minimum spacing between two calls to the same endpoint
    #[serde(default, with = "humantime_serde")]
    pub min_spacing: Duration,
}

impl ClassQuota {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            daily_budget: None,
            min_spacing: Duration::ZERO,
        }
    }

    /// Builder-style setter for daily_budget
    pub fn with_daily_budget(mut self, budget: u64) -> Self {
        self.daily_budget = Some(budget);
        self
    }

    /// Builder-style setter for min_spacing
    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = spacing;
        self
    }
}

/// Quota gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Length of a budget period
    #[serde(default = "default_quota_period", with = "humantime_serde")]
    pub period: Duration,
    /// Per-class limits; classes without an entry are unlimited
    #[serde(default = "crate::rpc::default_quotas")]
    pub classes: Vec<ClassQuota>,
}

fn default_quota_period() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            period: default_quota_period(),
            classes: crate::rpc::default_quotas(),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> crate::error::Error {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
    .into()
}
