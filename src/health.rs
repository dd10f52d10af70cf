//! Rolling outcome windows and composite scoring per endpoint

use crate::concurrency::AggregateStats;
use crate::config::ScoringConfig;
use crate::rpc::Endpoint;
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one probe or real call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub latency: Duration,
}

impl Outcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
        }
    }

    pub fn failure(latency: Duration) -> Self {
        Self {
            success: false,
            latency,
        }
    }
}

/// Bounded window of recent outcomes for one endpoint
#[derive(Debug, Clone)]
pub struct EndpointStats {
    samples: VecDeque<Outcome>,
    capacity: usize,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

impl EndpointStats {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    fn push(&mut self, outcome: Outcome, now: Instant) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(outcome);

        if outcome.success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure = Some(now);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples currently held, oldest first
    pub fn samples(&self) -> impl Iterator<Item = &Outcome> {
        self.samples.iter()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    fn successes(&self) -> usize {
        self.samples.iter().filter(|s| s.success).count()
    }

    /// Successes over samples in the window (0 with no samples)
    pub fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.successes() as f64 / self.samples.len() as f64
    }

    /// 95th percentile latency of successful samples (nearest rank)
    pub fn p95_latency(&self) -> Option<Duration> {
        let mut latencies: Vec<Duration> = self
            .samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.latency)
            .collect();
        percentile(&mut latencies, 0.95)
    }

    /// Composite score in [0, 1]; 0 when there is no data
    pub fn score(&self, config: &ScoringConfig) -> f64 {
        let latency_score = match self.p95_latency() {
            Some(p95) => {
                let ceiling = config.latency_ceiling.as_secs_f64() * 2.0;
                (1.0 - p95.as_secs_f64() / ceiling).clamp(0.0, 1.0)
            }
            None => 0.0,
        };

        let score =
            config.success_weight * self.success_rate() + config.latency_weight * latency_score;
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

pub(crate) fn percentile(values: &mut [Duration], q: f64) -> Option<Duration> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let rank = (q * values.len() as f64).ceil() as usize;
    Some(values[rank.clamp(1, values.len()) - 1])
}

/// Serializable view of one endpoint's window
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub url: String,
    pub samples: usize,
    pub success_rate: f64,
    pub p95_latency_ms: Option<u64>,
    pub score: f64,
    pub consecutive_failures: u32,
}

/// Thread-safe store of [`EndpointStats`] keyed by URL
#[derive(Debug)]
pub struct ScoreTracker {
    config: ScoringConfig,
    stats: RwLock<HashMap<String, EndpointStats>>,
}

impl ScoreTracker {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            stats: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Append an outcome to the endpoint's window
    pub fn record(&self, url: &str, outcome: Outcome) {
        self.record_at(url, outcome, Instant::now());
    }

    pub fn record_at(&self, url: &str, outcome: Outcome, now: Instant) {
        let mut stats = self.stats.write();
        stats
            .entry(url.to_string())
            .or_insert_with(|| EndpointStats::new(self.config.window_size))
            .push(outcome, now);
    }

    pub fn score(&self, url: &str) -> f64 {
        self.stats
            .read()
            .get(url)
            .map(|s| s.score(&self.config))
            .unwrap_or(0.0)
    }

    pub fn p95_latency(&self, url: &str) -> Option<Duration> {
        self.stats.read().get(url).and_then(|s| s.p95_latency())
    }

    pub fn has_samples(&self, url: &str) -> bool {
        self.stats.read().get(url).is_some_and(|s| !s.is_empty())
    }

    pub fn sample_count(&self, url: &str) -> usize {
        self.stats.read().get(url).map_or(0, |s| s.len())
    }

    pub fn consecutive_failures(&self, url: &str) -> u32 {
        self.stats
            .read()
            .get(url)
            .map_or(0, |s| s.consecutive_failures())
    }

    pub fn reset_failures(&self, url: &str) {
        if let Some(stats) = self.stats.write().get_mut(url) {
            stats.consecutive_failures = 0;
        }
    }

    /// Forget everything about an endpoint
    pub fn remove(&self, url: &str) {
        self.stats.write().remove(url);
    }

    pub fn get(&self, url: &str) -> Option<EndpointStats> {
        self.stats.read().get(url).cloned()
    }

    pub fn snapshot(&self, url: &str) -> Option<EndpointSnapshot> {
        let stats = self.stats.read();
        let s = stats.get(url)?;
        Some(EndpointSnapshot {
            url: url.to_string(),
            samples: s.len(),
            success_rate: s.success_rate(),
            p95_latency_ms: s.p95_latency().map(|d| d.as_millis() as u64),
            score: s.score(&self.config),
            consecutive_failures: s.consecutive_failures(),
        })
    }

    /// Order candidates best first: score desc, p95 asc (unknown last), then
    /// registration order. Truncated to `count`.
    pub fn rank<'a, I>(&self, candidates: I, count: usize) -> Vec<Endpoint>
    where
        I: IntoIterator<Item = &'a Endpoint>,
    {
        let stats = self.stats.read();
        let mut scored: Vec<(f64, Option<Duration>, &Endpoint)> = candidates
            .into_iter()
            .map(|e| {
                let s = stats.get(e.url());
                (
                    s.map_or(0.0, |s| s.score(&self.config)),
                    s.and_then(|s| s.p95_latency()),
                    e,
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| match (a.1, b.1) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
                .then_with(|| a.2.index().cmp(&b.2.index()))
        });

        scored
            .into_iter()
            .take(count)
            .map(|(_, _, e)| e.clone())
            .collect()
    }

    /// Error rate, p95 and mean score across every tracked endpoint
    pub fn aggregate(&self) -> AggregateStats {
        let stats = self.stats.read();
        let mut total = 0usize;
        let mut failures = 0usize;
        let mut latencies = Vec::new();
        let mut score_sum = 0.0;
        let mut scored = 0usize;

        for s in stats.values().filter(|s| !s.is_empty()) {
            total += s.len();
            for sample in s.samples() {
                if sample.success {
                    latencies.push(sample.latency);
                } else {
                    failures += 1;
                }
            }
            score_sum += s.score(&self.config);
            scored += 1;
        }

        AggregateStats {
            error_rate: if total == 0 {
                0.0
            } else {
                failures as f64 / total as f64
            },
            p95_latency: percentile(&mut latencies, 0.95),
            avg_score: if scored == 0 {
                0.0
            } else {
                score_sum / scored as f64
            },
            samples: total,
        }
    }
}
