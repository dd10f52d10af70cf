//! Adaptive worker-count control
//!
//! The worker count is a soft signal read by the prober when it sizes a batch.
//! Readers use a relaxed atomic load and may see a slightly stale value.

use crate::config::ConcurrencyConfig;
use crate::error::{InvariantError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Aggregate health across tracked endpoints, fed to the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    /// Failed samples over all samples
    pub error_rate: f64,
    /// p95 latency of successful samples
    pub p95_latency: Option<Duration>,
    /// Mean composite score of endpoints with data
    pub avg_score: f64,
    /// Number of samples the figures are based on
    pub samples: usize,
}

/// Process-wide worker count with its bounds
#[derive(Debug)]
pub struct ConcurrencyState {
    workers: AtomicUsize,
    min: usize,
    max: usize,
    interval: Duration,
    last_adjusted: Mutex<Option<Instant>>,
}

impl ConcurrencyState {
    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_adjusted(&self) -> Option<Instant> {
        *self.last_adjusted.lock()
    }
}

/// Direction chosen by one adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    ShedErrors,
    ShedLatency,
    Grow,
    Hold,
}

/// Resizes [`ConcurrencyState`] from aggregate health
#[derive(Debug)]
pub struct ConcurrencyController {
    config: ConcurrencyConfig,
    state: ConcurrencyState,
}

impl ConcurrencyController {
    pub fn new(config: ConcurrencyConfig) -> Result<Self> {
        let (min, max) = (config.min_workers, config.max_workers);
        if min == 0 || min > max {
            return Err(InvariantError::InvalidBounds { min, max }.into());
        }
        if !(min..=max).contains(&config.initial_workers) {
            return Err(InvariantError::OutOfBounds {
                value: config.initial_workers,
                min,
                max,
            }
            .into());
        }

        let state = ConcurrencyState {
            workers: AtomicUsize::new(config.initial_workers),
            min,
            max,
            interval: config.adjust_interval,
            last_adjusted: Mutex::new(None),
        };

        Ok(Self { config, state })
    }

    pub fn state(&self) -> &ConcurrencyState {
        &self.state
    }

    pub fn workers(&self) -> usize {
        self.state.workers()
    }

    /// Adjust the worker count at most once per interval
    pub fn maybe_adjust(&self, stats: &AggregateStats) -> usize {
        self.maybe_adjust_at(stats, Instant::now())
    }

    pub fn maybe_adjust_at(&self, stats: &AggregateStats, now: Instant) -> usize {
        // Holding the lock serializes adjusters; readers only touch the atomic.
        let mut last = self.state.last_adjusted.lock();
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < self.state.interval {
                return self.state.workers();
            }
        }
        *last = Some(now);

        let current = self.state.workers();
        let (min, max) = (self.state.min, self.state.max);
        let next = match self.decide(stats) {
            Adjustment::ShedErrors => current.saturating_sub(2).max(min),
            Adjustment::ShedLatency => current.saturating_sub(1).max(min),
            Adjustment::Grow => (current + 1).min(max),
            Adjustment::Hold => current,
        };

        let next = match check_bounds(next, min, max) {
            Ok(v) => v,
            Err(e) => {
                debug_assert!(false, "{}", e);
                tracing::error!("{}; clamping", e);
                next.clamp(min, max)
            }
        };

        if next != current {
            tracing::info!(
                "Concurrency {} -> {} (error rate {:.3}, avg score {:.3})",
                current,
                next,
                stats.error_rate,
                stats.avg_score
            );
        }
        self.state.workers.store(next, Ordering::Relaxed);
        next
    }

    fn decide(&self, stats: &AggregateStats) -> Adjustment {
        let slow = stats
            .p95_latency
            .is_some_and(|p95| p95 > self.config.latency_threshold);

        if stats.error_rate > self.config.error_rate_threshold {
            Adjustment::ShedErrors
        } else if slow {
            Adjustment::ShedLatency
        } else if stats.avg_score > self.config.healthy_score
            && stats.error_rate < self.config.healthy_error_rate
        {
            Adjustment::Grow
        } else {
            Adjustment::Hold
        }
    }
}

fn check_bounds(value: usize, min: usize, max: usize) -> std::result::Result<usize, InvariantError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(InvariantError::OutOfBounds { value, min, max })
    }
}
