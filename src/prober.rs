//! Concurrent identity checks against candidate endpoints
//!
//! A probe connects, asks for `eth_chainId` and compares the answer with the
//! network's expected identifier. Probes never fail: every outcome, including
//! timeouts and mismatches, comes back as a [`ProbeResult`].

use crate::concurrency::ConcurrencyController;
use crate::config::ProbeConfig;
use crate::error::TransportError;
use crate::rpc::{Endpoint, Transport};
use futures::stream::{self, StreamExt};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a probe failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeErrorKind {
    Timeout,
    ConnectionRefused,
    /// Endpoint answered for a different chain: a configuration problem
    IdentifierMismatch,
    MalformedResponse,
    Unknown,
}

impl ProbeErrorKind {
    /// Mismatches point at misconfiguration rather than unavailability
    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, ProbeErrorKind::IdentifierMismatch)
    }
}

impl std::fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::ConnectionRefused => "connection-refused",
            ProbeErrorKind::IdentifierMismatch => "identifier-mismatch",
            ProbeErrorKind::MalformedResponse => "malformed-response",
            ProbeErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl From<&TransportError> for ProbeErrorKind {
    fn from(e: &TransportError) -> Self {
        match e {
            TransportError::Timeout(_) => ProbeErrorKind::Timeout,
            TransportError::ConnectionRefused(_) => ProbeErrorKind::ConnectionRefused,
            TransportError::Malformed(_) | TransportError::Rpc { .. } => {
                ProbeErrorKind::MalformedResponse
            }
            TransportError::Other(_) => ProbeErrorKind::Unknown,
        }
    }
}

/// Probe depth: quick for bulk sweeps, thorough for one-off diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    #[default]
    Quick,
    Thorough,
}

impl ProbeMode {
    pub fn limits(&self, config: &ProbeConfig) -> ProbeLimits {
        match self {
            ProbeMode::Quick => ProbeLimits {
                per_probe: config.quick_timeout,
                batch: config.quick_batch_timeout,
            },
            ProbeMode::Thorough => ProbeLimits {
                per_probe: config.thorough_timeout,
                batch: config.thorough_batch_timeout,
            },
        }
    }
}

/// Timeouts applied to one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeLimits {
    pub per_probe: Duration,
    pub batch: Duration,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Outcome of one health check
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub endpoint: Endpoint,
    pub success: bool,
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
    pub observed_identifier: Option<u64>,
    pub error: Option<ProbeErrorKind>,
    /// Transport message behind the classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip)]
    pub at: Instant,
}

impl ProbeResult {
    fn failed(endpoint: Endpoint, latency: Duration, kind: ProbeErrorKind) -> Self {
        Self {
            endpoint,
            success: false,
            latency,
            observed_identifier: None,
            error: Some(kind),
            detail: None,
            at: Instant::now(),
        }
    }

    pub fn url(&self) -> &str {
        self.endpoint.url()
    }
}

/// Runs probes through an injected [`Transport`], sized by the current
/// worker count.
pub struct HealthProber {
    transport: Arc<dyn Transport>,
    concurrency: Arc<ConcurrencyController>,
}

impl HealthProber {
    pub fn new(transport: Arc<dyn Transport>, concurrency: Arc<ConcurrencyController>) -> Self {
        Self {
            transport,
            concurrency,
        }
    }

    /// Probe a single endpoint
    pub async fn probe(&self, endpoint: &Endpoint, timeout: Duration, expected: u64) -> ProbeResult {
        probe_endpoint(self.transport.as_ref(), endpoint.clone(), timeout, expected).await
    }

    /// Probe `endpoints` concurrently, at most `workers` at a time.
    ///
    /// Stops at the batch deadline (outstanding probes become `Timeout`
    /// failures) or on cancellation (only finished results are returned).
    /// Results are in completion order.
    pub async fn probe_batch(
        &self,
        endpoints: &[Endpoint],
        expected: u64,
        limits: ProbeLimits,
        cancel: &CancellationToken,
    ) -> Vec<ProbeResult> {
        if endpoints.is_empty() {
            return Vec::new();
        }

        let workers = self.concurrency.workers().max(1);
        let started = Instant::now();
        let deadline = started + limits.batch;
        let transport = self.transport.as_ref();

        let mut probes = stream::iter(endpoints.iter().cloned())
            .map(|endpoint| probe_endpoint(transport, endpoint, limits.per_probe, expected))
            .buffer_unordered(workers);

        let mut results = Vec::with_capacity(endpoints.len());
        let mut timed_out = false;
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(
                        "Probe batch cancelled with {}/{} results",
                        results.len(),
                        endpoints.len()
                    );
                    break;
                }
                _ = &mut expiry => {
                    timed_out = true;
                    break;
                }
                next = probes.next() => match next {
                    Some(result) => results.push(result),
                    None => break,
                },
            }
        }
        // Dropping the stream cancels in-flight probes and frees their slots
        drop(probes);

        if timed_out {
            let done: HashSet<String> = results.iter().map(|r| r.url().to_string()).collect();
            let elapsed = started.elapsed();
            let missing: Vec<_> = endpoints
                .iter()
                .filter(|e| !done.contains(e.url()))
                .cloned()
                .collect();
            tracing::debug!(
                "Probe batch deadline hit, {} endpoints without an answer",
                missing.len()
            );
            for endpoint in missing {
                let mut result = ProbeResult::failed(endpoint, elapsed, ProbeErrorKind::Timeout);
                result.detail = Some("batch deadline exceeded".to_string());
                results.push(result);
            }
        }

        results
    }
}

async fn probe_endpoint(
    transport: &dyn Transport,
    endpoint: Endpoint,
    timeout: Duration,
    expected: u64,
) -> ProbeResult {
    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, transport.chain_id(endpoint.url(), timeout)).await;
    let latency = start.elapsed();

    match outcome {
        Err(_) => {
            tracing::debug!("Probe of {} timed out after {:?}", endpoint.url(), timeout);
            ProbeResult::failed(endpoint, latency, ProbeErrorKind::Timeout)
        }
        Ok(Err(e)) => {
            let kind = ProbeErrorKind::from(&e);
            tracing::debug!("Probe of {} failed ({}): {}", endpoint.url(), kind, e);
            let mut result = ProbeResult::failed(endpoint, latency, kind);
            result.detail = Some(e.to_string());
            result
        }
        Ok(Ok(id)) if id == expected => {
            tracing::trace!("Probe of {} ok in {:?}", endpoint.url(), latency);
            ProbeResult {
                endpoint,
                success: true,
                latency,
                observed_identifier: Some(id),
                error: None,
                detail: None,
                at: Instant::now(),
            }
        }
        Ok(Ok(id)) => {
            tracing::warn!(
                "Endpoint {} on {} reports chain {} but {} was expected; check its configuration",
                endpoint.url(),
                endpoint.network(),
                id,
                expected
            );
            let mut result =
                ProbeResult::failed(endpoint, latency, ProbeErrorKind::IdentifierMismatch);
            result.observed_identifier = Some(id);
            result.detail = Some(format!("expected chain {}, got {}", expected, id));
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyConfig;
    use crate::rpc::TransportKind;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Scripted transport: per-URL delay and answer
    struct Scripted(HashMap<String, (Duration, Result<u64, TransportError>)>);

    #[async_trait]
    impl Transport for Scripted {
        async fn chain_id(&self, url: &str, _timeout: Duration) -> Result<u64, TransportError> {
            let (delay, answer) = self.0.get(url).cloned().unwrap_or((
                Duration::ZERO,
                Err(TransportError::Other("unscripted".to_string())),
            ));
            tokio::time::sleep(delay).await;
            answer
        }
    }

    fn endpoint(url: &str, index: usize) -> Endpoint {
        Endpoint::new(url, "testnet", TransportKind::Http, "public", index)
    }

    fn prober(script: Vec<(&str, u64, Result<u64, TransportError>)>, workers: usize) -> HealthProber {
        let map = script
            .into_iter()
            .map(|(url, ms, answer)| (url.to_string(), (Duration::from_millis(ms), answer)))
            .collect();
        let concurrency = ConcurrencyController::new(
            ConcurrencyConfig::default().with_workers(1, workers, workers.max(1)),
        )
        .unwrap();
        HealthProber::new(Arc::new(Scripted(map)), Arc::new(concurrency))
    }

    fn limits(per_probe_ms: u64, batch_ms: u64) -> ProbeLimits {
        ProbeLimits {
            per_probe: Duration::from_millis(per_probe_ms),
            batch: Duration::from_millis(batch_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifies_outcomes() {
        let p = prober(
            vec![
                ("https://ok.com", 50, Ok(1337)),
                ("https://wrong.com", 50, Ok(9999)),
                ("https://slow.com", 10_000, Ok(1337)),
                (
                    "https://refused.com",
                    5,
                    Err(TransportError::ConnectionRefused("nope".into())),
                ),
                ("https://junk.com", 5, Err(TransportError::Malformed("junk".into()))),
            ],
            5,
        );
        let endpoints: Vec<_> = [
            "https://ok.com",
            "https://wrong.com",
            "https://slow.com",
            "https://refused.com",
            "https://junk.com",
        ]
        .iter()
        .enumerate()
        .map(|(i, u)| endpoint(u, i))
        .collect();

        let results = p
            .probe_batch(&endpoints, 1337, limits(3_000, 30_000), &CancellationToken::new())
            .await;
        assert_eq!(results.len(), 5);

        let by_url: HashMap<_, _> = results.iter().map(|r| (r.url(), r)).collect();
        assert!(by_url["https://ok.com"].success);
        assert_eq!(by_url["https://ok.com"].observed_identifier, Some(1337));

        let wrong = by_url["https://wrong.com"];
        assert!(!wrong.success);
        assert_eq!(wrong.error, Some(ProbeErrorKind::IdentifierMismatch));
        assert_eq!(wrong.observed_identifier, Some(9999));
        assert!(wrong.error.unwrap().is_misconfiguration());

        assert_eq!(by_url["https://slow.com"].error, Some(ProbeErrorKind::Timeout));
        assert_eq!(
            by_url["https://refused.com"].error,
            Some(ProbeErrorKind::ConnectionRefused)
        );
        assert_eq!(
            by_url["https://junk.com"].error,
            Some(ProbeErrorKind::MalformedResponse)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_deadline_fills_timeouts() {
        let p = prober(
            vec![
                ("https://fast.com", 10, Ok(1)),
                ("https://slow.com", 5_000, Ok(1)),
            ],
            2,
        );
        let endpoints = vec![endpoint("https://fast.com", 0), endpoint("https://slow.com", 1)];

        let results = p
            .probe_batch(&endpoints, 1, limits(10_000, 1_000), &CancellationToken::new())
            .await;
        assert_eq!(results.len(), 2);

        let slow = results.iter().find(|r| r.url() == "https://slow.com").unwrap();
        assert_eq!(slow.error, Some(ProbeErrorKind::Timeout));
        assert_eq!(slow.detail.as_deref(), Some("batch deadline exceeded"));
        assert!(results.iter().any(|r| r.url() == "https://fast.com" && r.success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_partial_results() {
        let p = prober(
            vec![
                ("https://fast.com", 10, Ok(1)),
                ("https://slow.com", 5_000, Ok(1)),
            ],
            2,
        );
        let endpoints = vec![endpoint("https://fast.com", 0), endpoint("https://slow.com", 1)];
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let results = p
            .probe_batch(&endpoints, 1, limits(10_000, 60_000), &cancel)
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url(), "https://fast.com");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let p = prober(Vec::new(), 1);
        let results = p
            .probe_batch(&[], 1, limits(100, 100), &CancellationToken::new())
            .await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_mode_limits() {
        let config = ProbeConfig::default();
        assert_eq!(ProbeMode::Quick.limits(&config).per_probe, Duration::from_secs(3));
        assert_eq!(
            ProbeMode::Thorough.limits(&config).per_probe,
            Duration::from_secs(10)
        );
    }
}
