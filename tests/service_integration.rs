//! RegistryService integration tests
//!
//! Drives the facade through a fake transport on paused tokio time.

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use rpc_sentinel::{
    AggregateStats, BlacklistConfig, BlacklistReason, ConcurrencyConfig, ConcurrencyController,
    Demotion, NetworkConfig, ProbeErrorKind, ProbeMode, RegistryService, SentinelConfig,
    Transport, TransportError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Answer with this chain ID after the delay
    Answer(u64, Duration),
    Refuse,
    /// Never answer
    Hang,
}

/// Fake transport that counts concurrent calls
#[derive(Default)]
struct FakeTransport {
    behaviors: Mutex<HashMap<String, Behavior>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeTransport {
    fn set(&self, url: &str, behavior: Behavior) {
        self.behaviors.lock().insert(url.to_string(), behavior);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn chain_id(&self, url: &str, _timeout: Duration) -> Result<u64, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let behavior = self.behaviors.lock().get(url).copied();
        match behavior {
            Some(Behavior::Answer(id, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(id)
            }
            Some(Behavior::Refuse) | None => {
                Err(TransportError::ConnectionRefused(format!("{} refused", url)))
            }
            Some(Behavior::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn config(network: NetworkConfig) -> SentinelConfig {
    SentinelConfig {
        blacklist: BlacklistConfig::default().with_cooldown(COOLDOWN),
        networks: vec![network],
        ..Default::default()
    }
}

fn setup(network: NetworkConfig) -> (Arc<RegistryService>, Arc<FakeTransport>) {
    setup_with(config(network))
}

fn setup_with(config: SentinelConfig) -> (Arc<RegistryService>, Arc<FakeTransport>) {
    let transport = Arc::new(FakeTransport::default());
    let service = RegistryService::from_config(&config, transport.clone()).unwrap();
    (Arc::new(service), transport)
}

fn urls(ranked: &[rpc_sentinel::Endpoint]) -> Vec<&str> {
    ranked.iter().map(|e| e.url()).collect()
}

// ==================== Scenarios ====================

#[tokio::test(start_paused = true)]
async fn test_mismatch_and_timeout_are_excluded_from_ranking() {
    let (service, transport) = setup(NetworkConfig::new("testnet", 1337).with_endpoints([
        "https://a.example",
        "https://b.example",
        "https://c.example",
    ]));
    transport.set("https://a.example", Behavior::Answer(1337, ms(50)));
    transport.set("https://b.example", Behavior::Answer(9999, ms(50)));
    transport.set("https://c.example", Behavior::Hang);

    let report = service
        .probe_network("testnet", ProbeMode::Quick)
        .await
        .unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.reachable, 1);
    assert_eq!(report.mismatched, 1);
    assert!(!report.degraded);

    let by_url: HashMap<_, _> = report.results.iter().map(|r| (r.url(), r)).collect();
    assert!(by_url["https://a.example"].success);
    assert_eq!(
        by_url["https://b.example"].error,
        Some(ProbeErrorKind::IdentifierMismatch)
    );
    assert_eq!(by_url["https://b.example"].observed_identifier, Some(9999));
    assert_eq!(by_url["https://c.example"].error, Some(ProbeErrorKind::Timeout));

    assert_eq!(urls(&service.rank("testnet", 3)), vec!["https://a.example"]);
}

#[tokio::test(start_paused = true)]
async fn test_blacklist_and_reinstate_cycle() {
    let (service, transport) = setup(
        NetworkConfig::new("testnet", 1)
            .with_endpoints(["https://x.example", "https://y.example"]),
    );
    transport.set("https://x.example", Behavior::Refuse);
    transport.set("https://y.example", Behavior::Answer(1, ms(20)));

    for _ in 0..5 {
        service
            .probe_network("testnet", ProbeMode::Quick)
            .await
            .unwrap();
    }

    let entries = service.blacklist_status("testnet");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].url, "https://x.example");
    assert_eq!(entries[0].reason, BlacklistReason::ConsecutiveFailures);
    assert_eq!(urls(&service.rank("testnet", 3)), vec!["https://y.example"]);

    // blacklisted endpoints are not probed by sweeps
    let report = service
        .probe_network("testnet", ProbeMode::Quick)
        .await
        .unwrap();
    assert_eq!(report.skipped, vec!["https://x.example".to_string()]);

    transport.set("https://x.example", Behavior::Answer(1, ms(50)));
    assert!(!service.try_reinstate("https://x.example").await);

    tokio::time::advance(COOLDOWN).await;
    assert!(service.try_reinstate("https://x.example").await);
    assert!(!service.is_blacklisted("https://x.example"));

    let ranked = service.rank("testnet", 3);
    assert!(urls(&ranked).contains(&"https://x.example"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_reinstatement_restarts_cooldown() {
    let (service, transport) = setup(
        NetworkConfig::new("testnet", 1)
            .with_endpoints(["https://x.example", "https://y.example"]),
    );
    transport.set("https://y.example", Behavior::Answer(1, ms(20)));

    assert_eq!(
        service.blacklist("https://x.example").unwrap(),
        Demotion::Blacklisted(BlacklistReason::Manual)
    );

    tokio::time::advance(COOLDOWN).await;
    // still refusing
    assert!(!service.try_reinstate("https://x.example").await);
    let entry = service.blacklist_manager().get("https://x.example").unwrap();
    assert_eq!(entry.failed_attempts, 1);

    transport.set("https://x.example", Behavior::Answer(1, ms(20)));
    tokio::time::advance(COOLDOWN / 2).await;
    assert!(!service.try_reinstate("https://x.example").await);

    tokio::time::advance(COOLDOWN / 2).await;
    assert!(service.try_reinstate("https://x.example").await);
}

#[tokio::test(start_paused = true)]
async fn test_peak_concurrency_respects_worker_bound() {
    let network = NetworkConfig::new("testnet", 1)
        .with_endpoints((0..10).map(|i| format!("https://node{}.example", i)));
    let mut config = config(network);
    config.concurrency = ConcurrencyConfig::default().with_workers(1, 3, 3);
    let (service, transport) = setup_with(config);
    for i in 0..10 {
        transport.set(
            &format!("https://node{}.example", i),
            Behavior::Answer(1, ms(100 + i * 10)),
        );
    }

    let report = service
        .probe_network("testnet", ProbeMode::Quick)
        .await
        .unwrap();

    assert_eq!(report.workers, 3);
    assert_eq!(report.reachable, 10);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 10);
    assert!(transport.peak() <= 3, "peak was {}", transport.peak());
    assert_eq!(transport.peak(), 3);
    // report lists endpoints in registration order
    let indices: Vec<_> = report.results.iter().map(|r| r.endpoint.index()).collect();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_reinstatement_sweep_respects_worker_bound() {
    let network = NetworkConfig::new("testnet", 1)
        .with_endpoints((0..10).map(|i| format!("https://node{}.example", i)));
    let mut config = config(network);
    config.concurrency = ConcurrencyConfig::default().with_workers(1, 3, 3);
    let (service, transport) = setup_with(config);

    for i in 0..10 {
        let url = format!("https://node{}.example", i);
        transport.set(&url, Behavior::Answer(1, ms(100)));
        if i > 0 {
            assert_eq!(
                service.blacklist(&url).unwrap(),
                Demotion::Blacklisted(BlacklistReason::Manual)
            );
        }
    }

    tokio::time::advance(COOLDOWN).await;
    let reinstated = service.reinstate_due().await;

    assert_eq!(reinstated.len(), 9);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 9);
    assert!(transport.peak() <= 3, "peak was {}", transport.peak());
    assert!(service.blacklist_status("testnet").is_empty());
}

#[test]
fn test_high_error_rate_sheds_two_workers() {
    let controller = ConcurrencyController::new(ConcurrencyConfig::default()).unwrap();
    assert_eq!(controller.workers(), 10);

    let stats = AggregateStats {
        error_rate: 0.5,
        p95_latency: Some(ms(200)),
        avg_score: 0.4,
        samples: 100,
    };
    assert_eq!(controller.maybe_adjust(&stats), 8);
}

// ==================== Ranking ====================

#[tokio::test(start_paused = true)]
async fn test_ranking_is_deterministic() {
    let (service, transport) = setup(NetworkConfig::new("testnet", 1).with_endpoints([
        "https://a.example",
        "https://b.example",
        "https://c.example",
        "https://d.example",
    ]));
    transport.set("https://a.example", Behavior::Answer(1, ms(300)));
    transport.set("https://b.example", Behavior::Answer(1, ms(100)));
    transport.set("https://c.example", Behavior::Answer(1, ms(100)));
    transport.set("https://d.example", Behavior::Answer(1, ms(40)));

    service
        .probe_network("testnet", ProbeMode::Quick)
        .await
        .unwrap();

    let first = service.rank("testnet", 4);
    let second = service.rank("testnet", 4);
    assert_eq!(first, second);
    // equal scores fall back to registration order
    assert_eq!(
        urls(&first),
        vec![
            "https://d.example",
            "https://b.example",
            "https://c.example",
            "https://a.example"
        ]
    );
    assert_eq!(urls(&service.rank("testnet", 2)).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_network_is_degraded() {
    let (service, transport) = setup(
        NetworkConfig::new("testnet", 1).with_endpoints(["https://a.example", "https://b.example"]),
    );
    transport.set("https://a.example", Behavior::Refuse);
    transport.set("https://b.example", Behavior::Refuse);

    let report = service
        .probe_network("testnet", ProbeMode::Quick)
        .await
        .unwrap();
    assert!(report.degraded);
    assert_eq!(report.failed, 2);
    assert!(service.rank("testnet", 3).is_empty());
}

#[test]
fn test_quota_and_spacing_gate_ranking() {
    let network = NetworkConfig::new("testnet", 1).with_endpoints([
        "https://mainnet.infura.io/v3/key",
        "https://public.example",
    ]);
    let mut config = config(network);
    config.quota.classes = vec![rpc_sentinel::ClassQuota::new("infura").with_daily_budget(2)];
    let (service, _) = setup_with(config);

    for _ in 0..2 {
        service
            .record_call_outcome("https://mainnet.infura.io/v3/key", true, ms(30), None)
            .unwrap();
    }

    assert!(!service.can_call("https://mainnet.infura.io/v3/key"));
    assert_eq!(
        urls(&service.rank("testnet", 3)),
        vec!["https://public.example"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_quota_frees_up_after_period() {
    let network = NetworkConfig::new("testnet", 1).with_endpoints([
        "https://mainnet.infura.io/v3/key",
        "https://public.example",
    ]);
    let mut config = config(network);
    config.quota.classes = vec![rpc_sentinel::ClassQuota::new("infura").with_daily_budget(2)];
    let (service, transport) = setup_with(config);
    transport.set("https://mainnet.infura.io/v3/key", Behavior::Answer(1, ms(10)));
    transport.set("https://public.example", Behavior::Answer(1, ms(10)));

    for _ in 0..2 {
        service
            .record_call_outcome("https://mainnet.infura.io/v3/key", true, ms(30), None)
            .unwrap();
    }
    assert!(!service.can_call("https://mainnet.infura.io/v3/key"));

    tokio::time::advance(Duration::from_secs(25 * 3600)).await;

    // neither check needs a prior rank() to see the new period
    assert!(service.can_call("https://mainnet.infura.io/v3/key"));
    let report = service
        .probe_network("testnet", ProbeMode::Quick)
        .await
        .unwrap();
    assert!(report.skipped.is_empty());
    assert_eq!(report.reachable, 2);
}

// ==================== Cancellation & maintenance ====================

#[tokio::test(start_paused = true)]
async fn test_cancellation_returns_finished_results() {
    let (service, transport) = setup(NetworkConfig::new("testnet", 1).with_endpoints([
        "https://fast1.example",
        "https://fast2.example",
        "https://slow1.example",
        "https://slow2.example",
    ]));
    transport.set("https://fast1.example", Behavior::Answer(1, ms(10)));
    transport.set("https://fast2.example", Behavior::Answer(1, ms(20)));
    transport.set("https://slow1.example", Behavior::Hang);
    transport.set("https://slow2.example", Behavior::Hang);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let report = service
        .probe_network_with_cancel("testnet", ProbeMode::Thorough, &cancel)
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.success));
    // no slot stays occupied once the batch returns
    assert_eq!(transport.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_reinstates_due_endpoints() {
    let (service, transport) = setup(
        NetworkConfig::new("testnet", 1)
            .with_endpoints(["https://x.example", "https://y.example"]),
    );
    transport.set("https://x.example", Behavior::Answer(1, ms(10)));
    service.blacklist("https://x.example").unwrap();

    let cancel = CancellationToken::new();
    let handle = service
        .clone()
        .spawn_maintenance(Duration::from_secs(1), cancel.clone());

    tokio::time::sleep(COOLDOWN + Duration::from_secs(2)).await;
    assert!(!service.is_blacklisted("https://x.example"));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_unknown_network_probe_is_an_error() {
    let (service, _) = setup(NetworkConfig::new("testnet", 1).with_endpoint("https://a.example"));
    assert!(service.probe_network("mainnet", ProbeMode::Quick).await.is_err());
}

// ==================== Properties ====================

proptest! {
    #[test]
    fn prop_last_endpoint_is_never_blacklisted(
        size in 1usize..5,
        events in prop::collection::vec((0usize..5, any::<bool>()), 0..120),
    ) {
        let network = NetworkConfig::new("testnet", 1)
            .with_endpoints((0..size).map(|i| format!("https://n{}.example", i)));
        let (service, _) = setup(network);

        for (idx, success) in events {
            let url = format!("https://n{}.example", idx % size);
            service.record_call_outcome(&url, success, ms(10), None).unwrap();
            prop_assert!(!service.list_candidates("testnet", true).unwrap().is_empty());
        }
    }
}
