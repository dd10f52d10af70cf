//! rpc-sentinel - Health scoring and failover for multi-endpoint RPC networks
//!
//! Keeps a registry of candidate endpoints per network, probes them for
//! liveness and chain ID, scores them over a sliding window, blacklists
//! persistently bad ones and hands out ranked endpoints that respect
//! per-provider quotas.
//!
//! # Example
//!
//! ```rust,no_run
//! use rpc_sentinel::{ProbeMode, RegistryService, RpcTransport, SentinelConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SentinelConfig::with_default_networks();
//!     let service = RegistryService::from_config(&config, Arc::new(RpcTransport::new()?))?;
//!
//!     let report = service.probe_network("ethereum", ProbeMode::Quick).await?;
//!     println!("{}/{} reachable", report.reachable, report.results.len());
//!
//!     for endpoint in service.rank("ethereum", 3) {
//!         println!("{}", endpoint.url());
//!     }
//!
//!     service.record_call_outcome(
//!         "https://eth.drpc.org",
//!         true,
//!         Duration::from_millis(120),
//!         None,
//!     )?;
//!     Ok(())
//! }
//! ```

pub mod blacklist;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod health;
pub mod prober;
pub mod quota;
pub mod registry;
pub mod rpc;
pub mod service;

// Re-exports for convenience
pub use blacklist::{BlacklistEntry, BlacklistManager, BlacklistReason, Demotion};
pub use concurrency::{AggregateStats, ConcurrencyController, ConcurrencyState};
pub use config::{
    BlacklistConfig, ClassQuota, ConcurrencyConfig, NetworkConfig, ProbeConfig,
    ProviderClassRule, QuotaConfig, ScoringConfig, SentinelConfig,
};
pub use error::{
    ConfigError, Error, InvariantError, Result, TransportError, ValidationError,
};
pub use health::{EndpointSnapshot, EndpointStats, Outcome, ScoreTracker};
pub use prober::{HealthProber, ProbeErrorKind, ProbeLimits, ProbeMode, ProbeResult};
pub use quota::{QuotaBucket, QuotaGate};
pub use registry::{EndpointRegistry, Network, Registration};
pub use rpc::{Endpoint, ProviderClassifier, RpcTransport, Transport, TransportKind};
pub use service::{EndpointStatus, ProbeReport, RegistryService};
