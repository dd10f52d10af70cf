//! Built-in networks, provider classes and quotas
//!
//! The networks are public mainnet endpoints; they are only registered when a
//! caller asks for them (`SentinelConfig::with_default_networks`).

use crate::config::{ClassQuota, NetworkConfig, ProviderClassRule};
use std::time::Duration;

/// Default public networks with a handful of endpoints each
pub fn default_networks() -> Vec<NetworkConfig> {
    vec![
        NetworkConfig::new("ethereum", 1)
            .with_name("Ethereum Mainnet")
            .with_endpoints([
                "https://eth-mainnet.public.blastapi.io",
                "https://rpc.flashbots.net",
                "https://ethereum.publicnode.com",
                "https://eth.drpc.org",
                "https://eth.api.onfinality.io/public",
                "wss://ethereum.publicnode.com",
            ]),
        NetworkConfig::new("polygon", 137)
            .with_name("Polygon")
            .with_endpoints([
                "https://polygon-mainnet.public.blastapi.io",
                "https://polygon-rpc.com",
                "https://polygon.publicnode.com",
                "https://polygon.drpc.org",
            ]),
        NetworkConfig::new("arbitrum", 42161)
            .with_name("Arbitrum One")
            .with_endpoints([
                "https://arb1.arbitrum.io/rpc",
                "https://arbitrum.publicnode.com",
                "https://arbitrum.drpc.org",
            ]),
        NetworkConfig::new("optimism", 10)
            .with_name("OP Mainnet")
            .with_endpoints([
                "https://mainnet.optimism.io",
                "https://optimism.publicnode.com",
                "https://optimism.drpc.org",
            ]),
        NetworkConfig::new("base", 8453)
            .with_name("Base")
            .with_endpoints([
                "https://mainnet.base.org",
                "https://base.publicnode.com",
                "https://base.drpc.org",
            ]),
        NetworkConfig::new("bsc", 56)
            .with_name("BNB Smart Chain")
            .with_endpoints([
                "https://bsc-dataseed.binance.org",
                "https://bsc.publicnode.com",
                "https://bsc.drpc.org",
            ]),
        NetworkConfig::new("avalanche", 43114)
            .with_name("Avalanche C-Chain")
            .with_endpoints([
                "https://api.avax.network/ext/bc/C/rpc",
                "https://avalanche-c-chain.publicnode.com",
                "https://avalanche.drpc.org",
            ]),
    ]
}

/// Default URL substring table for provider classes
pub fn default_provider_classes() -> Vec<ProviderClassRule> {
    vec![
        ProviderClassRule::new("infura", ["infura.io"]),
        ProviderClassRule::new("alchemy", ["alchemy.com", "alchemyapi.io"]),
        ProviderClassRule::new("quicknode", ["quiknode.pro", "quicknode"]),
        ProviderClassRule::new("ankr", ["ankr.com"]),
        ProviderClassRule::new("blast", ["blastapi.io"]),
        ProviderClassRule::new("drpc", ["drpc.org"]),
        ProviderClassRule::new("publicnode", ["publicnode.com"]),
    ]
}

/// Default budgets for the metered provider classes
pub fn default_quotas() -> Vec<ClassQuota> {
    vec![
        ClassQuota::new("infura")
            .with_daily_budget(100_000)
            .with_min_spacing(Duration::from_millis(100)),
        ClassQuota::new("alchemy")
            .with_daily_budget(300_000)
            .with_min_spacing(Duration::from_millis(40)),
        ClassQuota::new("quicknode")
            .with_daily_budget(50_000)
            .with_min_spacing(Duration::from_millis(40)),
        ClassQuota::new("ankr").with_min_spacing(Duration::from_millis(50)),
        ClassQuota::new("drpc").with_min_spacing(Duration::from_millis(25)),
    ]
}
