//! rpc-sentinel CLI - probe, score and rank RPC endpoints

use anyhow::Context;
use clap::{Parser, Subcommand};
use rpc_sentinel::{
    ProbeMode, ProbeReport, RegistryService, RpcTransport, SentinelConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rpc-sentinel")]
#[command(
    version,
    about = "Health scoring, ranking and failover for multi-endpoint RPC networks"
)]
#[command(after_help = r#"EXAMPLES:
    # List configured networks
    rpc-sentinel networks

    # Probe every Ethereum endpoint and print a report
    rpc-sentinel probe ethereum

    # Thorough probe with JSON output
    rpc-sentinel probe polygon --thorough --json

    # Probe, then show the three best endpoints
    rpc-sentinel rank ethereum -n 3

CONFIG FILE:
    Default: ~/.config/rpc-sentinel/config.toml
    Without a config file the built-in public networks are used.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the default one
    #[arg(long, global = true, env = "RPC_SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured networks and their endpoints
    Networks,

    /// Health-check every endpoint of a network
    Probe {
        /// Network key (e.g. "ethereum")
        network: String,

        /// Use the longer thorough timeouts
        #[arg(long)]
        thorough: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe a network, then print its best endpoints
    Rank {
        /// Network key (e.g. "ethereum")
        network: String,

        /// Number of endpoints to show
        #[arg(short = 'n', long, default_value = "3")]
        count: usize,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show config file path
    Path,

    /// Show the effective configuration as TOML
    Show,

    /// Write the built-in defaults to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::new(filter))
        .init();

    match &cli.command {
        Commands::Config { action } => handle_config(action, &cli),
        Commands::Networks => {
            let config = load_config(&cli)?;
            list_networks(&config);
            Ok(())
        }
        Commands::Probe {
            network,
            thorough,
            json,
        } => {
            let service = build_service(&cli)?;
            let mode = if *thorough {
                ProbeMode::Thorough
            } else {
                ProbeMode::Quick
            };
            let report = probe_with_interrupt(&service, network, mode).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Commands::Rank { network, count } => {
            let service = build_service(&cli)?;
            let report = probe_with_interrupt(&service, network, ProbeMode::Quick).await?;
            if report.degraded {
                eprintln!("Warning: no endpoint of {} answered", network);
            }
            print_ranking(&service, network, *count);
            Ok(())
        }
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(SentinelConfig::default_path)
}

/// Load the config file, falling back to the built-in networks
fn load_config(cli: &Cli) -> anyhow::Result<SentinelConfig> {
    let mut config = match &cli.config {
        Some(path) => SentinelConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SentinelConfig::load_default()?.unwrap_or_default(),
    };

    if config.networks.is_empty() {
        tracing::debug!("No networks configured, using built-in defaults");
        config.networks = rpc_sentinel::rpc::default_networks();
    }
    Ok(config)
}

fn build_service(cli: &Cli) -> anyhow::Result<RegistryService> {
    let config = load_config(cli)?;
    let transport = RpcTransport::new().context("Failed to create HTTP client")?;
    Ok(RegistryService::from_config(&config, Arc::new(transport))?)
}

/// Probe a network, stopping early with partial results on Ctrl-C
async fn probe_with_interrupt(
    service: &RegistryService,
    network: &str,
    mode: ProbeMode,
) -> anyhow::Result<ProbeReport> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, reporting finished probes...");
            interrupt.cancel();
        }
    });

    let report = service
        .probe_network_with_cancel(network, mode, &cancel)
        .await?;
    Ok(report)
}

fn list_networks(config: &SentinelConfig) {
    println!("NETWORKS ({} configured)\n", config.networks.len());

    for network in &config.networks {
        println!(
            "{} - {} (chain {}){}",
            network.key,
            network.display_name(),
            network.chain_id,
            if network.enabled { "" } else { " [disabled]" }
        );
        for url in &network.endpoints {
            println!("  {}", url);
        }
        println!();
    }
}

fn print_report(report: &ProbeReport) {
    println!(
        "PROBE {} - {} (chain {}), {} workers\n",
        report.network, report.name, report.identifier, report.workers
    );

    for result in &report.results {
        if result.success {
            println!("  ✓ {:>6}ms  {}", result.latency.as_millis(), result.url());
        } else {
            let reason = result
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "failed".to_string());
            let observed = result
                .observed_identifier
                .map(|id| format!(", reported chain {}", id))
                .unwrap_or_default();
            println!("  ✗ {:>8}  {} ({}{})", "", result.url(), reason, observed);
        }
    }
    for url in &report.skipped {
        println!("  - {:>8}  {} (skipped)", "", url);
    }

    println!(
        "\n{} reachable, {} mismatched, {} failed, {} skipped",
        report.reachable,
        report.mismatched,
        report.failed,
        report.skipped.len()
    );
    if report.degraded {
        println!("Network is DEGRADED: no endpoint answered correctly");
    }
}

fn print_ranking(service: &RegistryService, network: &str, count: usize) {
    let ranked = service.rank(network, count);
    if ranked.is_empty() {
        println!("No usable endpoints for {}", network);
        return;
    }

    println!("TOP {} for {}\n", ranked.len(), network);
    for (i, endpoint) in ranked.iter().enumerate() {
        let tracker = service.tracker();
        let p95 = tracker
            .p95_latency(endpoint.url())
            .map(|d| format!("{}ms", d.as_millis()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>2}. {:.3}  p95 {:>7}  [{}] {}",
            i + 1,
            tracker.score(endpoint.url()),
            p95,
            endpoint.provider_class(),
            endpoint.url()
        );
    }
}

fn handle_config(action: &ConfigCommands, cli: &Cli) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Path => {
            println!("{}", config_path(cli).display());
        }

        ConfigCommands::Show => {
            let config = load_config(cli)?;
            println!("# {}\n", config_path(cli).display());
            println!("{}", toml::to_string_pretty(&config)?);
        }

        ConfigCommands::Init { force } => {
            let path = config_path(cli);
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            SentinelConfig::with_default_networks().save(&path)?;
            println!("Wrote default config to {}", path.display());
        }
    }

    Ok(())
}
