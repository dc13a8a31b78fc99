//! logpoller CLI: run per-chain log pollers and query confirmed logs.
//!
//! # Commands
//! ```text
//! logpoller run    --config <file.json>
//! logpoller latest --database-url <url> --chain-id <id> --address <0x…> --event-sig <sig|0x…> --confs <n>
//! logpoller info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use logpoller_core::config::PollerConfig;
use logpoller_core::jobs;
use logpoller_core::query::LogQuery;
use logpoller_core::types::ChainId;
use logpoller_evm::{JsonRpcSource, LogPollerBuilder};

mod backend;
mod settings;

use backend::Backend;
use settings::{init_tracing, LogConfig, Settings};

#[derive(Parser)]
#[command(
    name = "logpoller",
    about = "Reorg-safe EVM log poller with confirmation-aware queries",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every configured chain until Ctrl-C
    Run {
        /// Path to the JSON config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the latest log with at least N confirmations
    Latest {
        /// SQLite path/URL or postgres:// URL
        #[arg(long)]
        database_url: String,
        #[arg(long)]
        chain_id: u64,
        /// Emitting contract (0x-prefixed)
        #[arg(long)]
        address: String,
        /// topic0 as 0x-prefixed hash, or a Solidity event signature
        #[arg(long)]
        event_sig: String,
        #[arg(long, default_value_t = 0)]
        confs: u64,
    },

    /// Show default poller settings
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => cmd_run(config).await,
        Commands::Latest {
            database_url,
            chain_id,
            address,
            event_sig,
            confs,
        } => cmd_latest(&database_url, ChainId(chain_id), &address, &event_sig, confs).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn cmd_run(config: PathBuf) -> Result<()> {
    let settings = Settings::load(&config)?;
    init_tracing(&settings.log);

    let first = settings.chains[0].poller.chain_id;
    let backend = Backend::open(&settings.database_url, first).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::with_capacity(settings.chains.len());
    for chain in &settings.chains {
        let chain_id = chain.poller.chain_id;
        let source = Arc::new(
            JsonRpcSource::new(chain.rpc_url.clone(), chain_id, chain.request_timeout())
                .with_context(|| format!("chain {chain_id}"))?,
        );
        let poller = LogPollerBuilder::from_config(chain.poller.clone())
            .build(backend.for_chain(chain_id), source)
            .with_context(|| format!("chain {chain_id}"))?;

        for job in &chain.jobs {
            if let Some(trigger) = job.log_trigger() {
                poller.register_filter(&trigger.filter());
                tracing::info!(
                    chain_id = %chain_id,
                    job = job.type_name(),
                    address = %trigger.address,
                    confs = trigger.confs,
                    "job trigger registered"
                );
            }
        }

        tracing::info!(
            chain_id = %chain_id,
            rpc_url = %chain.rpc_url,
            backend = backend.name(),
            "starting poller"
        );
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { poller.run(rx).await }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested, waiting for in-flight cycles");
    shutdown_tx.send(true).ok();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "poller task panicked");
        }
    }
    Ok(())
}

async fn cmd_latest(
    database_url: &str,
    chain_id: ChainId,
    address: &str,
    event_sig: &str,
    confs: u64,
) -> Result<()> {
    init_tracing(&LogConfig {
        level: "warn".into(),
        ..LogConfig::default()
    });

    backend::ensure_persistent(database_url)?;

    let address: Address = address
        .parse()
        .with_context(|| format!("invalid address {address}"))?;
    let event_sig = parse_event_sig(event_sig)?;

    let backend = Backend::open(database_url, chain_id).await?;
    let query = LogQuery::new(backend.for_chain(chain_id));

    match query.latest_confirmed(event_sig, address, confs).await? {
        Some(log) => println!("{}", serde_json::to_string_pretty(&log)?),
        None => println!("no log with {confs} confirmations"),
    }
    Ok(())
}

/// A 0x-prefixed 32-byte hash is used as is; anything else is hashed as a
/// Solidity event signature.
fn parse_event_sig(raw: &str) -> Result<B256> {
    if raw.starts_with("0x") {
        raw.parse::<B256>()
            .with_context(|| format!("invalid event signature hash {raw}"))
    } else {
        Ok(jobs::event_sig(raw))
    }
}

fn cmd_info() {
    let defaults = PollerConfig::default();
    println!("logpoller v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default poll interval: {} ms", defaults.poll_interval_ms);
    println!("  Default max reorg depth: {} blocks", defaults.max_reorg_depth);
    println!(
        "  Default max confirmation depth: {} blocks",
        defaults.max_confirmation_depth
    );
    println!(
        "  Default max blocks per cycle: {}",
        defaults.max_blocks_per_cycle
    );
    println!("  Default log batch size: {} blocks/call", defaults.log_batch_size);
    println!("  Retention: keep everything unless retention_depth is set");
    println!("  Storage backends: memory, SQLite, PostgreSQL");
}
