//! NFT Bridge Relay
//!
//! Locks NFTs on the source chain and mints bridged copies on the
//! destination chain.
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌───────────────┐
//! │  Source  │───▶│ Orchestrator │───▶│  Destination  │
//! │  (lock)  │    │ (FSM+Ledger) │    │    (mint)     │
//! └──────────┘    └──────────────┘    └───────────────┘
//! ```
//!
//! Usage:
//!   nft_bridge [--env dev] [--asset <id>]...
//!
//! With `--asset`, bridges the given assets and exits. Without, runs the
//! recovery scanner until stopped.

use std::sync::Arc;

use anyhow::Context;

use nft_bridge::bridge::{
    MemoryLedger, PgLedger, RecoveryScanner, TransferLedger, TransferOrchestrator, TransferPool,
    TransferStage, WorkerConfig,
};
use nft_bridge::chain::EvmChainClient;
use nft_bridge::config::AppConfig;
use nft_bridge::core_types::AssetId;
use nft_bridge::db::{Database, init_schema};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Every `--asset <id>` argument
fn get_assets() -> anyhow::Result<Vec<AssetId>> {
    let args: Vec<String> = std::env::args().collect();
    let mut assets = Vec::new();
    for i in 0..args.len() {
        if args[i] == "--asset" {
            let raw = args
                .get(i + 1)
                .context("--asset requires a token id")?;
            let id: AssetId = raw
                .parse()
                .with_context(|| format!("invalid token id '{}'", raw))?;
            assets.push(id);
        }
    }
    Ok(assets)
}

async fn open_ledger(config: &AppConfig) -> anyhow::Result<Arc<dyn TransferLedger>> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            init_schema(db.pool())
                .await
                .context("Failed to initialize bridge schema")?;
            Ok(Arc::new(PgLedger::new(db.pool().clone())))
        }
        None => {
            tracing::warn!(
                "No postgres_url configured: transfers are kept in memory and will not survive a restart"
            );
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let assets = get_assets()?;

    let app_config = AppConfig::load(&env)?;
    let _log_guard = nft_bridge::logging::init_logging(&app_config);

    tracing::info!("Starting NFT bridge relay in {} mode", env);

    let bridge = &app_config.bridge;
    tracing::info!(
        relay_id = %bridge.relay_id,
        lease_ttl_ms = bridge.lease_ttl_ms,
        "Relay identity"
    );
    let source = Arc::new(EvmChainClient::new(bridge.source.clone())?);
    let destination = Arc::new(EvmChainClient::new(bridge.destination.clone())?);
    tracing::info!(
        source = %bridge.source.chain_id,
        destination = %bridge.destination.chain_id,
        "Chain clients ready"
    );

    let ledger = open_ledger(&app_config).await?;
    let orchestrator = Arc::new(TransferOrchestrator::new(
        ledger,
        source,
        destination,
        bridge,
    ));
    let pool = Arc::new(TransferPool::new(
        orchestrator,
        bridge.max_concurrent_transfers,
    ));
    let scanner = RecoveryScanner::new(pool.clone(), WorkerConfig::from(&bridge.recovery));

    // Finish whatever a previous run left behind before taking new work
    let report = scanner.recover_once().await?;
    if report.scanned > 0 {
        println!(
            "Recovered: {} completed, {} failed, {} pending, {} skipped",
            report.completed, report.failed, report.still_pending, report.skipped
        );
    }

    if assets.is_empty() {
        scanner.run().await;
    }

    let start = std::time::Instant::now();
    let mut failures = 0usize;
    for (asset_id, result) in pool.transfer_all(assets).await {
        match result {
            Ok(record) if record.stage == TransferStage::MintConfirmed => {
                let mint = record.mint_tx.as_ref().map(|t| t.hash.as_str()).unwrap_or("-");
                println!(
                    "✅ asset {} bridged: owner={} uri={} mint_tx={}",
                    asset_id,
                    record.owner_address.as_deref().unwrap_or("-"),
                    record.token_uri.as_deref().unwrap_or("-"),
                    mint
                );
            }
            Ok(record) => {
                failures += 1;
                println!(
                    "❌ asset {} {}: {}",
                    asset_id,
                    record.stage,
                    record.last_error.as_deref().unwrap_or("-")
                );
            }
            Err(e) => {
                failures += 1;
                println!("❌ asset {}: {}: {}", asset_id, e.code(), e);
            }
        }
    }
    println!("Time taken: {:.2}s", start.elapsed().as_secs_f64());

    if failures > 0 {
        anyhow::bail!("{} transfer(s) did not complete", failures);
    }
    Ok(())
}
