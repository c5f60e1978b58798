mod abi;
mod atomic_json;
mod bootstrap;
mod checkpoint;
mod cli;
mod compact;
mod config;
mod decode;
mod fetcher;
mod planner;
mod reconcile;
mod rpc;
mod state;
mod tailer;
mod worker;
mod writer;

use abi::AbiRegistry;
use anyhow::{Context, Result};
use checkpoint::CheckpointStore;
use clap::Parser;
use cli::{Cli, Command};
use config::AppConfig;
use rpc::RpcClient;
use state::CanonicalState;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use writer::Writer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env()?;

    tracing::info!(chain = %cfg.chain, chain_id = cfg.chain_id, warehouse_dir = %cfg.warehouse_dir, "onchain-lake starting");

    let shutdown = CancellationToken::new();

    match cli.command {
        Command::Plan { start, end, chunk, out, append } => run_plan_command(&cfg, start, end, chunk, &out, append)?,
        Command::Worker { plan, finality_depth, ignore_finality } => {
            run_worker_command(&cfg, &plan, finality_depth, ignore_finality, shutdown).await?
        }
        Command::Tail { finality_depth, log_chunk, start, end } => {
            run_tail_command(&cfg, finality_depth, log_chunk, start, end, shutdown).await?
        }
        Command::Decode { logs_file } => run_decode_command(&cfg, &logs_file)?,
        Command::Reconcile => run_reconcile_command(&cfg)?,
        Command::Compact => compact::compact_warehouse(Path::new(&cfg.warehouse_dir)).await.map(|_| ())?,
        Command::Bootstrap => {
            bootstrap::bootstrap_warehouse(Path::new(&cfg.warehouse_dir))?;
        }
    }

    tracing::info!("onchain-lake finished");
    Ok(())
}

fn run_plan_command(cfg: &AppConfig, start: u64, end: u64, chunk: u64, out: &Path, append: bool) -> Result<()> {
    let ranges = planner::plan(start, end, chunk)?;
    planner::write_plan_file(out, cfg.chain_id, &ranges, append)?;
    tracing::info!(count = ranges.len(), out = %out.display(), "wrote plan");
    Ok(())
}

async fn run_worker_command(
    cfg: &AppConfig,
    plan_path: &Path,
    finality_depth: u64,
    ignore_finality: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    let rpc_url = cfg.require_rpc_url()?;
    let rpc = RpcClient::connect(rpc_url, 8)?;
    let plan = planner::read_plan_file(plan_path)?;

    let warehouse = Path::new(&cfg.warehouse_dir);
    let mut checkpoints = CheckpointStore::open(warehouse.join("state").join("checkpoints.json"))?;
    let mut state = CanonicalState::open(warehouse.join("state").join("canonical_state.json"))?;
    let writer = Writer::new(warehouse);
    let mut registry = AbiRegistry::open(abi_dir())?;

    let worker_cfg = worker::WorkerConfig { finality_depth, ignore_finality, ..Default::default() };

    tokio::select! {
        res = worker::run_plan(&rpc, &plan, &worker_cfg, &mut checkpoints, &mut state, &writer, &mut registry) => {
            let summary = res?;
            tracing::info!(
                completed = summary.completed,
                skipped_already_done = summary.skipped_already_done,
                deferred_unfinalized = summary.deferred_unfinalized,
                "worker run complete"
            );
        }
        _ = shutdown.cancelled() => {
            tracing::info!("worker shutting down on signal");
        }
    }
    Ok(())
}

async fn run_tail_command(
    cfg: &AppConfig,
    finality_depth: u64,
    log_chunk: u64,
    start: Option<u64>,
    end: Option<u64>,
    shutdown: CancellationToken,
) -> Result<()> {
    let rpc_url = cfg.require_rpc_url()?;
    let rpc = RpcClient::connect(rpc_url, 8)?;

    let warehouse = Path::new(&cfg.warehouse_dir);
    let mut state = CanonicalState::open(warehouse.join("state").join("canonical_state.json"))?;
    let writer = Writer::new(warehouse);
    let mut registry = AbiRegistry::open(abi_dir())?;

    tokio::select! {
        res = tailer::tail_once(&rpc, cfg.chain_id, finality_depth, log_chunk, start, end, &mut state, &writer, &mut registry) => {
            match res? {
                tailer::TailOutcome::UpToDate { safe_tip } => {
                    tracing::info!(safe_tip, "tail cycle: already up to date");
                }
                tailer::TailOutcome::Advanced { from, advanced_to, safe_tip } => {
                    tracing::info!(from, advanced_to, safe_tip, "tail cycle: advanced");
                }
            }
        }
        _ = shutdown.cancelled() => {
            tracing::info!("tail cycle interrupted by signal");
        }
    }
    Ok(())
}

fn run_decode_command(cfg: &AppConfig, logs_file: &Path) -> Result<()> {
    let rows = writer::read_logs(logs_file)?;
    let mut registry = AbiRegistry::open(abi_dir())?;
    let outcome = decode::decode_logs(&mut registry, &rows)?;

    let writer = Writer::new(Path::new(&cfg.warehouse_dir));
    let filename = logs_file
        .file_stem()
        .and_then(|s| s.to_str())
        .context("logs file has no usable stem")?;
    writer.write_erc20_transfers(&outcome.erc20_transfers, filename)?;
    writer.write_uniswap_v2_swaps(&outcome.uniswap_v2_swaps, filename)?;

    tracing::info!(
        erc20_transfers = outcome.erc20_transfers.len(),
        uniswap_v2_swaps = outcome.uniswap_v2_swaps.len(),
        skipped = outcome.skipped,
        "decode complete"
    );
    Ok(())
}

fn run_reconcile_command(cfg: &AppConfig) -> Result<()> {
    let warehouse = Path::new(&cfg.warehouse_dir);
    let tables: &[(&str, &str)] = &[
        ("bronze", "blocks_raw"),
        ("bronze", "transactions_raw"),
        ("bronze", "logs_raw"),
        ("bronze", "canonical_blocks"),
        ("silver", "event_erc20_transfer"),
        ("silver", "event_uniswap_v2_swap"),
    ];
    for (layer, table) in tables {
        let report = reconcile::reconcile_table(warehouse, layer, table)?;
        tracing::info!(table = %report.table, files = report.file_count, rows = report.row_count, "reconcile report");
    }
    Ok(())
}

fn abi_dir() -> PathBuf {
    std::env::var("ABI_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("abis"))
}
