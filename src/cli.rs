use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "onchain-lake", about = "EVM block/log ingestion into a columnar lake")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Split a block range into checkpointable sub-ranges and write a plan file.
    Plan {
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: u64,
        #[arg(long, default_value_t = 2_000)]
        chunk: u64,
        #[arg(long, default_value = "plan.jsonl")]
        out: PathBuf,
        #[arg(long, default_value_t = false)]
        append: bool,
    },
    /// Execute every range in a plan file to completion, resuming from checkpoints.
    Worker {
        #[arg(long, default_value = "plan.jsonl")]
        plan: PathBuf,
        #[arg(long, default_value_t = 64)]
        finality_depth: u64,
        /// Ingest ranges even if their end block is not yet behind the finality depth.
        #[arg(long, default_value_t = false)]
        ignore_finality: bool,
    },
    /// Run one incremental tailing cycle against the finality-safe chain tip.
    Tail {
        #[arg(long, default_value_t = 64)]
        finality_depth: u64,
        #[arg(long, default_value_t = 2_000)]
        log_chunk: u64,
        /// Explicit start block, overriding the persisted chain cursor.
        #[arg(long)]
        start: Option<u64>,
        /// Upper bound on the fetched range, capped further by the finality-safe tip.
        #[arg(long)]
        end: Option<u64>,
    },
    /// Re-decode a previously written logs_raw Parquet file into the silver tables.
    Decode {
        #[arg(long)]
        logs_file: PathBuf,
    },
    /// Report per-table file and row counts across the warehouse.
    Reconcile,
    /// Deduplicate every table down to one row per natural key.
    Compact,
    /// Create empty schema-only Parquet files for every table.
    Bootstrap,
}
