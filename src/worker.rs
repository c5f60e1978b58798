use crate::abi::AbiRegistry;
use crate::checkpoint::CheckpointStore;
use crate::decode::decode_logs;
use crate::fetcher::{check_cross_range_linkage, fetch_range};
use crate::planner::PlannedRange;
use crate::rpc::{RpcClient, looks_like_range_too_large, looks_like_transient};
use crate::state::{CanonicalState, ChainCursor};
use crate::writer::{Writer, range_filename};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

pub struct WorkerConfig {
    pub finality_depth: u64,
    pub ignore_finality: bool,
    pub initial_log_chunk: u64,
    pub min_log_chunk: u64,
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { finality_depth: 64, ignore_finality: false, initial_log_chunk: 2_000, min_log_chunk: 10, max_attempts: 5 }
    }
}

#[derive(Debug, Default)]
pub struct WorkerSummary {
    pub completed: u64,
    pub skipped_already_done: u64,
    pub deferred_unfinalized: u64,
}

/// Drive every range in a plan file to completion: skip ranges already
/// marked done, defer ranges that are not yet behind the finality depth, and
/// retry the rest with bounded backoff, shrinking the log-fetch chunk on a
/// range-too-large response and growing it back once a range succeeds.
pub async fn run_plan(
    rpc: &RpcClient,
    plan: &[PlannedRange],
    cfg: &WorkerConfig,
    checkpoints: &mut CheckpointStore,
    state: &mut CanonicalState,
    writer: &Writer,
    registry: &mut AbiRegistry,
) -> Result<WorkerSummary> {
    let mut summary = WorkerSummary::default();
    let mut log_chunk = cfg.initial_log_chunk;

    for range in plan {
        let checkpoint = range.checkpoint();
        if checkpoints.is_done(&checkpoint) {
            summary.skipped_already_done += 1;
            continue;
        }

        if !cfg.ignore_finality {
            let tip = rpc.block_number().await.context("eth_blockNumber")?;
            let safe_tip = tip.saturating_sub(cfg.finality_depth);
            if range.end_block > safe_tip {
                summary.deferred_unfinalized += 1;
                continue;
            }
        }

        process_range(rpc, range, cfg, &mut log_chunk, state, writer, registry).await?;
        checkpoints.mark_done(&[checkpoint])?;
        summary.completed += 1;
    }

    Ok(summary)
}

async fn process_range(
    rpc: &RpcClient,
    range: &PlannedRange,
    cfg: &WorkerConfig,
    log_chunk: &mut u64,
    state: &mut CanonicalState,
    writer: &Writer,
    registry: &mut AbiRegistry,
) -> Result<()> {
    let expected_parent = state.get(range.chain_id).map(|c| c.last_block_hash.clone());
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match fetch_range(rpc, range.chain_id, range.start_block, range.end_block, *log_chunk).await {
            Ok(result) => {
                check_cross_range_linkage(&result, expected_parent.as_deref())?;
                persist_result(range, &result, state, writer, registry)?;
                *log_chunk = (*log_chunk * 2).min(cfg.initial_log_chunk.max(*log_chunk));
                return Ok(());
            }
            Err(err) if looks_like_range_too_large(&err) && *log_chunk > cfg.min_log_chunk => {
                *log_chunk = (*log_chunk / 2).max(cfg.min_log_chunk);
                warn!(
                    chain_id = range.chain_id,
                    start = range.start_block,
                    end = range.end_block,
                    new_log_chunk = *log_chunk,
                    "range too large, shrinking log chunk and retrying"
                );
            }
            Err(err) if looks_like_transient(&err) && attempt < cfg.max_attempts => {
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt.min(6)));
                warn!(
                    chain_id = range.chain_id,
                    start = range.start_block,
                    end = range.end_block,
                    attempt,
                    ?backoff,
                    error = %err,
                    "transient rpc error, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "fetch_range({}, {}) failed after {attempt} attempt(s)",
                        range.start_block, range.end_block
                    )
                });
            }
        }
    }
}

fn persist_result(
    range: &PlannedRange,
    result: &crate::fetcher::RangeFetchResult,
    state: &mut CanonicalState,
    writer: &Writer,
    registry: &mut AbiRegistry,
) -> Result<()> {
    let filename = range_filename(range.start_block, range.end_block);
    writer.write_blocks(&result.blocks, &filename)?;
    writer.write_transactions(&result.txs, &filename)?;
    writer.write_logs(&result.logs, &filename)?;
    writer.write_canonical(&result.canon, &filename)?;

    let decoded = decode_logs(registry, &result.logs)?;
    writer.write_erc20_transfers(&decoded.erc20_transfers, &filename)?;
    writer.write_uniswap_v2_swaps(&decoded.uniswap_v2_swaps, &filename)?;

    if let Some(last) = result.blocks.last() {
        state.set(
            range.chain_id,
            ChainCursor {
                last_block_number: last.block_number,
                last_block_hash: last.block_hash.clone(),
                updated_at: crate::state::now_rfc3339(),
            },
        )?;
    }

    info!(
        chain_id = range.chain_id,
        start = range.start_block,
        end = range.end_block,
        blocks = result.blocks.len(),
        txs = result.txs.len(),
        logs = result.logs.len(),
        skipped_logs = decoded.skipped,
        "range committed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_shrinks_toward_min_not_below() {
        let cfg = WorkerConfig::default();
        let mut chunk = cfg.initial_log_chunk;
        while chunk > cfg.min_log_chunk {
            chunk = (chunk / 2).max(cfg.min_log_chunk);
        }
        assert_eq!(chunk, cfg.min_log_chunk);
    }

    /// Testable property 6: the finality gate only applies when
    /// `ignore_finality` is unset.
    #[test]
    fn ignore_finality_bypasses_the_gate() {
        let finality_depth = 64u64;
        let tip = 1000u64;
        let safe_tip = tip.saturating_sub(finality_depth);
        let end_block = 990u64;
        assert!(end_block > safe_tip);

        let cfg = WorkerConfig { ignore_finality: false, ..Default::default() };
        assert!(!cfg.ignore_finality && end_block > safe_tip);

        let cfg = WorkerConfig { ignore_finality: true, ..Default::default() };
        assert!(cfg.ignore_finality);
    }
}
