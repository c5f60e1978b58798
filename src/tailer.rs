use crate::abi::AbiRegistry;
use crate::decode::decode_logs;
use crate::fetcher::{check_cross_range_linkage, fetch_range};
use crate::rpc::RpcClient;
use crate::state::{CanonicalState, ChainCursor};
use crate::writer::{Writer, range_filename};
use anyhow::{Context, Result, bail};
use tracing::{info, warn};

#[derive(Debug)]
pub enum TailOutcome {
    /// The finality-safe tip has not advanced past the stored cursor; there
    /// was nothing new to fetch this cycle.
    UpToDate { safe_tip: u64 },
    /// New blocks were fetched, decoded and written; the cursor now sits at
    /// `advanced_to` (the highest block actually fetched, per the REDESIGN
    /// cursor-advance rule, not necessarily `safe_tip`).
    Advanced { from: u64, advanced_to: u64, safe_tip: u64 },
}

/// Run a single incremental tailing cycle: fetch everything between the
/// resolved start block and the finality-safe chain tip (capped by an
/// optional user-supplied end), write it, and move the cursor forward.
/// Unlike the batch worker this never consults the checkpoint store — a
/// tailer has exactly one range in flight at a time and resumability comes
/// entirely from `CanonicalState`.
pub async fn tail_once(
    rpc: &RpcClient,
    chain_id: u64,
    finality_depth: u64,
    log_chunk: u64,
    start_override: Option<u64>,
    end_override: Option<u64>,
    state: &mut CanonicalState,
    writer: &Writer,
    registry: &mut AbiRegistry,
) -> Result<TailOutcome> {
    let tip = rpc.block_number().await.context("eth_blockNumber")?;
    let finalized_end = tip.saturating_sub(finality_depth);

    let start = match start_override {
        Some(s) => s,
        None => match state.get(chain_id) {
            Some(cursor) => cursor.last_block_number + 1,
            None => bail!("no stored cursor for chain {chain_id} and no --start given; provide --start"),
        },
    };

    let safe_tip = match end_override {
        Some(e) => e.min(finalized_end),
        None => finalized_end,
    };

    if start > safe_tip {
        return Ok(TailOutcome::UpToDate { safe_tip });
    }

    let expected_parent = state.get(chain_id).map(|c| c.last_block_hash.clone());
    let result = fetch_range(rpc, chain_id, start, safe_tip, log_chunk)
        .await
        .with_context(|| format!("tail fetch_range({start}, {safe_tip})"))?;
    check_cross_range_linkage(&result, expected_parent.as_deref())?;

    let Some(advanced_to) = result.highest_fetched_block() else {
        warn!(chain_id, start, safe_tip, "tail cycle fetched no blocks, leaving a cursor gap for next cycle");
        return Ok(TailOutcome::UpToDate { safe_tip });
    };

    let filename = range_filename(start, advanced_to);
    writer.write_blocks(&result.blocks, &filename)?;
    writer.write_transactions(&result.txs, &filename)?;
    writer.write_logs(&result.logs, &filename)?;
    writer.write_canonical(&result.canon, &filename)?;

    let decoded = decode_logs(registry, &result.logs)?;
    writer.write_erc20_transfers(&decoded.erc20_transfers, &filename)?;
    writer.write_uniswap_v2_swaps(&decoded.uniswap_v2_swaps, &filename)?;

    let last_block = result
        .blocks
        .iter()
        .find(|b| b.block_number == advanced_to)
        .context("advanced_to block missing from fetch result")?;
    state.set(
        chain_id,
        ChainCursor {
            last_block_number: advanced_to,
            last_block_hash: last_block.block_hash.clone(),
            updated_at: crate::state::now_rfc3339(),
        },
    )?;

    info!(chain_id, from = start, advanced_to, safe_tip, skipped_logs = decoded.skipped, "tail cycle advanced");
    Ok(TailOutcome::Advanced { from: start, advanced_to, safe_tip })
}
