mod erc20;
mod uniswap_v2;

pub use erc20::ErcTransferRow;
pub use uniswap_v2::UniswapSwapRow;

use crate::abi::{AbiRegistry, address_from_topic, event_topic};
use crate::fetcher::LogRow;
use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::json_abi::Event;
use anyhow::{Context, Result};

/// Decode result for one log against every registered decoder. A log whose
/// `topics[0]` matches no known event signature is skipped, not an error:
/// the log stream always contains far more events than the ones this
/// pipeline understands.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    pub erc20_transfers: Vec<ErcTransferRow>,
    pub uniswap_v2_swaps: Vec<UniswapSwapRow>,
    pub skipped: u64,
}

pub fn decode_logs(registry: &mut AbiRegistry, logs: &[LogRow]) -> Result<DecodeOutcome> {
    let mut out = DecodeOutcome::default();
    for log in logs {
        if log.removed {
            out.skipped += 1;
            continue;
        }
        if let Some(row) = erc20::decode_transfer(registry, log)? {
            out.erc20_transfers.push(row);
        } else if let Some(row) = uniswap_v2::decode_swap(registry, log)? {
            out.uniswap_v2_swaps.push(row);
        } else {
            out.skipped += 1;
        }
    }
    Ok(out)
}

/// The shared §4.J decode loop: resolve topic0 from the registry-supplied
/// event, apply every skip condition (topic0 mismatch, wrong topic count,
/// short data), then split each log into its indexed address args and its
/// decoded non-indexed values. Returns `None` when the log should be
/// skipped rather than erroring, per §7's "empty-result" error kind.
fn decode_against_event(
    event: &Event,
    indexed_count: usize,
    non_indexed_types: &[DynSolType],
    log: &LogRow,
) -> Result<Option<(Vec<String>, Vec<DynSolValue>)>> {
    let Some(topic0) = log.topics.first() else { return Ok(None) };
    if !topic0.eq_ignore_ascii_case(&event_topic(event)) {
        return Ok(None);
    }
    if log.topics.len() < 1 + indexed_count {
        return Ok(None);
    }
    let data_hex = log.data.strip_prefix("0x").unwrap_or(&log.data);
    if data_hex.len() < 64 * non_indexed_types.len() {
        return Ok(None);
    }

    let indexed: Result<Vec<String>> = log.topics[1..=indexed_count].iter().map(|t| address_from_topic(t)).collect();
    let indexed = indexed?;

    let data = hex::decode(data_hex).context("malformed log data hex")?;
    let ty = DynSolType::Tuple(non_indexed_types.to_vec());
    let decoded = ty.abi_decode_sequence(&data).context("decode non-indexed event args")?;
    let DynSolValue::Tuple(values) = decoded else {
        anyhow::bail!("event data decoded to unexpected shape");
    };

    Ok(Some((indexed, values)))
}

fn uint_to_decimal_string(value: &DynSolValue) -> Result<String> {
    Ok(value.as_uint().context("expected a uint arg")?.0.to_string())
}
