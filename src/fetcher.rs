use crate::rpc::{RpcClient, hex_to_decimal_string, parse_quantity_u64};
use crate::state::now_rfc3339;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct BlockRow {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub miner: String,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee_per_gas: Option<String>,
    pub tx_count: u32,
    pub observed_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxRow {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub tx_index: u64,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value: Option<String>,
    pub gas: Option<String>,
    pub gas_price: Option<String>,
    pub nonce: u64,
    pub input: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub tx_index: u64,
    pub log_index: u64,
    pub address: String,
    pub data: String,
    pub topics: Vec<String>,
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalRow {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub parent_hash: String,
    pub is_canonical: bool,
    pub observed_at: String,
}

/// Output of fetching one contiguous sub-range.
#[derive(Debug, Default)]
pub struct RangeFetchResult {
    pub blocks: Vec<BlockRow>,
    pub txs: Vec<TxRow>,
    pub logs: Vec<LogRow>,
    pub canon: Vec<CanonicalRow>,
}

impl RangeFetchResult {
    /// The highest block number actually fetched (may be below the
    /// requested range end if trailing blocks were null).
    pub fn highest_fetched_block(&self) -> Option<u64> {
        self.blocks.last().map(|b| b.block_number)
    }
}

fn field_hex_u64(block: &Value, field: &str) -> Result<u64> {
    let v = block
        .get(field)
        .with_context(|| format!("missing block.{field}"))?
        .clone();
    parse_quantity_u64(v).with_context(|| format!("block.{field} is not a valid quantity"))
}

fn field_str(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .with_context(|| format!("missing or non-string field {field}"))
}

fn normalize_block(chain_id: u64, block: &Value) -> Result<BlockRow> {
    let txs = block
        .get("transactions")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);

    Ok(BlockRow {
        chain_id,
        block_number: field_hex_u64(block, "number")?,
        block_hash: field_str(block, "hash")?,
        parent_hash: field_str(block, "parentHash")?,
        timestamp: field_hex_u64(block, "timestamp")?,
        miner: field_str(block, "miner").unwrap_or_default(),
        gas_used: field_hex_u64(block, "gasUsed").unwrap_or(0),
        gas_limit: field_hex_u64(block, "gasLimit").unwrap_or(0),
        base_fee_per_gas: hex_to_decimal_string(block.get("baseFeePerGas").and_then(|v| v.as_str()))?,
        tx_count: txs as u32,
        observed_at: now_rfc3339(),
    })
}

fn normalize_transactions(chain_id: u64, block: &Value) -> Result<Vec<TxRow>> {
    let block_number = field_hex_u64(block, "number")?;
    let block_hash = field_str(block, "hash")?;
    let Some(txs) = block.get("transactions").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };

    txs.iter()
        .map(|tx| {
            Ok(TxRow {
                chain_id,
                block_number,
                block_hash: block_hash.clone(),
                tx_hash: field_str(tx, "hash")?,
                tx_index: field_hex_u64(tx, "transactionIndex")?,
                from_address: field_str(tx, "from")?,
                to_address: tx.get("to").and_then(|v| v.as_str()).map(str::to_string),
                value: hex_to_decimal_string(tx.get("value").and_then(|v| v.as_str()))?,
                gas: hex_to_decimal_string(tx.get("gas").and_then(|v| v.as_str()))?,
                gas_price: hex_to_decimal_string(tx.get("gasPrice").and_then(|v| v.as_str()))?,
                nonce: field_hex_u64(tx, "nonce")?,
                input: tx.get("input").and_then(|v| v.as_str()).unwrap_or("0x").to_string(),
            })
        })
        .collect()
}

fn normalize_log(chain_id: u64, log: &Value) -> Result<LogRow> {
    let topics = log
        .get("topics")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(LogRow {
        chain_id,
        block_number: field_hex_u64(log, "blockNumber")?,
        block_hash: field_str(log, "blockHash")?,
        tx_hash: field_str(log, "transactionHash")?,
        tx_index: field_hex_u64(log, "transactionIndex")?,
        log_index: field_hex_u64(log, "logIndex")?,
        address: field_str(log, "address")?,
        data: log.get("data").and_then(|v| v.as_str()).unwrap_or("0x").to_string(),
        topics,
        removed: log.get("removed").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

fn canonical_row(chain_id: u64, block: &Value, is_canonical: bool) -> Result<CanonicalRow> {
    Ok(CanonicalRow {
        chain_id,
        block_number: field_hex_u64(block, "number")?,
        block_hash: field_str(block, "hash")?,
        parent_hash: field_str(block, "parentHash")?,
        is_canonical,
        observed_at: now_rfc3339(),
    })
}

/// Fetch blocks, transactions and logs for `[start, end]`, normalizing each
/// row and computing per-block canonical linkage.
///
/// Blocks are fetched in strictly ascending order (required for linkage).
/// A null block result (chain-tip edge case) is skipped silently, leaving a
/// hole in the output for that block number.
pub async fn fetch_range(
    rpc: &RpcClient,
    chain_id: u64,
    start: u64,
    end: u64,
    log_chunk: u64,
) -> Result<RangeFetchResult> {
    if end < start {
        bail!("fetch_range: end ({end}) < start ({start})");
    }

    let mut out = RangeFetchResult::default();
    let mut previous_hash: Option<String> = None;

    for block_number in start..=end {
        let Some(block) = rpc
            .get_block_by_number(block_number, true)
            .await
            .with_context(|| format!("eth_getBlockByNumber({block_number})"))?
        else {
            continue;
        };

        out.blocks.push(normalize_block(chain_id, &block)?);
        out.txs.extend(normalize_transactions(chain_id, &block)?);

        let is_canonical = match &previous_hash {
            None => true,
            Some(prev) => field_str(&block, "parentHash")? == *prev,
        };
        out.canon.push(canonical_row(chain_id, &block, is_canonical)?);
        previous_hash = Some(field_str(&block, "hash")?);
    }

    let log_chunk = if log_chunk == 0 { end - start + 1 } else { log_chunk };
    let mut chunk_start = start;
    while chunk_start <= end {
        let chunk_end = (chunk_start + log_chunk - 1).min(end);
        let raw_logs = rpc
            .get_logs(chunk_start, chunk_end)
            .await
            .with_context(|| format!("eth_getLogs({chunk_start}, {chunk_end})"))?;
        for log in &raw_logs {
            out.logs.push(normalize_log(chain_id, log)?);
        }
        chunk_start = chunk_end + 1;
    }

    Ok(out)
}

/// Reject a new range whose first block does not chain onto
/// `expected_parent` (the previously stored tip hash). This is the REQUIRED
/// cross-range linkage check from §3: the pipeline must refuse to advance
/// state on a detected reorg, not silently paper over it.
pub fn check_cross_range_linkage(result: &RangeFetchResult, expected_parent: Option<&str>) -> Result<()> {
    let (Some(expected), Some(first)) = (expected_parent, result.blocks.first()) else {
        return Ok(());
    };
    if first.parent_hash != expected {
        bail!(
            "linkage-error: range starting at block {} has parent_hash {} but chain state expected {}",
            first.block_number,
            first.parent_hash,
            expected
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, parent: &str) -> Value {
        serde_json::json!({
            "number": crate::rpc::format_quantity(number),
            "hash": hash,
            "parentHash": parent,
            "timestamp": "0x5f5e100",
            "miner": "0xminer",
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "baseFeePerGas": "0x3b9aca00",
            "transactions": [],
        })
    }

    #[test]
    fn normalize_block_preserves_256_bit_fee_as_decimal_string() {
        let row = normalize_block(1, &block(100, "0xh100", "0xh99")).unwrap();
        assert_eq!(row.block_number, 100);
        assert_eq!(row.base_fee_per_gas.as_deref(), Some("1000000000"));
    }

    #[test]
    fn first_block_of_range_is_always_canonical() {
        let b = block(1, "0xh1", "0xh0");
        let row = canonical_row(1, &b, true).unwrap();
        assert!(row.is_canonical);
    }

    #[test]
    fn cross_range_linkage_rejects_mismatch() {
        let mut result = RangeFetchResult::default();
        result.blocks.push(BlockRow {
            chain_id: 1,
            block_number: 100,
            block_hash: "0xh100".into(),
            parent_hash: "0xWRONG".into(),
            timestamp: 0,
            miner: String::new(),
            gas_used: 0,
            gas_limit: 0,
            base_fee_per_gas: None,
            tx_count: 0,
            observed_at: String::new(),
        });
        let err = check_cross_range_linkage(&result, Some("0xh99")).unwrap_err();
        assert!(err.to_string().contains("linkage-error"));
    }

    #[test]
    fn cross_range_linkage_accepts_match() {
        let mut result = RangeFetchResult::default();
        result.blocks.push(BlockRow {
            chain_id: 1,
            block_number: 100,
            block_hash: "0xh100".into(),
            parent_hash: "0xh99".into(),
            timestamp: 0,
            miner: String::new(),
            gas_used: 0,
            gas_limit: 0,
            base_fee_per_gas: None,
            tx_count: 0,
            observed_at: String::new(),
        });
        assert!(check_cross_range_linkage(&result, Some("0xh99")).is_ok());
    }

    #[test]
    fn no_prior_state_skips_linkage_check() {
        let result = RangeFetchResult::default();
        assert!(check_cross_range_linkage(&result, None).is_ok());
    }
}
