use super::{decode_against_event, uint_to_decimal_string};
use crate::abi::AbiRegistry;
use crate::fetcher::LogRow;
use alloy::dyn_abi::DynSolType;
use anyhow::{Context, Result};
use serde::Serialize;

/// `event_uniswap_v2_swap`, matching the warehouse schema: the contract
/// column is named `pair_address` here (a Uniswap V2 pool contract is
/// conventionally called a "pair"), unlike `event_erc20_transfer`'s
/// `contract_address`.
#[derive(Debug, Clone, Serialize)]
pub struct UniswapSwapRow {
    pub chain_id: u64,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub pair_address: String,
    pub sender: String,
    pub to_address: String,
    pub amount0_in: String,
    pub amount1_in: String,
    pub amount0_out: String,
    pub amount1_out: String,
}

/// `Swap(address indexed sender, uint amount0In, uint amount1In, uint
/// amount0Out, uint amount1Out, address indexed to)`.
pub fn decode_swap(registry: &mut AbiRegistry, log: &LogRow) -> Result<Option<UniswapSwapRow>> {
    let event = registry
        .get_event("uniswap_v2", "Swap", Some(log.block_number), None)
        .context("resolve uniswap_v2 Swap event")?;

    let non_indexed = [DynSolType::Uint(256), DynSolType::Uint(256), DynSolType::Uint(256), DynSolType::Uint(256)];
    let Some((indexed, values)) = decode_against_event(&event, 2, &non_indexed, log)? else {
        return Ok(None);
    };

    Ok(Some(UniswapSwapRow {
        chain_id: log.chain_id,
        block_number: log.block_number,
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        pair_address: log.address.clone(),
        sender: indexed[0].clone(),
        to_address: indexed[1].clone(),
        amount0_in: uint_to_decimal_string(&values[0])?,
        amount1_in: uint_to_decimal_string(&values[1])?,
        amount0_out: uint_to_decimal_string(&values[2])?,
        amount1_out: uint_to_decimal_string(&values[3])?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::event_topic_for_signature;
    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::U256;

    fn sample_log(topics: Vec<String>, amounts: [U256; 4]) -> LogRow {
        let encoded = DynSolValue::Tuple(amounts.into_iter().map(|a| DynSolValue::Uint(a, 256)).collect()).abi_encode();
        LogRow {
            chain_id: 1,
            block_number: 100,
            block_hash: "0xblk".into(),
            tx_hash: "0xtx".into(),
            tx_index: 0,
            log_index: 1,
            address: "0xpair".into(),
            data: format!("0x{}", hex::encode(encoded)),
            topics,
            removed: false,
        }
    }

    fn registry() -> AbiRegistry {
        let dir = tempfile::tempdir().unwrap().keep();
        std::fs::write(dir.join("uniswap_v2.json"), include_str!("../../abis/uniswap_v2.json")).unwrap();
        AbiRegistry::open(dir).unwrap()
    }

    #[test]
    fn decodes_swap_amounts_and_indexed_addresses() {
        let mut reg = registry();
        let sender = format!("0x{}{}", "0".repeat(24), "aa".repeat(20));
        let to = format!("0x{}{}", "0".repeat(24), "bb".repeat(20));
        let log = sample_log(
            vec![
                event_topic_for_signature("Swap(address,uint256,uint256,uint256,uint256,address)"),
                sender,
                to,
            ],
            [U256::from(100u64), U256::ZERO, U256::ZERO, U256::from(95u64)],
        );
        let row = decode_swap(&mut reg, &log).unwrap().unwrap();
        assert_eq!(row.amount0_in, "100");
        assert_eq!(row.amount1_out, "95");
        assert_eq!(row.sender, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    }

    #[test]
    fn non_matching_topic_is_skipped() {
        let mut reg = registry();
        let log = sample_log(vec!["0xdeadbeef".into()], [U256::ZERO; 4]);
        assert!(decode_swap(&mut reg, &log).unwrap().is_none());
    }
}
