use super::{decode_against_event, uint_to_decimal_string};
use crate::abi::AbiRegistry;
use crate::fetcher::LogRow;
use alloy::dyn_abi::DynSolType;
use anyhow::{Context, Result};
use serde::Serialize;

/// `event_erc20_transfer`, matching the warehouse schema exactly: no
/// derived or renamed columns beyond what the ABI args name.
#[derive(Debug, Clone, Serialize)]
pub struct ErcTransferRow {
    pub chain_id: u64,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub contract_address: String,
    pub from_address: String,
    pub to_address: String,
    pub value_raw: String,
}

/// `Transfer(address indexed from, address indexed to, uint256 value)`.
/// The ABI is resolved per-protocol through the registry rather than a
/// hardcoded signature, so a registry update can repoint "erc20" at a new
/// ABI file without a code change.
pub fn decode_transfer(registry: &mut AbiRegistry, log: &LogRow) -> Result<Option<ErcTransferRow>> {
    let event = registry
        .get_event("erc20", "Transfer", Some(log.block_number), None)
        .context("resolve erc20 Transfer event")?;

    let Some((indexed, values)) = decode_against_event(&event, 2, &[DynSolType::Uint(256)], log)? else {
        return Ok(None);
    };

    Ok(Some(ErcTransferRow {
        chain_id: log.chain_id,
        block_number: log.block_number,
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        contract_address: log.address.clone(),
        from_address: indexed[0].clone(),
        to_address: indexed[1].clone(),
        value_raw: uint_to_decimal_string(&values[0])?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::event_topic_for_signature;
    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::U256;

    fn sample_log(topics: Vec<String>, value: U256) -> LogRow {
        let encoded = DynSolValue::Tuple(vec![DynSolValue::Uint(value, 256)]).abi_encode();
        LogRow {
            chain_id: 1,
            block_number: 100,
            block_hash: "0xblk".into(),
            tx_hash: "0xtx".into(),
            tx_index: 0,
            log_index: 0,
            address: "0xtoken".into(),
            data: format!("0x{}", hex::encode(encoded)),
            topics,
            removed: false,
        }
    }

    fn registry() -> AbiRegistry {
        let dir = tempfile::tempdir().unwrap().keep();
        std::fs::write(dir.join("erc20.json"), include_str!("../../abis/erc20.json")).unwrap();
        AbiRegistry::open(dir).unwrap()
    }

    #[test]
    fn decodes_transfer_with_indexed_addresses_and_256_bit_value() {
        let mut reg = registry();
        let from = format!("0x{}{}", "0".repeat(24), "11".repeat(20));
        let to = format!("0x{}{}", "0".repeat(24), "22".repeat(20));
        let log = sample_log(
            vec![event_topic_for_signature("Transfer(address,address,uint256)"), from, to],
            U256::MAX,
        );
        let row = decode_transfer(&mut reg, &log).unwrap().unwrap();
        assert_eq!(row.from_address, "0x1111111111111111111111111111111111111111");
        assert_eq!(row.to_address, "0x2222222222222222222222222222222222222222");
        assert_eq!(row.value_raw, U256::MAX.to_string());
    }

    #[test]
    fn non_matching_topic_is_skipped() {
        let mut reg = registry();
        let log = sample_log(vec!["0xdeadbeef".into()], U256::from(1));
        assert!(decode_transfer(&mut reg, &log).unwrap().is_none());
    }

    /// S4: matching topic0 but too few topics must be skipped, not error.
    #[test]
    fn s4_wrong_topic_count_is_skipped() {
        let mut reg = registry();
        let log = sample_log(vec![event_topic_for_signature("Transfer(address,address,uint256)")], U256::from(1));
        assert!(decode_transfer(&mut reg, &log).unwrap().is_none());
    }
}
