use crate::writer::topics_field;
use anyhow::{Context, Result};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// `(layer, table, schema)` for every table this pipeline ever writes.
/// Bootstrapping creates each as an empty, schema-only Parquet file so that
/// downstream query engines can discover every table before the first
/// ingestion run has produced any data.
fn table_schemas() -> Vec<(&'static str, &'static str, Schema)> {
    vec![
        (
            "bronze",
            "blocks_raw",
            Schema::new(vec![
                Field::new("chain_id", DataType::UInt64, false),
                Field::new("block_number", DataType::UInt64, false),
                Field::new("block_hash", DataType::Utf8, false),
                Field::new("parent_hash", DataType::Utf8, false),
                Field::new("timestamp", DataType::UInt64, false),
                Field::new("miner", DataType::Utf8, false),
                Field::new("gas_used", DataType::UInt64, false),
                Field::new("gas_limit", DataType::UInt64, false),
                Field::new("base_fee_per_gas", DataType::Utf8, true),
                Field::new("tx_count", DataType::UInt32, false),
                Field::new("observed_at", DataType::Utf8, false),
            ]),
        ),
        (
            "bronze",
            "transactions_raw",
            Schema::new(vec![
                Field::new("chain_id", DataType::UInt64, false),
                Field::new("block_number", DataType::UInt64, false),
                Field::new("block_hash", DataType::Utf8, false),
                Field::new("tx_hash", DataType::Utf8, false),
                Field::new("tx_index", DataType::UInt64, false),
                Field::new("from_address", DataType::Utf8, false),
                Field::new("to_address", DataType::Utf8, true),
                Field::new("value", DataType::Utf8, true),
                Field::new("gas", DataType::Utf8, true),
                Field::new("gas_price", DataType::Utf8, true),
                Field::new("nonce", DataType::UInt64, false),
                Field::new("input", DataType::Utf8, false),
            ]),
        ),
        (
            "bronze",
            "logs_raw",
            Schema::new(vec![
                Field::new("chain_id", DataType::UInt64, false),
                Field::new("block_number", DataType::UInt64, false),
                Field::new("block_hash", DataType::Utf8, false),
                Field::new("tx_hash", DataType::Utf8, false),
                Field::new("tx_index", DataType::UInt64, false),
                Field::new("log_index", DataType::UInt64, false),
                Field::new("address", DataType::Utf8, false),
                Field::new("data", DataType::Utf8, false),
                topics_field(),
                Field::new("removed", DataType::Boolean, false),
            ]),
        ),
        (
            "bronze",
            "canonical_blocks",
            Schema::new(vec![
                Field::new("chain_id", DataType::UInt64, false),
                Field::new("block_number", DataType::UInt64, false),
                Field::new("block_hash", DataType::Utf8, false),
                Field::new("parent_hash", DataType::Utf8, false),
                Field::new("is_canonical", DataType::Boolean, false),
                Field::new("observed_at", DataType::Utf8, false),
            ]),
        ),
        (
            "silver",
            "event_erc20_transfer",
            Schema::new(vec![
                Field::new("chain_id", DataType::UInt64, false),
                Field::new("block_number", DataType::UInt64, false),
                Field::new("tx_hash", DataType::Utf8, false),
                Field::new("log_index", DataType::UInt64, false),
                Field::new("contract_address", DataType::Utf8, false),
                Field::new("from_address", DataType::Utf8, false),
                Field::new("to_address", DataType::Utf8, false),
                Field::new("value_raw", DataType::Utf8, false),
            ]),
        ),
        (
            "silver",
            "event_uniswap_v2_swap",
            Schema::new(vec![
                Field::new("chain_id", DataType::UInt64, false),
                Field::new("block_number", DataType::UInt64, false),
                Field::new("tx_hash", DataType::Utf8, false),
                Field::new("log_index", DataType::UInt64, false),
                Field::new("pair_address", DataType::Utf8, false),
                Field::new("sender", DataType::Utf8, false),
                Field::new("to_address", DataType::Utf8, false),
                Field::new("amount0_in", DataType::Utf8, false),
                Field::new("amount1_in", DataType::Utf8, false),
                Field::new("amount0_out", DataType::Utf8, false),
                Field::new("amount1_out", DataType::Utf8, false),
            ]),
        ),
    ]
}

/// Create every table directory with an empty `_schema.parquet` file, if it
/// doesn't already exist. Safe to run repeatedly: an existing table is left
/// untouched so bootstrap never clobbers ingested data.
pub fn bootstrap_warehouse(warehouse_dir: &Path) -> Result<Vec<String>> {
    let mut created = Vec::new();
    for (layer, table, schema) in table_schemas() {
        let dir = warehouse_dir.join("lake").join(layer).join(table);
        std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join("_schema.parquet");
        if path.exists() {
            continue;
        }
        write_empty_parquet(&path, Arc::new(schema))?;
        info!(%layer, %table, path = %path.display(), "bootstrapped empty table");
        created.push(format!("{layer}/{table}"));
    }
    Ok(created)
}

fn write_empty_parquet(path: &Path, schema: Arc<Schema>) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let writer = ArrowWriter::try_new(file, schema, Some(WriterProperties::builder().build()))
        .context("open empty parquet writer")?;
    writer.close().context("close empty parquet writer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_every_table_once() {
        let dir = tempfile::tempdir().unwrap();
        let created = bootstrap_warehouse(dir.path()).unwrap();
        assert_eq!(created.len(), 6);
        assert!(dir.path().join("lake/bronze/blocks_raw/_schema.parquet").exists());
        assert!(dir.path().join("lake/silver/event_erc20_transfer/_schema.parquet").exists());
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        bootstrap_warehouse(dir.path()).unwrap();
        let second = bootstrap_warehouse(dir.path()).unwrap();
        assert!(second.is_empty());
    }
}
