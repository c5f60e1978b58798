use crate::decode::{ErcTransferRow, UniswapSwapRow};
use crate::fetcher::{BlockRow, CanonicalRow, LogRow, TxRow};
use anyhow::{Context, Result};
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::{ArrayRef, BooleanArray, ListArray, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writes one Parquet file per call, named `<table>/<filename>.parquet`
/// under `warehouse_dir/lake/bronze` (raw tables) or `.../silver` (decoded
/// event tables). Empty input is a no-op: no file is created and `None` is
/// returned, so callers never produce zero-row parquet litter for an empty
/// range.
pub struct Writer {
    warehouse_dir: PathBuf,
}

impl Writer {
    pub fn new(warehouse_dir: impl Into<PathBuf>) -> Self {
        Self { warehouse_dir: warehouse_dir.into() }
    }

    fn table_path(&self, layer: &str, table: &str, filename: &str) -> PathBuf {
        self.warehouse_dir
            .join("lake")
            .join(layer)
            .join(table)
            .join(format!("{filename}.parquet"))
    }

    fn write_batch(&self, layer: &str, table: &str, filename: &str, batch: RecordBatch) -> Result<Option<PathBuf>> {
        if batch.num_rows() == 0 {
            return Ok(None);
        }
        let path = self.table_path(layer, table, filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .with_context(|| format!("open parquet writer for {}", path.display()))?;
        writer.write(&batch).with_context(|| format!("write batch to {}", path.display()))?;
        writer.close().with_context(|| format!("close {}", path.display()))?;
        Ok(Some(path))
    }

    pub fn write_blocks(&self, rows: &[BlockRow], filename: &str) -> Result<Option<PathBuf>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let schema = Arc::new(Schema::new(vec![
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
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                arr_u64(rows.iter().map(|r| r.chain_id)),
                arr_u64(rows.iter().map(|r| r.block_number)),
                arr_str(rows.iter().map(|r| r.block_hash.as_str())),
                arr_str(rows.iter().map(|r| r.parent_hash.as_str())),
                arr_u64(rows.iter().map(|r| r.timestamp)),
                arr_str(rows.iter().map(|r| r.miner.as_str())),
                arr_u64(rows.iter().map(|r| r.gas_used)),
                arr_u64(rows.iter().map(|r| r.gas_limit)),
                arr_opt_str(rows.iter().map(|r| r.base_fee_per_gas.as_deref())),
                arr_u32(rows.iter().map(|r| r.tx_count)),
                arr_str(rows.iter().map(|r| r.observed_at.as_str())),
            ],
        )?;
        self.write_batch("bronze", "blocks_raw", filename, batch)
    }

    pub fn write_transactions(&self, rows: &[TxRow], filename: &str) -> Result<Option<PathBuf>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let schema = Arc::new(Schema::new(vec![
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
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                arr_u64(rows.iter().map(|r| r.chain_id)),
                arr_u64(rows.iter().map(|r| r.block_number)),
                arr_str(rows.iter().map(|r| r.block_hash.as_str())),
                arr_str(rows.iter().map(|r| r.tx_hash.as_str())),
                arr_u64(rows.iter().map(|r| r.tx_index)),
                arr_str(rows.iter().map(|r| r.from_address.as_str())),
                arr_opt_str(rows.iter().map(|r| r.to_address.as_deref())),
                arr_opt_str(rows.iter().map(|r| r.value.as_deref())),
                arr_opt_str(rows.iter().map(|r| r.gas.as_deref())),
                arr_opt_str(rows.iter().map(|r| r.gas_price.as_deref())),
                arr_u64(rows.iter().map(|r| r.nonce)),
                arr_str(rows.iter().map(|r| r.input.as_str())),
            ],
        )?;
        self.write_batch("bronze", "transactions_raw", filename, batch)
    }

    pub fn write_logs(&self, rows: &[LogRow], filename: &str) -> Result<Option<PathBuf>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let schema = Arc::new(Schema::new(vec![
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
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                arr_u64(rows.iter().map(|r| r.chain_id)),
                arr_u64(rows.iter().map(|r| r.block_number)),
                arr_str(rows.iter().map(|r| r.block_hash.as_str())),
                arr_str(rows.iter().map(|r| r.tx_hash.as_str())),
                arr_u64(rows.iter().map(|r| r.tx_index)),
                arr_u64(rows.iter().map(|r| r.log_index)),
                arr_str(rows.iter().map(|r| r.address.as_str())),
                arr_str(rows.iter().map(|r| r.data.as_str())),
                arr_topics(rows.iter().map(|r| r.topics.as_slice())),
                Arc::new(BooleanArray::from(rows.iter().map(|r| r.removed).collect::<Vec<_>>())) as ArrayRef,
            ],
        )?;
        self.write_batch("bronze", "logs_raw", filename, batch)
    }

    pub fn write_canonical(&self, rows: &[CanonicalRow], filename: &str) -> Result<Option<PathBuf>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let schema = Arc::new(Schema::new(vec![
            Field::new("chain_id", DataType::UInt64, false),
            Field::new("block_number", DataType::UInt64, false),
            Field::new("block_hash", DataType::Utf8, false),
            Field::new("parent_hash", DataType::Utf8, false),
            Field::new("is_canonical", DataType::Boolean, false),
            Field::new("observed_at", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                arr_u64(rows.iter().map(|r| r.chain_id)),
                arr_u64(rows.iter().map(|r| r.block_number)),
                arr_str(rows.iter().map(|r| r.block_hash.as_str())),
                arr_str(rows.iter().map(|r| r.parent_hash.as_str())),
                Arc::new(BooleanArray::from(rows.iter().map(|r| r.is_canonical).collect::<Vec<_>>())) as ArrayRef,
                arr_str(rows.iter().map(|r| r.observed_at.as_str())),
            ],
        )?;
        self.write_batch("bronze", "canonical_blocks", filename, batch)
    }

    pub fn write_erc20_transfers(&self, rows: &[ErcTransferRow], filename: &str) -> Result<Option<PathBuf>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let schema = Arc::new(Schema::new(vec![
            Field::new("chain_id", DataType::UInt64, false),
            Field::new("block_number", DataType::UInt64, false),
            Field::new("tx_hash", DataType::Utf8, false),
            Field::new("log_index", DataType::UInt64, false),
            Field::new("contract_address", DataType::Utf8, false),
            Field::new("from_address", DataType::Utf8, false),
            Field::new("to_address", DataType::Utf8, false),
            Field::new("value_raw", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                arr_u64(rows.iter().map(|r| r.chain_id)),
                arr_u64(rows.iter().map(|r| r.block_number)),
                arr_str(rows.iter().map(|r| r.tx_hash.as_str())),
                arr_u64(rows.iter().map(|r| r.log_index)),
                arr_str(rows.iter().map(|r| r.contract_address.as_str())),
                arr_str(rows.iter().map(|r| r.from_address.as_str())),
                arr_str(rows.iter().map(|r| r.to_address.as_str())),
                arr_str(rows.iter().map(|r| r.value_raw.as_str())),
            ],
        )?;
        self.write_batch("silver", "event_erc20_transfer", filename, batch)
    }

    pub fn write_uniswap_v2_swaps(&self, rows: &[UniswapSwapRow], filename: &str) -> Result<Option<PathBuf>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let schema = Arc::new(Schema::new(vec![
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
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                arr_u64(rows.iter().map(|r| r.chain_id)),
                arr_u64(rows.iter().map(|r| r.block_number)),
                arr_str(rows.iter().map(|r| r.tx_hash.as_str())),
                arr_u64(rows.iter().map(|r| r.log_index)),
                arr_str(rows.iter().map(|r| r.pair_address.as_str())),
                arr_str(rows.iter().map(|r| r.sender.as_str())),
                arr_str(rows.iter().map(|r| r.to_address.as_str())),
                arr_str(rows.iter().map(|r| r.amount0_in.as_str())),
                arr_str(rows.iter().map(|r| r.amount1_in.as_str())),
                arr_str(rows.iter().map(|r| r.amount0_out.as_str())),
                arr_str(rows.iter().map(|r| r.amount1_out.as_str())),
            ],
        )?;
        self.write_batch("silver", "event_uniswap_v2_swap", filename, batch)
    }
}

fn arr_u64(it: impl Iterator<Item = u64>) -> ArrayRef {
    Arc::new(UInt64Array::from(it.collect::<Vec<_>>()))
}

fn arr_u32(it: impl Iterator<Item = u32>) -> ArrayRef {
    Arc::new(UInt32Array::from(it.collect::<Vec<_>>()))
}

fn arr_str<'a>(it: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from(it.collect::<Vec<_>>()))
}

fn arr_opt_str<'a>(it: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(StringArray::from(it.collect::<Vec<_>>()))
}

/// `logs_raw.topics` field: a `list<string>`, matching §6's `topics:list[str]`.
pub fn topics_field() -> Field {
    Field::new("topics", DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))), false)
}

fn arr_topics<'a>(it: impl Iterator<Item = &'a [String]>) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for topics in it {
        for topic in topics {
            builder.values().append_value(topic);
        }
        builder.append(true);
    }
    Arc::new(builder.finish()) as ArrayRef
}

pub fn range_filename(start_block: u64, end_block: u64) -> String {
    format!("range_{start_block:012}_{end_block:012}")
}

/// Read a previously written `logs_raw` Parquet file back into [`LogRow`]s,
/// for the standalone decode command that re-runs decoding without
/// re-fetching from the node.
pub fn read_logs(path: &Path) -> Result<Vec<LogRow>> {
    use arrow_array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("open parquet reader for {}", path.display()))?
        .build()
        .with_context(|| format!("build parquet reader for {}", path.display()))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("read batch from {}", path.display()))?;
        let col = |name: &str| -> Result<&ArrayRef> {
            let idx = batch.schema().index_of(name).with_context(|| format!("missing column {name}"))?;
            Ok(batch.column(idx))
        };
        let chain_id = col("chain_id")?.as_any().downcast_ref::<UInt64Array>().context("chain_id not u64")?;
        let block_number = col("block_number")?.as_any().downcast_ref::<UInt64Array>().context("block_number not u64")?;
        let block_hash = col("block_hash")?.as_any().downcast_ref::<StringArray>().context("block_hash not utf8")?;
        let tx_hash = col("tx_hash")?.as_any().downcast_ref::<StringArray>().context("tx_hash not utf8")?;
        let tx_index = col("tx_index")?.as_any().downcast_ref::<UInt64Array>().context("tx_index not u64")?;
        let log_index = col("log_index")?.as_any().downcast_ref::<UInt64Array>().context("log_index not u64")?;
        let address = col("address")?.as_any().downcast_ref::<StringArray>().context("address not utf8")?;
        let data = col("data")?.as_any().downcast_ref::<StringArray>().context("data not utf8")?;
        let topics = col("topics")?.as_any().downcast_ref::<ListArray>().context("topics not a list")?;
        let removed = col("removed")?.as_any().downcast_ref::<BooleanArray>().context("removed not bool")?;

        for i in 0..batch.num_rows() {
            let topic_values = topics.value(i);
            let topic_strings = topic_values.as_any().downcast_ref::<StringArray>().context("topics item not utf8")?;
            rows.push(LogRow {
                chain_id: chain_id.value(i),
                block_number: block_number.value(i),
                block_hash: block_hash.value(i).to_string(),
                tx_hash: tx_hash.value(i).to_string(),
                tx_index: tx_index.value(i),
                log_index: log_index.value(i),
                address: address.value(i).to_string(),
                data: data.value(i).to_string(),
                topics: (0..topic_strings.len()).map(|j| topic_strings.value(j).to_string()).collect(),
                removed: removed.value(i),
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::BlockRow;

    fn block(n: u64) -> BlockRow {
        BlockRow {
            chain_id: 1,
            block_number: n,
            block_hash: format!("0xh{n}"),
            parent_hash: format!("0xh{}", n.saturating_sub(1)),
            timestamp: 1_700_000_000 + n,
            miner: "0xminer".into(),
            gas_used: 21_000,
            gas_limit: 30_000_000,
            base_fee_per_gas: Some("1000000000".into()),
            tx_count: 0,
            observed_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn empty_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Writer::new(dir.path());
        let result = writer.write_blocks(&[], "range_0_0").unwrap();
        assert!(result.is_none());
        assert!(!dir.path().join("lake/bronze/blocks_raw").exists());
    }

    #[test]
    fn writes_parquet_file_at_expected_path() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Writer::new(dir.path());
        let path = writer
            .write_blocks(&[block(100), block(101)], &range_filename(100, 101))
            .unwrap()
            .unwrap();
        assert!(path.exists());
        assert_eq!(
            path,
            dir.path().join("lake/bronze/blocks_raw/range_000000000100_000000000101.parquet")
        );
    }

    #[test]
    fn topics_round_trip_as_a_list_not_a_joined_string() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Writer::new(dir.path());
        let rows = vec![
            LogRow {
                chain_id: 1,
                block_number: 100,
                block_hash: "0xblk".into(),
                tx_hash: "0xtx".into(),
                tx_index: 0,
                log_index: 0,
                address: "0xtoken".into(),
                data: "0x".into(),
                topics: vec!["0xaaa".into(), "0xbbb".into()],
                removed: false,
            },
            LogRow {
                chain_id: 1,
                block_number: 101,
                block_hash: "0xblk2".into(),
                tx_hash: "0xtx2".into(),
                tx_index: 0,
                log_index: 0,
                address: "0xtoken".into(),
                data: "0x".into(),
                topics: vec![],
                removed: false,
            },
        ];
        let path = writer.write_logs(&rows, "range_000000000100_000000000101").unwrap().unwrap();
        let read = read_logs(&path).unwrap();
        assert_eq!(read[0].topics, vec!["0xaaa".to_string(), "0xbbb".to_string()]);
        assert!(read[1].topics.is_empty());
    }
}
