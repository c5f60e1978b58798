use anyhow::{Context, Result, bail};
use datafusion::prelude::{ParquetReadOptions, SessionContext};
use std::path::{Path, PathBuf};
use tracing::info;

/// A table's natural key and, when one exists, the column that breaks ties
/// between duplicate writes (the most recently observed row wins).
struct CompactionSpec {
    table: &'static str,
    partition_cols: &'static [&'static str],
    order_col: Option<&'static str>,
}

const TABLES: &[CompactionSpec] = &[
    CompactionSpec { table: "blocks_raw", partition_cols: &["chain_id", "block_number"], order_col: Some("observed_at") },
    CompactionSpec { table: "canonical_blocks", partition_cols: &["chain_id", "block_number"], order_col: Some("observed_at") },
    CompactionSpec { table: "transactions_raw", partition_cols: &["chain_id", "tx_hash"], order_col: None },
    CompactionSpec { table: "logs_raw", partition_cols: &["chain_id", "tx_hash", "log_index"], order_col: None },
];

const SILVER_TABLES: &[CompactionSpec] = &[
    CompactionSpec { table: "event_erc20_transfer", partition_cols: &["chain_id", "tx_hash", "log_index"], order_col: None },
    CompactionSpec { table: "event_uniswap_v2_swap", partition_cols: &["chain_id", "tx_hash", "log_index"], order_col: None },
];

#[derive(Debug, Default, serde::Serialize)]
pub struct CompactionReport {
    pub table: String,
    pub rows_before: u64,
    pub rows_after: u64,
}

/// Rewrite every bronze and silver table, keeping exactly one row per
/// natural key: the last-observed row wins on tables where write order
/// matters (those with `observed_at`), otherwise an arbitrary surviving
/// row is kept. Analogous to the upstream compactor's DuckDB
/// `row_number() over (partition by ... order by observed_at desc)` pass.
pub async fn compact_warehouse(warehouse_dir: &Path) -> Result<Vec<CompactionReport>> {
    let mut reports = Vec::new();
    for spec in TABLES {
        if let Some(report) = compact_table(warehouse_dir, "bronze", spec).await? {
            reports.push(report);
        }
    }
    for spec in SILVER_TABLES {
        if let Some(report) = compact_table(warehouse_dir, "silver", spec).await? {
            reports.push(report);
        }
    }
    Ok(reports)
}

async fn compact_table(warehouse_dir: &Path, layer: &str, spec: &CompactionSpec) -> Result<Option<CompactionReport>> {
    let dir = warehouse_dir.join("lake").join(layer).join(spec.table);
    if !dir.exists() || std::fs::read_dir(&dir)?.next().is_none() {
        return Ok(None);
    }

    let ctx = SessionContext::new();
    let glob = dir.join("*.parquet");
    ctx.register_parquet(spec.table, glob.to_string_lossy().as_ref(), ParquetReadOptions::default())
        .await
        .with_context(|| format!("register {}", dir.display()))?;

    let rows_before = ctx
        .sql(&format!("select count(*) as n from {}", spec.table))
        .await?
        .collect()
        .await?
        .first()
        .and_then(|b| b.column(0).as_any().downcast_ref::<datafusion::arrow::array::Int64Array>().map(|a| a.value(0)))
        .unwrap_or(0) as u64;

    let partition_by = spec.partition_cols.join(", ");
    let order_clause = spec.order_col.map(|c| format!(" order by {c} desc")).unwrap_or_default();
    let sql = format!(
        "select * from (select *, row_number() over (partition by {partition_by}{order_clause}) as rn from {table}) t where rn = 1",
        table = spec.table,
    );
    let df = ctx.sql(&sql).await.with_context(|| format!("compact query for {}", spec.table))?;
    let batches = df.collect().await.with_context(|| format!("collect compacted {}", spec.table))?;

    let rows_after: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();

    let compacted_path = write_compacted(&dir, &batches)?;
    cleanup_superseded(&dir, &compacted_path)?;

    info!(table = spec.table, rows_before, rows_after, "compacted table");
    Ok(Some(CompactionReport { table: spec.table.to_string(), rows_before, rows_after }))
}

fn write_compacted(
    dir: &Path,
    batches: &[datafusion::arrow::record_batch::RecordBatch],
) -> Result<PathBuf> {
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;

    let Some(first) = batches.first() else { bail!("compaction produced no batches for {}", dir.display()) };
    let schema = first.schema();
    let path = dir.join("compacted.parquet.tmp");
    let file = std::fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(WriterProperties::builder().build()))
        .context("open compacted parquet writer")?;
    for batch in batches {
        // drop the synthetic row_number column before persisting
        let trimmed = drop_rn_column(batch)?;
        writer.write(&trimmed).context("write compacted batch")?;
    }
    writer.close().context("close compacted writer")?;

    let final_path = dir.join("compacted.parquet");
    std::fs::rename(&path, &final_path).with_context(|| format!("rename onto {}", final_path.display()))?;
    Ok(final_path)
}

fn drop_rn_column(
    batch: &datafusion::arrow::record_batch::RecordBatch,
) -> Result<datafusion::arrow::record_batch::RecordBatch> {
    let schema = batch.schema();
    let keep: Vec<usize> = (0..schema.fields().len())
        .filter(|&i| schema.field(i).name() != "rn")
        .collect();
    Ok(batch.project(&keep)?)
}

fn cleanup_superseded(dir: &Path, compacted_path: &Path) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path == compacted_path {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            std::fs::remove_file(&path).with_context(|| format!("remove superseded {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_table_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let reports = compact_warehouse(dir.path()).await.unwrap();
        assert!(reports.is_empty());
    }
}
