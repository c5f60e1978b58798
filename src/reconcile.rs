use anyhow::{Context, Result};
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::fs::File;
use std::path::Path;
use tracing::warn;

/// Per-table row-count report, summed from Parquet row-group metadata
/// rather than a full scan. This is deliberately shallow: it catches
/// missing or truncated files, not row-level duplication or omission
/// within a file (that is the compactor's job).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TableReport {
    pub table: String,
    pub file_count: u64,
    pub row_count: u64,
}

pub fn reconcile_table(warehouse_dir: &Path, layer: &str, table: &str) -> Result<TableReport> {
    let dir = warehouse_dir.join("lake").join(layer).join(table);
    let mut report = TableReport { table: table.to_string(), ..Default::default() };

    if !dir.exists() {
        return Ok(report);
    }

    for entry in std::fs::read_dir(&dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
            continue;
        }
        match row_count(&path) {
            Ok(n) => {
                report.file_count += 1;
                report.row_count += n;
            }
            Err(err) => warn!(file = %path.display(), error = %err, "skipping unreadable parquet file during reconcile"),
        }
    }

    Ok(report)
}

fn row_count(path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).with_context(|| format!("open parquet metadata for {}", path.display()))?;
    Ok(reader.metadata().file_metadata().num_rows() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_directory_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let report = reconcile_table(dir.path(), "bronze", "blocks_raw").unwrap();
        assert_eq!(report.file_count, 0);
        assert_eq!(report.row_count, 0);
    }
}
