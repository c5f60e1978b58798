use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// A single `[start_block, end_block]` sub-range, as planned by [`plan`] and
/// consumed by the checkpoint store and batch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCheckpoint {
    pub start_block: u64,
    pub end_block: u64,
}

impl RangeCheckpoint {
    pub fn key(&self) -> String {
        format!("{}-{}", self.start_block, self.end_block)
    }
}

/// One line of the plan file: a range tagged with the chain it belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannedRange {
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: u64,
}

impl PlannedRange {
    pub fn checkpoint(&self) -> RangeCheckpoint {
        RangeCheckpoint {
            start_block: self.start_block,
            end_block: self.end_block,
        }
    }
}

/// Split `[start, end]` into contiguous, non-overlapping sub-ranges of at
/// most `chunk` blocks each. `lo_0 = start`, `hi_n = end`.
pub fn plan(start: u64, end: u64, chunk: u64) -> Result<Vec<(u64, u64)>> {
    if end < start {
        bail!("plan: end ({end}) < start ({start})");
    }
    if chunk == 0 {
        bail!("plan: chunk must be > 0");
    }

    let mut ranges = Vec::new();
    let mut current = start;
    while current <= end {
        let upper = (current + chunk - 1).min(end);
        ranges.push((current, upper));
        current = upper + 1;
    }
    Ok(ranges)
}

/// Append (or overwrite) a planned line-oriented JSONL record stream.
pub fn write_plan_file(path: &Path, chain_id: u64, ranges: &[(u64, u64)], append: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;

    for (start_block, end_block) in ranges {
        let record = PlannedRange {
            chain_id,
            start_block: *start_block,
            end_block: *end_block,
        };
        writeln!(file, "{}", serde_json::to_string(&record)?)
            .with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}

pub fn read_plan_file(path: &Path) -> Result<Vec<PlannedRange>> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: PlannedRange =
            serde_json::from_str(&line).with_context(|| format!("parse plan line: {line}"))?;
        out.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_planner_covers_exactly() {
        let ranges = plan(100, 250, 50).unwrap();
        assert_eq!(
            ranges,
            vec![(100, 149), (150, 199), (200, 249), (250, 250)]
        );
    }

    #[test]
    fn single_block_chunk() {
        assert_eq!(plan(5, 5, 1).unwrap(), vec![(5, 5)]);
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(plan(10, 5, 1).is_err());
    }

    #[test]
    fn rejects_zero_chunk() {
        assert!(plan(5, 10, 0).is_err());
    }

    #[test]
    fn exact_multiple_of_chunk_has_no_trailing_short_range() {
        let ranges = plan(0, 99, 50).unwrap();
        assert_eq!(ranges, vec![(0, 49), (50, 99)]);
    }

    #[test]
    fn plan_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans").join("ranges.jsonl");
        write_plan_file(&path, 1, &[(0, 9), (10, 19)], false).unwrap();
        let read = read_plan_file(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].start_block, 0);
        assert_eq!(read[1].end_block, 19);

        write_plan_file(&path, 1, &[(20, 29)], true).unwrap();
        let read = read_plan_file(&path).unwrap();
        assert_eq!(read.len(), 3);
    }
}
