use crate::atomic_json;
use crate::planner::RangeCheckpoint;
use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Persisted set of completed sub-ranges, keyed by `"{start}-{end}"`.
///
/// `mark_done` must only be called after the corresponding range's four
/// output partitions are durably written; a crash before `mark_done` simply
/// means the next run re-fetches the range and overwrites the same
/// range-tagged files byte-identically.
pub struct CheckpointStore {
    path: PathBuf,
    done: HashMap<String, bool>,
}

impl CheckpointStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let done = atomic_json::load(&path)?;
        Ok(Self { path, done })
    }

    pub fn is_done(&self, range: &RangeCheckpoint) -> bool {
        self.done.get(&range.key()).copied().unwrap_or(false)
    }

    pub fn mark_done(&mut self, ranges: &[RangeCheckpoint]) -> Result<()> {
        for r in ranges {
            self.done.insert(r.key(), true);
        }
        atomic_json::store(&self.path, &self.done)
    }

    pub fn list_done(&self) -> Vec<RangeCheckpoint> {
        self.done
            .keys()
            .filter_map(|key| {
                let (start, end) = key.split_once('-')?;
                Some(RangeCheckpoint {
                    start_block: start.parse().ok()?,
                    end_block: end.parse().ok()?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> RangeCheckpoint {
        RangeCheckpoint { start_block: start, end_block: end }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("checkpoints.json")).unwrap();
        assert!(!store.is_done(&range(0, 9)));
    }

    #[test]
    fn mark_done_persists_across_reopen() {
        let path = tempfile::tempdir().unwrap().keep().join("checkpoints.json");
        {
            let mut store = CheckpointStore::open(&path).unwrap();
            store.mark_done(&[range(0, 9), range(10, 19)]).unwrap();
        }
        let store = CheckpointStore::open(&path).unwrap();
        assert!(store.is_done(&range(0, 9)));
        assert!(store.is_done(&range(10, 19)));
        assert!(!store.is_done(&range(20, 29)));
    }

    #[test]
    fn s5_partial_crash_only_commits_marked_ranges() {
        let path = tempfile::tempdir().unwrap().keep().join("checkpoints.json");
        let mut store = CheckpointStore::open(&path).unwrap();
        store.mark_done(&[range(0, 9)]).unwrap();
        store.mark_done(&[range(10, 19)]).unwrap();
        // Simulate a crash: range (20,29)'s files were written but mark_done
        // never ran. A fresh load must not consider it done.
        let reopened = CheckpointStore::open(&path).unwrap();
        assert!(reopened.is_done(&range(0, 9)));
        assert!(reopened.is_done(&range(10, 19)));
        assert!(!reopened.is_done(&range(20, 29)));
    }
}
