use crate::atomic_json;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-chain ingestion cursor: the last block successfully written, its
/// hash, and when the cursor last moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainCursor {
    pub last_block_number: u64,
    pub last_block_hash: String,
    pub updated_at: String,
}

/// Whole-file JSON document keyed by stringified chain id. Not
/// concurrency-safe: only one worker per chain is assumed (§4.C).
pub struct CanonicalState {
    path: PathBuf,
    chains: HashMap<String, ChainCursor>,
}

impl CanonicalState {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let chains = atomic_json::load(&path)?;
        Ok(Self { path, chains })
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainCursor> {
        self.chains.get(&chain_id.to_string())
    }

    pub fn set(&mut self, chain_id: u64, cursor: ChainCursor) -> Result<()> {
        self.chains.insert(chain_id.to_string(), cursor);
        atomic_json::store(&self.path, &self.chains)
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_has_no_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let state = CanonicalState::open(dir.path().join("canonical_state.json")).unwrap();
        assert!(state.get(1).is_none());
    }

    #[test]
    fn set_then_reopen_roundtrips() {
        let path: std::path::PathBuf =
            tempfile::tempdir().unwrap().keep().join("canonical_state.json");
        let mut state = CanonicalState::open(&path).unwrap();
        state
            .set(
                1,
                ChainCursor {
                    last_block_number: 100,
                    last_block_hash: "0xabc".to_string(),
                    updated_at: now_rfc3339(),
                },
            )
            .unwrap();
        assert_eq!(state.get(1).unwrap().last_block_number, 100);

        let reopened = CanonicalState::open(&path).unwrap();
        assert_eq!(reopened.get(1).unwrap().last_block_hash, "0xabc");
    }

    #[test]
    fn chains_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canonical_state.json");
        let mut state = CanonicalState::open(&path).unwrap();
        state
            .set(
                1,
                ChainCursor { last_block_number: 10, last_block_hash: "0x1".into(), updated_at: now_rfc3339() },
            )
            .unwrap();
        state
            .set(
                10,
                ChainCursor { last_block_number: 50, last_block_hash: "0x2".into(), updated_at: now_rfc3339() },
            )
            .unwrap();
        assert_eq!(state.get(1).unwrap().last_block_number, 10);
        assert_eq!(state.get(10).unwrap().last_block_number, 50);
    }
}
