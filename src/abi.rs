use alloy::json_abi::{Event, JsonAbi};
use alloy::primitives::keccak256;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One versioned ABI assignment for a protocol: which file to load, from
/// which block it takes effect, and an optional explicit version tag.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub abi: String,
    pub start_block: u64,
    pub version: Option<u32>,
}

/// `registry.json`: protocol name to an ordered list of ABI assignments.
/// Ordering matters for resolution (§4.I): entries are expected sorted by
/// ascending `start_block`, so "the entry with the largest start_block" and
/// "largest start_block <= block_number" can both be found by scanning in
/// order.
#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(flatten)]
    protocols: HashMap<String, Vec<RegistryEntry>>,
}

/// Loads and memoizes JSON ABIs, and resolves an event definition for a
/// protocol against an optional registry of versioned ABI files. A protocol
/// absent from the registry falls back to `<abi_dir>/<protocol>.json`
/// directly, so a single-version protocol never needs a registry entry.
pub struct AbiRegistry {
    dir: PathBuf,
    protocols: HashMap<String, Vec<RegistryEntry>>,
    loaded: HashMap<String, JsonAbi>,
}

impl AbiRegistry {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let registry_path = dir.join("registry.json");
        let protocols = if registry_path.exists() {
            let bytes = std::fs::read(&registry_path)
                .with_context(|| format!("read {}", registry_path.display()))?;
            let file: RegistryFile = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse {}", registry_path.display()))?;
            file.protocols
        } else {
            HashMap::new()
        };
        Ok(Self { dir, protocols, loaded: HashMap::new() })
    }

    /// Load (and memoize) the JSON ABI found at `<abi_dir>/<filename>` (the
    /// filename has no implicit `.json` suffix appended beyond what's
    /// passed, so registry entries and bare protocol names both work).
    pub fn load(&mut self, filename: &str) -> Result<&JsonAbi> {
        if !self.loaded.contains_key(filename) {
            let path = self.dir.join(filename);
            let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            let abi: JsonAbi =
                serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
            self.loaded.insert(filename.to_string(), abi);
        }
        Ok(self.loaded.get(filename).expect("just inserted"))
    }

    /// Resolve an ABI filename for `protocol` per §4.I's rules: explicit
    /// version match first, then largest `start_block <= block_number`,
    /// then the latest entry, then a bare `<protocol>.json` fallback.
    fn resolve_abi_filename(&self, protocol: &str, block_number: Option<u64>, version: Option<u32>) -> String {
        let Some(entries) = self.protocols.get(protocol) else {
            return format!("{protocol}.json");
        };
        if let Some(v) = version {
            if let Some(entry) = entries.iter().find(|e| e.version == Some(v)) {
                return entry.abi.clone();
            }
        }
        if let Some(n) = block_number {
            if let Some(entry) = entries.iter().filter(|e| e.start_block <= n).max_by_key(|e| e.start_block) {
                return entry.abi.clone();
            }
        }
        if let Some(entry) = entries.iter().max_by_key(|e| e.start_block) {
            return entry.abi.clone();
        }
        format!("{protocol}.json")
    }

    /// Resolve and return the named event from the ABI version applicable
    /// to `protocol` at `block_number` (or `version`, if given).
    pub fn get_event(
        &mut self,
        protocol: &str,
        event_name: &str,
        block_number: Option<u64>,
        version: Option<u32>,
    ) -> Result<Event> {
        let filename = self.resolve_abi_filename(protocol, block_number, version);
        let abi = self.load(&filename)?;
        abi.events
            .get(event_name)
            .and_then(|events| events.first())
            .cloned()
            .with_context(|| format!("event {event_name} not found in {filename} for protocol {protocol}"))
    }
}

/// `"0x" + keccak256(signature)`, where `signature` is the event's canonical
/// `Name(type1,type2,...)` string, as `alloy_json_abi::Event::signature`
/// already produces it.
pub fn event_topic(event: &Event) -> String {
    let hash = keccak256(event.signature().as_bytes());
    format!("0x{}", hex::encode(hash))
}

/// Same as [`event_topic`] but for a raw signature string, used by decoders
/// that match against a statically known signature rather than a resolved
/// `Event`.
pub fn event_topic_for_signature(signature: &str) -> String {
    let hash = keccak256(signature.as_bytes());
    format!("0x{}", hex::encode(hash))
}

/// Extract a 20-byte address from an indexed topic (the address occupies the
/// low 20 bytes of the 32-byte topic word).
pub fn address_from_topic(topic: &str) -> Result<String> {
    let trimmed = topic.strip_prefix("0x").unwrap_or(topic);
    if trimmed.len() != 64 {
        bail!("topic is not a 32-byte word: {topic}");
    }
    Ok(format!("0x{}", &trimmed[24..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_erc20_transfer_topic_matches_known_value() {
        assert_eq!(
            event_topic_for_signature("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn address_from_topic_extracts_low_20_bytes() {
        let topic = format!("0x{}{}", "0".repeat(24), "ab".repeat(20));
        assert_eq!(address_from_topic(&topic).unwrap(), format!("0x{}", "ab".repeat(20)));
    }

    #[test]
    fn address_from_topic_rejects_wrong_length() {
        assert!(address_from_topic("0x1234").is_err());
    }

    fn write_dir() -> PathBuf {
        tempfile::tempdir().unwrap().keep()
    }

    #[test]
    fn unregistered_protocol_falls_back_to_bare_filename() {
        let dir = write_dir();
        std::fs::write(dir.join("erc20.json"), "[]").unwrap();
        let registry = AbiRegistry::open(&dir).unwrap();
        assert_eq!(registry.resolve_abi_filename("erc20", None, None), "erc20.json");
    }

    #[test]
    fn versioned_resolution_picks_start_block_floor() {
        let dir = write_dir();
        std::fs::write(
            dir.join("registry.json"),
            r#"{"uniswap_v2":[
                {"abi":"uniswap_v2_v1.json","start_block":0,"version":1},
                {"abi":"uniswap_v2_v2.json","start_block":1000,"version":2}
            ]}"#,
        )
        .unwrap();
        let registry = AbiRegistry::open(&dir).unwrap();
        assert_eq!(registry.resolve_abi_filename("uniswap_v2", Some(500), None), "uniswap_v2_v1.json");
        assert_eq!(registry.resolve_abi_filename("uniswap_v2", Some(1500), None), "uniswap_v2_v2.json");
        assert_eq!(registry.resolve_abi_filename("uniswap_v2", None, Some(1)), "uniswap_v2_v1.json");
        assert_eq!(registry.resolve_abi_filename("uniswap_v2", None, None), "uniswap_v2_v2.json");
    }
}
