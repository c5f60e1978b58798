use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read a JSON document, treating a missing file as `T::default()`.
pub fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

/// Durably persist a JSON document: write to a tempfile in the same
/// directory, then atomically rename over the destination. A crash at any
/// point leaves either the old file or the new one intact, never a partial
/// write.
pub fn store<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create tempfile in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value).context("serialize json")?;
    use std::io::Write;
    tmp.flush().context("flush tempfile")?;
    tmp.persist(path)
        .with_context(|| format!("rename tempfile onto {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Doc {
        n: u64,
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc: Doc = load(&path).unwrap();
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn store_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        store(&path, &Doc { n: 42 }).unwrap();
        let doc: Doc = load(&path).unwrap();
        assert_eq!(doc, Doc { n: 42 });
    }

    #[test]
    fn store_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        store(&path, &Doc { n: 1 }).unwrap();
        store(&path, &Doc { n: 2 }).unwrap();
        let doc: Doc = load(&path).unwrap();
        assert_eq!(doc, Doc { n: 2 });
    }
}
