//! Named JSON state blobs behind an injectable trait.
//!
//! Every learner persists its whole state as one blob per name
//! (`bandit_beta`, `guardrails`, `uplift`, ...). An absent or
//! unreadable blob deserializes to `None` so callers fall back to
//! fresh priors instead of failing a decision.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use nudge_core::NudgeResult;

/// Loads and saves named state blobs as raw JSON bytes.
///
/// At most one process writes a given store root at a time; that is a
/// convention of the deployment, not something this trait enforces.
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when the blob is absent or unreadable.
    fn load_raw(&self, name: &str) -> NudgeResult<Option<Vec<u8>>>;
    fn save_raw(&self, name: &str, payload: &[u8]) -> NudgeResult<()>;
}

impl dyn StateStore + '_ {
    /// Typed load. Malformed payloads are logged and treated as absent
    /// so learners reinitialize instead of wedging the pipeline.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> NudgeResult<Option<T>> {
        let Some(bytes) = self.load_raw(name)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(blob = name, error = %err, "discarding corrupt state blob");
                Ok(None)
            }
        }
    }

    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> NudgeResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.save_raw(name, &bytes)
    }
}

/// Blobs as `<root>/<name>.json` files.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load_raw(&self, name: &str) -> NudgeResult<Option<Vec<u8>>> {
        let path = self.blob_path(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                warn!(blob = name, path = %path.display(), error = %err, "state blob unreadable");
                Ok(None)
            }
        }
    }

    fn save_raw(&self, name: &str, payload: &[u8]) -> NudgeResult<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.blob_path(name), payload)?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStateStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load_raw(&self, name: &str) -> NudgeResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(name).map(|b| b.clone()))
    }

    fn save_raw(&self, name: &str, payload: &[u8]) -> NudgeResult<()> {
        self.blobs.insert(name.to_string(), payload.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        count: u32,
        label: String,
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        let store: &dyn StateStore = &store;
        assert_eq!(store.load::<Blob>("missing").unwrap(), None);

        let blob = Blob {
            count: 3,
            label: "hello".into(),
        };
        store.save("blob", &blob).unwrap();
        assert_eq!(store.load::<Blob>("blob").unwrap(), Some(blob));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let store: &dyn StateStore = &store;

        let blob = Blob {
            count: 9,
            label: "persisted".into(),
        };
        store.save("guardrails", &blob).unwrap();
        assert!(dir.path().join("guardrails.json").exists());
        assert_eq!(store.load::<Blob>("guardrails").unwrap(), Some(blob));
    }

    #[test]
    fn test_corrupt_blob_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bandit_beta.json"), b"{definitely not json").unwrap();

        let store = FileStateStore::new(dir.path());
        let store: &dyn StateStore = &store;
        assert_eq!(store.load::<Blob>("bandit_beta").unwrap(), None);
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested"));
        let store: &dyn StateStore = &store;
        assert_eq!(store.load::<Blob>("absent").unwrap(), None);
    }
}
