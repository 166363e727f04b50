//! Document-store persistence for checkpoint records.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::record::{CheckpointRecord, Query};

/// A document store holding checkpoint records.
///
/// Stores are accessed only at save/restore boundaries; the run controller
/// serializes operations for a given experiment identifier. `find` returns
/// matches ordered by ascending step (most recent last).
pub trait DocumentStore: Send {
    /// Inserts a record. Records are immutable once inserted.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backing storage rejects the write.
    fn insert(&mut self, record: CheckpointRecord) -> Result<()>;

    /// Returns all matching records, ordered by ascending step.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backing storage cannot be read.
    fn find(&self, query: &Query) -> Result<Vec<CheckpointRecord>>;

    /// Deletes matching records, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backing storage rejects the write.
    fn delete(&mut self, query: &Query) -> Result<usize>;

    /// Returns the most recent matching record, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backing storage cannot be read.
    fn latest(&self, query: &Query) -> Result<Option<CheckpointRecord>> {
        Ok(self.find(query)?.into_iter().next_back())
    }
}

/// In-memory document store.
///
/// Clones share the same underlying records, which is how a test hands the
/// "same database" to two consecutive runner lifetimes.
///
/// # Example
///
/// ```
/// use gantry_store::{CheckpointRecord, DocumentStore, MemoryStore, Query};
///
/// let mut store = MemoryStore::new();
/// store.insert(CheckpointRecord::new("exp1", 5)).unwrap();
///
/// let twin = store.clone();
/// assert_eq!(twin.find(&Query::new("exp1")).unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<CheckpointRecord>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<CheckpointRecord>>> {
        self.records
            .lock()
            .map_err(|_| StoreError::unavailable("memory store mutex poisoned"))
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&mut self, record: CheckpointRecord) -> Result<()> {
        self.lock()?.push(record);
        Ok(())
    }

    fn find(&self, query: &Query) -> Result<Vec<CheckpointRecord>> {
        let mut matches: Vec<_> = self
            .lock()?
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matches.sort_by_key(|r| r.step);
        Ok(matches)
    }

    fn delete(&mut self, query: &Query) -> Result<usize> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|r| !query.matches(r));
        Ok(before - records.len())
    }
}

/// Document store backed by one JSON file.
///
/// The whole record collection is one JSON document, rewritten on every
/// mutation. That keeps the format inspectable and lets separate process
/// lifetimes share an experiment the way the original system shared a
/// database, at the cost of rewrite-on-save, which is acceptable at
/// checkpoint frequencies.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store over the given file path. The file is created on
    /// first insert.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<CheckpointRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, records: &[CheckpointRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string(records)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

impl DocumentStore for JsonFileStore {
    fn insert(&mut self, record: CheckpointRecord) -> Result<()> {
        let mut records = self.load()?;
        debug!(exp_id = %record.exp_id, step = record.step, "inserting checkpoint record");
        records.push(record);
        self.save(&records)
    }

    fn find(&self, query: &Query) -> Result<Vec<CheckpointRecord>> {
        let mut matches: Vec<_> = self
            .load()?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();
        matches.sort_by_key(|r| r.step);
        Ok(matches)
    }

    fn delete(&mut self, query: &Query) -> Result<usize> {
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| !query.matches(r));
        let removed = before - records.len();
        if removed > 0 {
            self.save(&records)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("gantry-store-test-{}-{name}.json", std::process::id()));
        path
    }

    #[test]
    fn memory_store_insert_find_delete() {
        let mut store = MemoryStore::new();
        store.insert(CheckpointRecord::new("exp1", 2)).unwrap();
        store.insert(CheckpointRecord::new("exp1", 1)).unwrap();
        store.insert(CheckpointRecord::new("exp2", 1)).unwrap();

        let found = store.find(&Query::new("exp1")).unwrap();
        assert_eq!(found.len(), 2);
        // Ascending step order, most recent last.
        assert_eq!(found[0].step, 1);
        assert_eq!(found[1].step, 2);

        assert_eq!(store.delete(&Query::new("exp1")).unwrap(), 2);
        assert!(store.find(&Query::new("exp1")).unwrap().is_empty());
        assert_eq!(store.find(&Query::new("exp2")).unwrap().len(), 1);
    }

    #[test]
    fn memory_store_latest() {
        let mut store = MemoryStore::new();
        assert!(store.latest(&Query::new("exp1")).unwrap().is_none());

        store.insert(CheckpointRecord::new("exp1", 5)).unwrap();
        store.insert(CheckpointRecord::new("exp1", 25)).unwrap();
        store.insert(CheckpointRecord::new("exp1", 10)).unwrap();

        let latest = store.latest(&Query::new("exp1")).unwrap().unwrap();
        assert_eq!(latest.step, 25);
    }

    #[test]
    fn memory_store_clones_share_records() {
        let mut store = MemoryStore::new();
        let twin = store.clone();
        store.insert(CheckpointRecord::new("exp1", 1)).unwrap();
        assert_eq!(twin.find(&Query::new("exp1")).unwrap().len(), 1);
    }

    #[test]
    fn json_file_store_roundtrip() {
        let path = temp_path("roundtrip");
        let _ = fs::remove_file(&path);

        let mut store = JsonFileStore::new(&path);
        assert!(store.find(&Query::new("exp1")).unwrap().is_empty());

        store
            .insert(CheckpointRecord::new("exp1", 7).with_metric("loss", 0.5))
            .unwrap();

        // A second store over the same file sees the record.
        let reopened = JsonFileStore::new(&path);
        let found = reopened.find(&Query::new("exp1")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metrics["loss"], 0.5);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn json_file_store_delete() {
        let path = temp_path("delete");
        let _ = fs::remove_file(&path);

        let mut store = JsonFileStore::new(&path);
        store.insert(CheckpointRecord::new("exp1", 1)).unwrap();
        store.insert(CheckpointRecord::new("exp2", 1)).unwrap();

        assert_eq!(store.delete(&Query::new("exp1")).unwrap(), 1);
        assert_eq!(store.delete(&Query::new("exp1")).unwrap(), 0);
        assert_eq!(store.find(&Query::new("exp2")).unwrap().len(), 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn json_file_store_rejects_corrupt_file() {
        let path = temp_path("corrupt");
        fs::write(&path, "not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.find(&Query::new("exp1")),
            Err(StoreError::Serialize(_))
        ));

        let _ = fs::remove_file(&path);
    }
}
